//! Rule selectors.
//!
//! A selector names the nodes a rule applies to:
//!
//! ```text
//! block                     any node of the block (no elem)
//! block_mod                 ... whose block mod `mod` is boolean true
//! block_mod_val             ... whose block mod `mod` equals "val"
//! block__elem               elem nodes of the block
//! block_m_v__elem_m2_v2     both conditions at once
//! ```
//!
//! Names are made of ASCII letters, digits and `-`. Anything else is rejected
//! at registration time with [`ConfigError::InvalidSelector`].

use crate::{ConfigError, Mods};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Expected value of a modifier in a selector condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModValue {
    /// `block_mod`: the modifier must be exactly `true`.
    Flag,
    /// `block_mod_val`: the modifier must be the string `val`.
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModCond {
    pub name: String,
    pub value: ModValue,
}

impl ModCond {
    /// Strict comparison against the node's modifier map: a flag condition is
    /// not satisfied by `"true"` and an exact one is not satisfied by a number.
    pub(crate) fn matches(&self, mods: Option<&Mods>) -> bool {
        let Some(actual) = mods.and_then(|m| m.get(&self.name)) else {
            return false;
        };
        match (&self.value, actual) {
            (ModValue::Flag, Value::Bool(b)) => *b,
            (ModValue::Exact(expected), Value::String(s)) => s == expected,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selector {
    pub block: String,
    pub block_mod: Option<ModCond>,
    pub elem: Option<String>,
    pub elem_mod: Option<ModCond>,
}

impl FromStr for Selector {
    type Err = ConfigError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidSelector { selector: selector.to_string(), reason };
        if selector.is_empty() {
            return Err(invalid("empty selector"));
        }
        if !regex!(r"^[A-Za-z0-9-]+(?:_[A-Za-z0-9-]+){0,2}(?:__[A-Za-z0-9-]+(?:_[A-Za-z0-9-]+){0,2})?$").is_match(selector)
        {
            return Err(invalid("expected block[_mod[_val]][__elem[_mod[_val]]]"));
        }

        let (block_part, elem_part) = match selector.split_once("__") {
            Some((block, elem)) => (block, Some(elem)),
            None => (selector, None),
        };
        let (block, block_mod) = split_mod(block_part);
        let (elem, elem_mod) = match elem_part.map(split_mod) {
            Some((elem, cond)) => (Some(elem), cond),
            None => (None, None),
        };

        Ok(Selector { block, block_mod, elem, elem_mod })
    }
}

fn split_mod(part: &str) -> (String, Option<ModCond>) {
    let mut pieces = part.splitn(3, '_');
    let name = pieces.next().unwrap_or_default().to_string();
    let cond = pieces.next().map(|mod_name| ModCond {
        name: mod_name.to_string(),
        value: match pieces.next() {
            Some(value) => ModValue::Exact(value.to_string()),
            None => ModValue::Flag,
        },
    });
    (name, cond)
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(f: &mut fmt::Formatter<'_>, name: &str, cond: &Option<ModCond>) -> fmt::Result {
            f.write_str(name)?;
            match cond {
                Some(ModCond { name, value: ModValue::Flag }) => write!(f, "_{name}"),
                Some(ModCond { name, value: ModValue::Exact(value) }) => write!(f, "_{name}_{value}"),
                None => Ok(()),
            }
        }
        part(f, &self.block, &self.block_mod)?;
        if let Some(elem) = &self.elem {
            f.write_str("__")?;
            part(f, elem, &self.elem_mod)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn cond(name: &str, value: Option<&str>) -> Option<ModCond> {
        Some(ModCond {
            name: name.to_string(),
            value: value.map_or(ModValue::Flag, |v| ModValue::Exact(v.to_string())),
        })
    }

    #[test]
    fn parses_every_shape() {
        let s: Selector = "button".parse().unwrap();
        assert_eq!(s, Selector { block: "button".into(), block_mod: None, elem: None, elem_mod: None });

        let s: Selector = "button_disabled".parse().unwrap();
        assert_eq!(s.block_mod, cond("disabled", None));

        let s: Selector = "button_theme_dark".parse().unwrap();
        assert_eq!(s.block_mod, cond("theme", Some("dark")));

        let s: Selector = "menu__item".parse().unwrap();
        assert_eq!(s.elem.as_deref(), Some("item"));
        assert_eq!(s.block_mod, None);

        let s: Selector = "menu_size_l__item_state_active".parse().unwrap();
        assert_eq!(s.block, "menu");
        assert_eq!(s.block_mod, cond("size", Some("l")));
        assert_eq!(s.elem.as_deref(), Some("item"));
        assert_eq!(s.elem_mod, cond("state", Some("active")));

        let s: Selector = "b-page__head-line_hidden".parse().unwrap();
        assert_eq!(s.block, "b-page");
        assert_eq!(s.elem.as_deref(), Some("head-line"));
        assert_eq!(s.elem_mod, cond("hidden", None));
    }

    #[rstest]
    #[case("")]
    #[case("a_b_c_d")]
    #[case("a___b")]
    #[case("a__b__c")]
    #[case("__elem")]
    #[case("block__")]
    #[case("bl ock")]
    #[case("block_")]
    fn rejects_malformed(#[case] selector: &str) {
        let err = selector.parse::<Selector>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector { .. }), "{selector}");
    }

    #[rstest]
    #[case("button")]
    #[case("button_disabled")]
    #[case("button_theme_dark__icon_size_s")]
    fn display_restores_source(#[case] selector: &str) {
        assert_eq!(selector.parse::<Selector>().unwrap().to_string(), selector);
    }

    #[test]
    fn mod_conditions_compare_strictly() {
        let flag = cond("disabled", None).unwrap();
        let exact = cond("size", Some("1")).unwrap();
        let mods = |v: Value| v.as_object().cloned();

        assert!(flag.matches(mods(json!({ "disabled": true })).as_ref()));
        assert!(!flag.matches(mods(json!({ "disabled": "true" })).as_ref()));
        assert!(!flag.matches(mods(json!({})).as_ref()));
        assert!(!flag.matches(None));
        assert!(exact.matches(mods(json!({ "size": "1" })).as_ref()));
        assert!(!exact.matches(mods(json!({ "size": 1 })).as_ref()));
    }
}
