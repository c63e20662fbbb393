use crate::engine::{
    CompiledMatcher, Ctx, Expander, ExpandMetrics, Registry, RenderMetrics, Scope, Transform, transform,
};
use crate::{ConfigError, Error, Html, Node, RenderError};
use chrono::Local;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// Tags rendered as `<tag/>` with no inner part.
const SELF_CLOSING_TAGS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link", "menuitem", "meta", "param",
    "source", "track", "wbr",
];

bitflags::bitflags! {
    /// Boolean render options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderFlags: u8 {
        /// Escape `&`, `<`, `>` in text content.
        const ESCAPE_TEXT         = 1 << 0;
        /// Prefix the behavior attribute value with `return `.
        const JS_CALL_WRAPPED     = 1 << 1;
        /// Add the init class to elems that carry behavior params, not only blocks.
        const INIT_CLASS_ON_ELEMS = 1 << 2;
        /// Modifier classes omit the base prefix (`_disabled` instead of `button_disabled`).
        const NO_BASE_MODS        = 1 << 3;
        /// Abort runaway expansions with a [`RenderError`].
        const CYCLE_DETECTION     = 1 << 4;
    }
}

/// Order in which rules of the same bucket are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOrder {
    /// Earliest registered first.
    #[default]
    Registration,
    /// Latest registered first, so later templates override earlier ones.
    LatestFirst,
}

/// Options that affect matching and serialization.
#[derive(Debug, Clone)]
pub struct Options {
    pub flags: RenderFlags,
    /// Name of the attribute carrying behavior params.
    pub js_attr_name: String,
    /// Class added to nodes with behavior params. Empty disables it.
    pub init_class: String,
    pub elem_delimiter: String,
    pub mod_delimiter: String,
    pub self_closing: HashSet<String>,
    pub rule_order: RuleOrder,
    /// Option keys the engine does not interpret, kept as given.
    pub extra: Map<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            flags: RenderFlags::ESCAPE_TEXT | RenderFlags::JS_CALL_WRAPPED | RenderFlags::INIT_CLASS_ON_ELEMS,
            js_attr_name: "onclick".to_string(),
            init_class: "i-bem".to_string(),
            elem_delimiter: "__".to_string(),
            mod_delimiter: "_".to_string(),
            self_closing: SELF_CLOSING_TAGS.iter().map(|tag| tag.to_string()).collect(),
            rule_order: RuleOrder::default(),
            extra: Map::new(),
        }
    }
}

impl Options {
    pub fn has(&self, flag: RenderFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set(&mut self, flag: RenderFlags, on: bool) -> &mut Self {
        self.flags.set(flag, on);
        self
    }

    /// Apply a JSON patch. Keys are accepted under their descriptive names
    /// (`escapeText`, `behaviorAttrName`, ...) and under the short names
    /// (`escapeContent`, `jsAttrName`, ...). A wrongly typed value fails the
    /// whole patch and leaves the options unchanged.
    pub fn patch(&mut self, patch: &Value) -> Result<(), ConfigError> {
        let patch = OptionsPatch::deserialize(patch)?;
        let mut next = self.clone();

        let name_or_off = |toggle: NameOrFlag| match toggle {
            NameOrFlag::Name(name) => name,
            NameOrFlag::Flag(_) => String::new(),
        };
        if let Some(name) = patch.behavior_attr_name {
            next.js_attr_name = name;
        }
        if let Some(on) = patch.behavior_attr_is_call_wrapped {
            next.set(RenderFlags::JS_CALL_WRAPPED, on);
        }
        if let Some(scheme) = patch.js_attr_scheme {
            next.set(RenderFlags::JS_CALL_WRAPPED, scheme == JsAttrScheme::Js);
        }
        if let Some(init) = patch.init_class_name {
            next.init_class = name_or_off(init);
        }
        if let Some(on) = patch.attach_init_class_on_elements {
            next.set(RenderFlags::INIT_CLASS_ON_ELEMS, on);
        }
        if let Some(on) = patch.escape_text {
            next.set(RenderFlags::ESCAPE_TEXT, on);
        }
        if let Some(on) = patch.no_base_prefix_for_modifier_classes {
            next.set(RenderFlags::NO_BASE_MODS, on);
        }
        if let Some(on) = patch.enable_cycle_detection {
            next.set(RenderFlags::CYCLE_DETECTION, on);
        }
        if let Some(delim) = patch.elem_delimiter {
            next.elem_delimiter = delim;
        }
        if let Some(delim) = patch.mod_delimiter {
            next.mod_delimiter = delim;
        }
        if let Some(tags) = patch.short_tags {
            next.self_closing.extend(tags);
        }
        if let Some(order) = patch.rule_order {
            next.rule_order = order;
        }
        next.extra.extend(patch.extra);

        *self = next;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsPatch {
    #[serde(alias = "jsAttrName")]
    behavior_attr_name: Option<String>,
    behavior_attr_is_call_wrapped: Option<bool>,
    js_attr_scheme: Option<JsAttrScheme>,
    #[serde(alias = "jsCls")]
    init_class_name: Option<NameOrFlag>,
    #[serde(alias = "jsElem")]
    attach_init_class_on_elements: Option<bool>,
    #[serde(alias = "escapeContent")]
    escape_text: Option<bool>,
    #[serde(alias = "clsNobaseMods")]
    no_base_prefix_for_modifier_classes: Option<bool>,
    #[serde(alias = "delimElem")]
    elem_delimiter: Option<String>,
    #[serde(alias = "delimMod")]
    mod_delimiter: Option<String>,
    short_tags: Option<Vec<String>>,
    enable_cycle_detection: Option<bool>,
    rule_order: Option<RuleOrder>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JsAttrScheme {
    Js,
    Json,
}

/// A class name, or `false` to switch the class off.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameOrFlag {
    Name(String),
    Flag(bool),
}

/// Result of [`Engine::render_verbose`].
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub html: String,
    pub metrics: RenderMetrics,
}

/// A rule registry plus options: the BEMJSON → HTML template engine.
///
/// Registration and configuration take `&mut self`; rendering takes `&self`,
/// so a configured engine can be shared across threads.
///
/// # Example
/// ```
/// use bh::{Engine, bemjson};
///
/// let mut engine = Engine::new();
/// engine
///     .register_rule("button", |ctx| {
///         ctx.set_tag("button", false).set_attr("type", "button", false);
///         None
///     })
///     .unwrap();
///
/// let html = engine.render(bemjson!({ "block": "button", "content": "OK" })).unwrap();
/// assert_eq!(html, r#"<button class="button" type="button">OK</button>"#);
/// ```
pub struct Engine {
    registry: Registry,
    options: Options,
    compiled: OnceCell<CompiledMatcher>,
    /// Creation timestamp, part of every generated id.
    expando: i64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.registry.len())
            .field("options", &self.options)
            .field("compiled", &self.compiled.get().is_some())
            .finish()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Engine {
            registry: Registry::default(),
            options,
            compiled: OnceCell::new(),
            expando: Local::now().timestamp_millis(),
        }
    }

    // --- Registration --------------------------------------------------------

    /// Register a rule for one selector.
    pub fn register_rule<F>(&mut self, selector: &str, f: F) -> Result<&mut Self, ConfigError>
    where
        F: Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        self.register_map([(selector, transform(f))])
    }

    /// Register the same rule for several selectors. Nothing is registered if
    /// any selector is invalid.
    pub fn register_rules<I, S, F>(&mut self, selectors: I, f: F) -> Result<&mut Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        let shared = transform(f);
        self.register_map(selectors.into_iter().map(|selector| (selector, shared.clone())).collect::<Vec<_>>())
    }

    /// Register a `selector → rule` map, in iteration order. Nothing is
    /// registered if any selector is invalid.
    pub fn register_map<I, S>(&mut self, entries: I) -> Result<&mut Self, ConfigError>
    where
        I: IntoIterator<Item = (S, Transform)>,
        S: AsRef<str>,
    {
        let entries: Vec<(String, Transform)> =
            entries.into_iter().map(|(selector, f)| (selector.as_ref().to_string(), f)).collect();
        let ids = self.registry.add_all(entries)?;
        debug!(registered = ids.len(), total = self.registry.len(), "rules registered");
        self.invalidate();
        Ok(self)
    }

    /// Register a rule tried on every structured node before selector rules.
    pub fn register_before_all<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        self.registry.push(Scope::Before, transform(f));
        self.invalidate();
        self
    }

    /// Register a rule tried on every structured node after selector rules.
    pub fn register_after_all<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync + 'static,
    {
        self.registry.push(Scope::After, transform(f));
        self.invalidate();
        self
    }

    pub fn rule_count(&self) -> usize {
        self.registry.len()
    }

    // --- Configuration -------------------------------------------------------

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replace all options.
    pub fn configure(&mut self, options: Options) -> &mut Self {
        self.options = options;
        self.invalidate();
        self
    }

    /// Merge a JSON options patch. See [`Options::patch`].
    pub fn set_options(&mut self, patch: &Value) -> Result<&mut Self, ConfigError> {
        self.options.patch(patch)?;
        self.invalidate();
        Ok(self)
    }

    pub fn enable_cycle_detection(&mut self, on: bool) -> &mut Self {
        self.options.set(RenderFlags::CYCLE_DETECTION, on);
        self
    }

    // --- Rendering -----------------------------------------------------------

    /// Expand `tree` with the registered rules and serialize it.
    pub fn render(&self, tree: impl Into<Node>) -> Result<String, RenderError> {
        let expanded = self.expand(tree)?;
        Ok(self.to_html(&expanded))
    }

    /// Parse `source` as BEMJSON, then [`render`](Self::render) it.
    pub fn render_json(&self, source: &str) -> Result<String, Error> {
        let tree: Node = serde_json::from_str(source)?;
        Ok(self.render(tree)?)
    }

    /// Like [`render`](Self::render), also returning timings and counters.
    pub fn render_verbose(&self, tree: impl Into<Node>) -> Result<RenderReport, RenderError> {
        let start = Instant::now();
        let (expanded, expand) = self.expand_with_metrics(tree.into(), None, true)?;

        let serialize_start = Instant::now();
        let html = self.to_html(&expanded);
        let serialize = serialize_start.elapsed();

        let metrics = RenderMetrics { total: start.elapsed(), expand, serialize, output_bytes: html.len() };
        Ok(RenderReport { html, metrics })
    }

    /// Run the rules over `tree` and return the expanded tree.
    pub fn expand(&self, tree: impl Into<Node>) -> Result<Node, RenderError> {
        self.expand_within(tree, None, true)
    }

    /// Expand with an explicit ambient block for the root. With
    /// `expand_content` off only the root node is matched.
    pub fn expand_within(
        &self,
        tree: impl Into<Node>,
        block: Option<&str>,
        expand_content: bool,
    ) -> Result<Node, RenderError> {
        self.expand_with_metrics(tree.into(), block.map(str::to_string), expand_content).map(|(node, _)| node)
    }

    /// Serialize an already expanded tree.
    pub fn to_html(&self, tree: &Node) -> String {
        Html::new(&self.options).render(tree)
    }

    fn expand_with_metrics(
        &self,
        tree: Node,
        block: Option<String>,
        expand_content: bool,
    ) -> Result<(Node, ExpandMetrics), RenderError> {
        Expander::new(self, self.matcher(), expand_content).run(tree, block)
    }

    pub(crate) fn matcher(&self) -> &CompiledMatcher {
        self.compiled.get_or_init(|| CompiledMatcher::new(self.registry.rules(), self.options.rule_order))
    }

    pub(crate) fn expando(&self) -> i64 {
        self.expando
    }

    fn invalidate(&mut self) {
        self.compiled = OnceCell::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(options.has(RenderFlags::ESCAPE_TEXT));
        assert!(options.has(RenderFlags::JS_CALL_WRAPPED));
        assert!(options.has(RenderFlags::INIT_CLASS_ON_ELEMS));
        assert!(!options.has(RenderFlags::NO_BASE_MODS));
        assert!(!options.has(RenderFlags::CYCLE_DETECTION));
        assert_eq!(options.js_attr_name, "onclick");
        assert_eq!(options.init_class, "i-bem");
        assert!(options.self_closing.contains("br"));
        assert!(!options.self_closing.contains("div"));
        assert_eq!(options.rule_order, RuleOrder::Registration);
    }

    #[test]
    fn patch_accepts_both_key_styles() {
        let mut options = Options::default();
        options
            .patch(&json!({
                "jsAttrName": "data-bem",
                "jsAttrScheme": "json",
                "jsCls": false,
                "escapeText": false,
                "clsNobaseMods": true,
                "delimElem": "-",
                "modDelimiter": "--",
                "shortTags": ["custom"],
                "ruleOrder": "latestFirst",
                "enableCycleDetection": true,
                "theme": "dark",
            }))
            .unwrap();

        assert_eq!(options.js_attr_name, "data-bem");
        assert!(!options.has(RenderFlags::JS_CALL_WRAPPED));
        assert_eq!(options.init_class, "");
        assert!(!options.has(RenderFlags::ESCAPE_TEXT));
        assert!(options.has(RenderFlags::NO_BASE_MODS));
        assert!(options.has(RenderFlags::CYCLE_DETECTION));
        assert_eq!(options.elem_delimiter, "-");
        assert_eq!(options.mod_delimiter, "--");
        assert!(options.self_closing.contains("custom"));
        assert!(options.self_closing.contains("br"));
        assert_eq!(options.rule_order, RuleOrder::LatestFirst);
        assert_eq!(options.extra["theme"], json!("dark"));
    }

    #[test]
    fn bad_patch_changes_nothing() {
        let mut options = Options::default();
        let err = options.patch(&json!({ "behaviorAttrName": "x", "escapeText": "yes" })).unwrap_err();

        assert!(matches!(err, ConfigError::Options(_)));
        assert_eq!(options.js_attr_name, "onclick");
        assert!(options.has(RenderFlags::ESCAPE_TEXT));
    }

    #[test]
    fn registration_and_options_drop_the_compiled_matcher() {
        let mut engine = Engine::new();
        engine.register_rule("a", |_| None).unwrap();
        assert_eq!(engine.matcher().rule_count(), 1);

        engine.register_before_all(|_| None);
        assert!(engine.compiled.get().is_none());
        assert_eq!(engine.matcher().rule_count(), 2);

        engine.set_options(&json!({ "ruleOrder": "latestFirst" })).unwrap();
        assert!(engine.compiled.get().is_none());
    }

    #[test]
    fn invalid_selector_leaves_engine_unchanged() {
        let mut engine = Engine::new();
        let err = engine.register_rules(["ok", "also_ok", "not ok"], |_| None).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidSelector { .. }));
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
