//! Transform context.
//!
//! A [`Ctx`] is what a rule body sees. It wraps the node currently being
//! matched together with its queue slot, so rules can read and edit the node,
//! look at its position among siblings, share inherited params with their
//! descendants, re-run lower-priority rules, or expand a detached subtree.
//!
//! Edits follow one convention: a non-forced write never overrides something
//! already present, a forced write always does. For maps this holds per key.

use super::compiled_rules::CompiledMatcher;
use super::expander::{Expander, RunState, SlotId};
use super::registry::RuleId;
use crate::{Bem, Engine, Mods, Node, Options, truthy};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static EMPTY: Lazy<Bem> = Lazy::new(Bem::default);

static LAST_GEN_ID: AtomicU64 = AtomicU64::new(0);

pub struct Ctx<'a> {
    node: &'a mut Node,
    slot: SlotId,
    run: &'a mut RunState,
    engine: &'a Engine,
    matcher: &'a CompiledMatcher,
    replaced: bool,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(
        node: &'a mut Node,
        slot: SlotId,
        run: &'a mut RunState,
        engine: &'a Engine,
        matcher: &'a CompiledMatcher,
    ) -> Self {
        Ctx { node, slot, run, engine, matcher, replaced: false }
    }

    // --- Dispatch plumbing ---------------------------------------------------

    pub(crate) fn target(&self) -> Option<&Bem> {
        self.node.as_bem()
    }

    pub(crate) fn target_mut(&mut self) -> Option<&mut Bem> {
        self.node.as_bem_mut()
    }

    pub(crate) fn record_fire(&mut self, id: RuleId) {
        self.run.fired[id] += 1;
    }

    pub(crate) fn replace(&mut self, node: Node) {
        *self.node = node;
        self.replaced = true;
    }

    pub(crate) fn is_replaced(&self) -> bool {
        self.replaced
    }

    // --- Node access ---------------------------------------------------------

    /// The node being matched. After a replacement with a scalar this is an
    /// empty node.
    pub fn json(&self) -> &Bem {
        self.target().unwrap_or(&*EMPTY)
    }

    /// The current node as a plain value, including any replacement.
    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn options(&self) -> &Options {
        self.engine.options()
    }

    /// 1-based index among the structured siblings of the node.
    pub fn position(&self) -> Option<usize> {
        self.run.slots[self.slot].position
    }

    pub fn is_first(&self) -> bool {
        self.position() == Some(1)
    }

    pub fn is_last(&self) -> bool {
        let slot = &self.run.slots[self.slot];
        slot.position.is_some() && slot.position == Some(slot.siblings)
    }

    pub fn is_simple(&self, node: &Node) -> bool {
        node.is_simple()
    }

    // --- Modifiers -----------------------------------------------------------

    /// The node's modifiers: elem modifiers for an elem, block modifiers otherwise.
    pub fn mods(&self) -> Option<&Mods> {
        let json = self.json();
        if json.elem.is_some() { json.elem_mods.as_ref() } else { json.mods.as_ref() }
    }

    pub fn mod_value(&self, name: &str) -> Option<&Value> {
        self.mods().and_then(|mods| mods.get(name))
    }

    pub fn set_mods(&mut self, values: Value, force: bool) -> &mut Self {
        if let (Some(json), Value::Object(values)) = (self.target_mut(), values) {
            let field = if json.elem.is_some() { &mut json.elem_mods } else { &mut json.mods };
            merge(field, values, force);
        }
        self
    }

    pub fn set_mod(&mut self, name: &str, value: impl Into<Value>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            let field = if json.elem.is_some() { &mut json.elem_mods } else { &mut json.mods };
            put(field.get_or_insert_with(Map::new), name, value.into(), force);
        }
        self
    }

    // --- Attributes ----------------------------------------------------------

    pub fn attrs(&self) -> Option<&Mods> {
        self.json().attrs.as_ref()
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs().and_then(|attrs| attrs.get(name))
    }

    pub fn set_attrs(&mut self, values: Value, force: bool) -> &mut Self {
        if let (Some(json), Value::Object(values)) = (self.target_mut(), values) {
            merge(&mut json.attrs, values, force);
        }
        self
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<Value>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            put(json.attrs.get_or_insert_with(Map::new), name, value.into(), force);
        }
        self
    }

    // --- Behavior params -----------------------------------------------------

    pub fn js(&self) -> Option<&Value> {
        self.json().js.as_ref()
    }

    /// Forced: replace (`true` becomes `{}`). Otherwise a truthy value is
    /// merged into the existing params, existing keys winning.
    pub fn set_js(&mut self, value: impl Into<Value>, force: bool) -> &mut Self {
        let value = value.into();
        if let Some(json) = self.target_mut() {
            if force {
                json.js = Some(if value == Value::Bool(true) { Value::Object(Map::new()) } else { value });
            } else if truthy(&value) {
                let mut merged = match json.js.take() {
                    Some(Value::Object(existing)) => existing,
                    _ => Map::new(),
                };
                if let Value::Object(incoming) = value {
                    for (key, value) in incoming {
                        merged.entry(key).or_insert(value);
                    }
                }
                json.js = Some(Value::Object(merged));
            }
        }
        self
    }

    // --- Mixes ---------------------------------------------------------------

    pub fn mix(&self) -> &[Bem] {
        self.json().mix.as_deref().unwrap_or_default()
    }

    /// Forced or absent: replace. Otherwise append.
    pub fn set_mix(&mut self, mix: impl Into<Node>, force: bool) -> &mut Self {
        let items = Bem::mixes(mix.into());
        if let Some(json) = self.target_mut() {
            match &mut json.mix {
                Some(existing) if !force => existing.extend(items),
                slot => *slot = Some(items),
            }
        }
        self
    }

    // --- Single-valued fields ------------------------------------------------

    pub fn content(&self) -> Option<&Node> {
        self.json().content.as_ref()
    }

    pub fn set_content(&mut self, content: impl Into<Node>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            claim(&mut json.content, content.into(), force);
        }
        self
    }

    pub fn html(&self) -> Option<&str> {
        self.json().html.as_deref()
    }

    pub fn set_html(&mut self, html: impl Into<String>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            claim(&mut json.html, html.into(), force);
        }
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.json().tag.as_deref()
    }

    /// An empty tag suppresses the wrapping element.
    pub fn set_tag(&mut self, tag: impl Into<String>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            claim(&mut json.tag, tag.into(), force);
        }
        self
    }

    pub fn cls(&self) -> Option<&str> {
        self.json().cls.as_deref()
    }

    pub fn set_cls(&mut self, cls: impl Into<String>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            claim(&mut json.cls, cls.into(), force);
        }
        self
    }

    pub fn bem(&self) -> Option<bool> {
        self.json().bem
    }

    pub fn set_bem(&mut self, bem: bool, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            claim(&mut json.bem, bem, force);
        }
        self
    }

    /// Read any field by its BEMJSON key.
    pub fn param(&self, key: &str) -> Option<Value> {
        self.json().field(key)
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<Value>, force: bool) -> &mut Self {
        if let Some(json) = self.target_mut() {
            if force || json.field(key).is_none() {
                json.set_field(key, value.into());
            }
        }
        self
    }

    // --- Inherited params ----------------------------------------------------

    /// Look the key up on this node's slot, then on each ancestor slot.
    pub fn tparam(&self, key: &str) -> Option<&Value> {
        let mut slot = Some(self.slot);
        while let Some(id) = slot {
            let current = &self.run.slots[id];
            if let Some(value) = current.tparams.get(key) {
                return Some(value);
            }
            slot = current.parent;
        }
        None
    }

    /// Store a param on this node's slot, visible to every descendant.
    pub fn set_tparam(&mut self, key: &str, value: impl Into<Value>, force: bool) -> &mut Self {
        let tparams = &mut self.run.slots[self.slot].tparams;
        if force || !tparams.contains_key(key) {
            tparams.insert(key.to_string(), value.into());
        }
        self
    }

    // --- Control -------------------------------------------------------------

    /// Run the remaining applicable rules on the node as it is now. Rules that
    /// already fired on it are skipped. A replacement made by one of them is
    /// written back into the slot and becomes this node.
    pub fn apply_base(&mut self) -> &mut Self {
        let matcher = self.matcher;
        matcher.dispatch(self);
        self
    }

    /// No further rules are tried on this node, now or on later visits.
    pub fn stop(&mut self) -> &mut Self {
        if let Some(json) = self.target_mut() {
            json.state.stopped = true;
        }
        self
    }

    /// Expand a detached subtree with the current rules. The subtree's block
    /// context starts at this node's block. Its dispatches count toward the
    /// loop guard of the current render.
    pub fn process(&mut self, tree: impl Into<Node>) -> Node {
        let block = self.json().block.clone();
        let nested = Expander::new(self.engine, self.matcher, true).counting_from(self.run.dispatches);
        match nested.run(tree.into(), block) {
            Ok((node, metrics)) => {
                self.run.dispatches = metrics.dispatches;
                node
            }
            Err(err) => {
                self.run.error.get_or_insert(err);
                Node::Null
            }
        }
    }

    /// A process-unique id: `uniq` + engine timestamp + counter.
    pub fn generate_id(&self) -> String {
        let n = LAST_GEN_ID.fetch_add(1, Ordering::Relaxed) + 1;
        format!("uniq{}{}", self.engine.expando(), n)
    }
}

fn claim<T>(field: &mut Option<T>, value: T, force: bool) {
    if force || field.is_none() {
        *field = Some(value);
    }
}

fn put(map: &mut Mods, key: &str, value: Value, force: bool) {
    if force || !map.contains_key(key) {
        map.insert(key.to_string(), value);
    }
}

/// Non-forced merges keep existing keys; forced merges let new keys win.
fn merge(field: &mut Option<Mods>, values: Map<String, Value>, force: bool) {
    let map = field.get_or_insert_with(Map::new);
    for (key, value) in values {
        put(map, &key, value, force);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_respects_force() {
        let mut field = json!({ "a": 1 }).as_object().cloned();
        merge(&mut field, json!({ "a": 2, "b": 3 }).as_object().cloned().unwrap(), false);
        assert_eq!(Value::Object(field.clone().unwrap()), json!({ "a": 1, "b": 3 }));

        merge(&mut field, json!({ "a": 2 }).as_object().cloned().unwrap(), true);
        assert_eq!(field.unwrap()["a"], json!(2));
    }

    #[test]
    fn claim_is_first_write_wins() {
        let mut tag = None;
        claim(&mut tag, "span", false);
        claim(&mut tag, "a", false);
        assert_eq!(tag, Some("span"));
        claim(&mut tag, "a", true);
        assert_eq!(tag, Some("a"));
    }
}
