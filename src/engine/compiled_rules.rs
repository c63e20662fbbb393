//! Rule compilation and dispatch.
//!
//! This module holds the *static* side of the engine: an index derived from the
//! registry that maps a node's `(block, elem)` straight to the rules that can
//! apply to it. Modifier conditions are checked per candidate at dispatch time.
//!
//! ```text
//! before rules ─┐
//! by_block[block].no_elem        (node without elem)   ├─ tried in this order
//! by_block[block].by_elem[elem]  (node with elem)      │
//! after rules  ─┘
//! ```
//!
//! Within a bucket, rules are ordered by [`RuleOrder`]. The first rule that
//! replaces the node ends the dispatch; so does `Ctx::stop`. The bucket is
//! chosen once the before rules have run.
//!
//! ## Invariants
//!
//! - `RuleId` is an index into `CompiledMatcher::transforms` and `labels`, and
//!   into the registry the matcher was built from.
//! - A matcher is immutable. Registering a rule or changing options drops the
//!   cached matcher and the next render builds a new one.

use super::context::Ctx;
use super::registry::{Rule, RuleId, Scope, Transform};
use super::selector::ModCond;
use crate::{Bem, RuleOrder};
use indexmap::IndexMap;
use tracing::{debug, trace};

// --- Rule compilation and indexing -------------------------------------------

/// A rule reference plus the modifier conditions it still has to satisfy.
#[derive(Debug, Clone)]
pub(crate) struct Guarded {
    pub id: RuleId,
    pub block_mod: Option<ModCond>,
    pub elem_mod: Option<ModCond>,
}

impl Guarded {
    fn unconditional(id: RuleId) -> Self {
        Guarded { id, block_mod: None, elem_mod: None }
    }

    /// Not yet fired on this node, and every modifier condition holds.
    fn accepts(&self, json: &Bem) -> bool {
        !json.state.fired.contains(self.id)
            && self.elem_mod.as_ref().is_none_or(|cond| cond.matches(json.elem_mods.as_ref()))
            && self.block_mod.as_ref().is_none_or(|cond| cond.matches(json.mods.as_ref()))
    }
}

#[derive(Debug, Default)]
pub(crate) struct BlockBucket {
    pub no_elem: Vec<Guarded>,
    pub by_elem: IndexMap<String, Vec<Guarded>>,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// No rule replaced the node (it may still have been mutated in place).
    Kept,
    /// The node in the slot is a different value now and needs a fresh visit.
    Replaced,
}

/// Pre-compiled rule set with a block/elem index.
pub struct CompiledMatcher {
    transforms: Vec<Transform>,
    labels: Vec<String>,
    before: Vec<Guarded>,
    after: Vec<Guarded>,
    by_block: IndexMap<String, BlockBucket>,
}

impl CompiledMatcher {
    pub(crate) fn new(rules: &[Rule], order: RuleOrder) -> Self {
        let mut ordered: Vec<&Rule> = rules.iter().collect();
        if order == RuleOrder::LatestFirst {
            ordered.reverse();
        }

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut by_block: IndexMap<String, BlockBucket> = IndexMap::new();
        for rule in ordered {
            match &rule.scope {
                Scope::Before => before.push(Guarded::unconditional(rule.id)),
                Scope::After => after.push(Guarded::unconditional(rule.id)),
                Scope::Selector(selector) => {
                    let guarded = Guarded {
                        id: rule.id,
                        block_mod: selector.block_mod.clone(),
                        elem_mod: selector.elem_mod.clone(),
                    };
                    let bucket = by_block.entry(selector.block.clone()).or_default();
                    match &selector.elem {
                        Some(elem) => bucket.by_elem.entry(elem.clone()).or_default().push(guarded),
                        None => bucket.no_elem.push(guarded),
                    }
                }
            }
        }

        debug!(
            rules = rules.len(),
            blocks = by_block.len(),
            before = before.len(),
            after = after.len(),
            ?order,
            "compiled matcher"
        );

        CompiledMatcher {
            transforms: rules.iter().map(|rule| rule.transform.clone()).collect(),
            labels: rules.iter().map(Rule::label).collect(),
            before,
            after,
            by_block,
        }
    }

    pub(crate) fn rule_count(&self) -> usize {
        self.transforms.len()
    }

    pub(crate) fn label(&self, id: RuleId) -> &str {
        &self.labels[id]
    }

    /// Selector rules indexed under the node's block and elem. A node without
    /// a block only ever sees the global rules.
    pub(crate) fn bucket(&self, block: Option<&str>, elem: Option<&str>) -> &[Guarded] {
        let Some(bucket) = block.and_then(|block| self.by_block.get(block)) else {
            return &[];
        };
        match elem {
            Some(elem) => bucket.by_elem.get(elem).map(Vec::as_slice).unwrap_or_default(),
            None => &bucket.no_elem,
        }
    }

    /// Try every applicable rule on the context's node, in order, until one
    /// replaces it or stops matching. The bucket is looked up after the
    /// before rules ran, so they can move the node to another block or elem.
    pub(crate) fn dispatch(&self, ctx: &mut Ctx<'_>) -> Dispatch {
        if let Some(done) = self.run_rules(&self.before, ctx) {
            return done;
        }
        let Some(json) = ctx.target() else {
            return Dispatch::Kept;
        };
        let (block, elem) = (json.block.clone(), json.elem.clone());
        let bucket = self.bucket(block.as_deref(), elem.as_deref());
        self.run_rules(bucket.iter().chain(&self.after), ctx).unwrap_or(Dispatch::Kept)
    }

    /// `Some` as soon as the node is replaced or stopped.
    fn run_rules<'r>(&self, rules: impl IntoIterator<Item = &'r Guarded>, ctx: &mut Ctx<'_>) -> Option<Dispatch> {
        for rule in rules {
            if !ctx.target().is_some_and(|json| rule.accepts(json)) {
                continue;
            }
            if self.fire(rule.id, ctx) {
                return Some(Dispatch::Replaced);
            }
            if ctx.target().is_none_or(|json| json.state.stopped) {
                return Some(Dispatch::Kept);
            }
        }
        None
    }

    /// Run one rule. Returns `true` when the node was replaced.
    fn fire(&self, id: RuleId, ctx: &mut Ctx<'_>) -> bool {
        if let Some(json) = ctx.target_mut() {
            json.state.fired.insert(id);
        }
        ctx.record_fire(id);
        trace!(rule = self.label(id), "rule fired");

        match (self.transforms[id])(ctx) {
            Some(replacement) => {
                trace!(rule = self.label(id), "node replaced");
                ctx.replace(replacement);
                true
            }
            None => ctx.is_replaced(),
        }
    }
}

impl std::fmt::Debug for CompiledMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMatcher")
            .field("labels", &self.labels)
            .field("before", &self.before)
            .field("after", &self.after)
            .field("by_block", &self.by_block)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::{Registry, transform};

    fn registry(selectors: &[&str]) -> Registry {
        let mut registry = Registry::default();
        registry.push(Scope::Before, transform(|_| None));
        registry.add_all(selectors.iter().map(|s| (s.to_string(), transform(|_| None)))).unwrap();
        registry.push(Scope::After, transform(|_| None));
        registry
    }

    fn ids(guarded: &[Guarded]) -> Vec<RuleId> {
        guarded.iter().map(|g| g.id).collect()
    }

    #[test]
    fn buckets_split_block_and_elem_rules() {
        let registry = registry(&["button", "button_disabled", "button__icon", "link"]);
        let matcher = CompiledMatcher::new(registry.rules(), RuleOrder::Registration);

        assert_eq!(ids(matcher.bucket(Some("button"), None)), vec![1, 2]);
        assert_eq!(ids(matcher.bucket(Some("button"), Some("icon"))), vec![3]);
        assert_eq!(ids(matcher.bucket(Some("link"), None)), vec![4]);
        assert!(matcher.bucket(Some("link"), Some("icon")).is_empty());
        assert!(matcher.bucket(None, None).is_empty());
        assert_eq!(ids(&matcher.before), vec![0]);
        assert_eq!(ids(&matcher.after), vec![5]);
        assert_eq!(matcher.rule_count(), 6);
        assert_eq!(matcher.label(2), "button_disabled");
    }

    #[test]
    fn latest_first_reverses_each_bucket() {
        let registry = registry(&["button", "button_disabled", "button_theme_dark"]);
        let matcher = CompiledMatcher::new(registry.rules(), RuleOrder::LatestFirst);

        assert_eq!(ids(matcher.bucket(Some("button"), None)), vec![3, 2, 1]);
    }

    #[test]
    fn guard_rejects_fired_rules_and_unmet_mods() {
        let registry = registry(&["button_disabled"]);
        let matcher = CompiledMatcher::new(registry.rules(), RuleOrder::Registration);
        let guarded = &matcher.bucket(Some("button"), None)[0];

        let mut json = Bem::from(serde_json::json!({ "block": "button", "mods": { "disabled": true } }));
        assert!(guarded.accepts(&json));
        json.state.fired.insert(guarded.id);
        assert!(!guarded.accepts(&json));

        let json = Bem::from(serde_json::json!({ "block": "button", "mods": {} }));
        assert!(!guarded.accepts(&json));
    }
}
