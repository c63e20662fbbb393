//! Tree expansion.
//!
//! This module is the operational core of the engine. It walks a BEMJSON tree
//! breadth-first and dispatches every structured node to the compiled rules,
//! rewriting the tree in place until no rule applies anymore.
//!
//! ## Key concepts
//!
//! - **Slot**: a position in the tree, stored as a path from the root. Slots
//!   outlive the node in them: when a rule replaces a node, the replacement is
//!   written into the same slot and the slot is queued again.
//! - **Ambient context**: the block name and block modifiers inherited from the
//!   nearest enclosing block. Elem nodes without an explicit block take both.
//! - **Inherited params**: values a rule stores on a slot with
//!   `Ctx::set_tparam`; descendants find them by walking the parent chain.
//!
//! ## Pass structure
//!
//! ```text
//! pop slot ── sequence? ─ flatten nested sequences, queue structured items
//!          └─ node?     ─ apply ambient context
//!                         count visit (loop guard)
//!                         dispatch rules ── replaced? ─ queue the slot again
//!                         queue structured content
//! ```
//!
//! The queue is FIFO, so siblings are expanded before their children and a
//! replacement is revisited after everything queued before it. Output is
//! deterministic for a given tree, rule set and options.
//!
//! ## Loop guard
//!
//! With cycle detection on, a slot visited more than [`MAX_NODE_VISITS`] times
//! or a run exceeding [`MAX_DISPATCHES`] dispatches aborts with a
//! [`RenderError`]. Runs started by `Ctx::process` continue the dispatch count
//! of the run that started them. With detection off, a rule that keeps
//! producing fresh nodes does not terminate.

use super::compiled_rules::{CompiledMatcher, Dispatch};
use super::context::Ctx;
use super::metrics::{ExpandMetrics, RuleFire};
use crate::{Bem, Engine, Mods, Node, RenderError, RenderFlags};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Visits of one slot after which the run is considered looping.
pub(crate) const MAX_NODE_VISITS: usize = 100;
/// Dispatches in one run after which the run is considered looping.
pub(crate) const MAX_DISPATCHES: usize = 1000;

pub(crate) type SlotId = usize;

/// One step of a slot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Item of a sequence.
    Index(usize),
    /// The `content` of a structured node.
    Content,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub path: Vec<Step>,
    pub parent: Option<SlotId>,
    /// Ambient block name and block modifiers for the value in the slot.
    pub block: Option<String>,
    pub mods: Option<Mods>,
    /// 1-based index among structured siblings, when the slot is a sequence item.
    pub position: Option<usize>,
    pub siblings: usize,
    pub visits: usize,
    pub tparams: Map<String, Value>,
}

/// Mutable state of one expansion run, shared with every [`Ctx`].
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub slots: Vec<Slot>,
    /// Per-rule fire counts, indexed by rule id.
    pub fired: Vec<usize>,
    pub dispatches: usize,
    pub replacements: usize,
    /// First error raised from inside a rule (nested `Ctx::process`).
    pub error: Option<RenderError>,
}

/// Expander orchestrates applying the compiled rules to one tree.
///
/// Usage: `Expander::new(engine, matcher, expand_content).run(tree, block)`.
pub(crate) struct Expander<'e> {
    engine: &'e Engine,
    matcher: &'e CompiledMatcher,
    run: RunState,
    queue: VecDeque<SlotId>,
    /// When off, only the root node is dispatched; its content is left alone.
    expand_content: bool,
    detect_loops: bool,
}

impl<'e> Expander<'e> {
    pub(crate) fn new(engine: &'e Engine, matcher: &'e CompiledMatcher, expand_content: bool) -> Self {
        let run = RunState { fired: vec![0; matcher.rule_count()], ..RunState::default() };
        Expander {
            engine,
            matcher,
            run,
            queue: VecDeque::new(),
            expand_content,
            detect_loops: engine.options().has(RenderFlags::CYCLE_DETECTION),
        }
    }

    /// Start the dispatch counter at `dispatches`, so a nested run stays
    /// under the same per-render limit as the run that spawned it.
    pub(crate) fn counting_from(mut self, dispatches: usize) -> Self {
        self.run.dispatches = dispatches;
        self
    }

    /// Expand `tree` to a fixpoint. `block` is the ambient block for the root.
    pub(crate) fn run(mut self, tree: Node, block: Option<String>) -> Result<(Node, ExpandMetrics), RenderError> {
        let start = Instant::now();
        let mut root = tree;

        let seed = self.push_slot(Vec::new(), None, block, None, None);
        self.queue.push_back(seed);
        let mut max_queue = self.queue.len();

        while let Some(id) = self.queue.pop_front() {
            self.step(&mut root, id)?;
            max_queue = max_queue.max(self.queue.len());
        }

        let fired = self
            .run
            .fired
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(id, count)| RuleFire { rule: self.matcher.label(id).to_string(), count: *count })
            .collect();
        let metrics = ExpandMetrics {
            duration: start.elapsed(),
            slots: self.run.slots.len(),
            dispatches: self.run.dispatches,
            replacements: self.run.replacements,
            max_queue,
            fired,
        };

        debug!(
            slots = metrics.slots,
            dispatches = metrics.dispatches,
            replacements = metrics.replacements,
            elapsed = ?metrics.duration,
            "expansion finished"
        );
        Ok((root, metrics))
    }

    fn push_slot(
        &mut self,
        path: Vec<Step>,
        parent: Option<SlotId>,
        block: Option<String>,
        mods: Option<Mods>,
        position: Option<usize>,
    ) -> SlotId {
        let id = self.run.slots.len();
        self.run.slots.push(Slot {
            path,
            parent,
            block,
            mods,
            position,
            siblings: 0,
            visits: 0,
            tparams: Map::new(),
        });
        id
    }

    fn step(&mut self, root: &mut Node, id: SlotId) -> Result<(), RenderError> {
        let path = self.run.slots[id].path.clone();
        let Some(value) = locate(root, &path) else {
            return Ok(());
        };

        if let Node::List(items) = &mut *value {
            flatten(items);
            let (block, mods) = {
                let slot = &self.run.slots[id];
                (slot.block.clone(), slot.mods.clone())
            };
            self.enqueue_items(id, path, items, &block, &mods);
            return Ok(());
        }
        if matches!(value, Node::Bem(_)) {
            return self.visit(value, id, path);
        }
        Ok(())
    }

    fn visit(&mut self, value: &mut Node, id: SlotId, path: Vec<Step>) -> Result<(), RenderError> {
        let Node::Bem(json) = &mut *value else {
            return Ok(());
        };
        let (block, mods) = {
            let slot = &self.run.slots[id];
            inherit(json, slot.block.clone(), slot.mods.clone())
        };
        let stopped = json.state.stopped;

        self.run.slots[id].visits += 1;
        self.run.dispatches += 1;
        if self.detect_loops {
            if let Some(err) = self.loop_error(id, json) {
                warn!(%err, "expansion aborted");
                return Err(err);
            }
        }

        if !stopped {
            let (engine, matcher) = (self.engine, self.matcher);
            let outcome = {
                let mut ctx = Ctx::new(value, id, &mut self.run, engine, matcher);
                matcher.dispatch(&mut ctx)
            };
            if let Some(err) = self.run.error.take() {
                return Err(err);
            }
            if outcome == Dispatch::Replaced {
                self.run.replacements += 1;
                let slot = &mut self.run.slots[id];
                slot.block = block;
                slot.mods = mods;
                trace!(slot = id, "slot replaced, queued again");
                self.queue.push_back(id);
                return Ok(());
            }
        }

        if !self.expand_content {
            return Ok(());
        }
        let Some(json) = value.as_bem_mut() else {
            return Ok(());
        };
        // Rules may have changed the block or its modifiers.
        let (block, mods) = scope(json, block, mods);
        let Some(content) = json.content.as_mut() else {
            return Ok(());
        };
        let mut content_path = path;
        content_path.push(Step::Content);
        match content {
            Node::List(items) => {
                flatten(items);
                self.enqueue_items(id, content_path, items, &block, &mods);
            }
            Node::Bem(_) => {
                let child = self.push_slot(content_path, Some(id), block, mods, None);
                self.queue.push_back(child);
            }
            _ => {}
        }
        Ok(())
    }

    /// Queue every structured item of a sequence living at `path`.
    fn enqueue_items(
        &mut self,
        parent: SlotId,
        path: Vec<Step>,
        items: &[Node],
        block: &Option<String>,
        mods: &Option<Mods>,
    ) {
        let mut ids = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if !item.is_structured() {
                continue;
            }
            let mut item_path = path.clone();
            item_path.push(Step::Index(index));
            let id = self.push_slot(item_path, Some(parent), block.clone(), mods.clone(), Some(ids.len() + 1));
            ids.push(id);
        }

        let siblings = ids.len();
        for id in ids {
            self.run.slots[id].siblings = siblings;
            self.queue.push_back(id);
        }
    }

    fn loop_error(&self, id: SlotId, json: &Bem) -> Option<RenderError> {
        let visits = self.run.slots[id].visits;
        let path = || json.path(&self.engine.options().elem_delimiter);
        if visits > MAX_NODE_VISITS {
            return Some(RenderError::NodeLoop { path: path(), visits });
        }
        if self.run.dispatches > MAX_DISPATCHES {
            return Some(RenderError::MatcherLoop { path: path(), dispatches: self.run.dispatches });
        }
        None
    }
}

/// Resolve a slot path against the tree. A path can dangle when an earlier
/// replacement changed the shape above it; such slots are skipped.
fn locate<'n>(root: &'n mut Node, path: &[Step]) -> Option<&'n mut Node> {
    let mut current = root;
    for step in path {
        current = match (step, current) {
            (Step::Index(index), Node::List(items)) => items.get_mut(*index)?,
            (Step::Content, Node::Bem(json)) => json.content.as_mut()?,
            _ => return None,
        };
    }
    Some(current)
}

/// Splice nested sequences into their parent, recursively, keeping order.
fn flatten(items: &mut Vec<Node>) {
    if !items.iter().any(|item| matches!(item, Node::List(_))) {
        return;
    }
    let mut flat = Vec::with_capacity(items.len());
    let mut stack: Vec<std::vec::IntoIter<Node>> = vec![std::mem::take(items).into_iter()];
    while let Some(top) = stack.last_mut() {
        match top.next() {
            Some(Node::List(nested)) => stack.push(nested.into_iter()),
            Some(item) => flat.push(item),
            None => {
                stack.pop();
            }
        }
    }
    *items = flat;
}

/// Apply the ambient block context to a node and return the context its
/// content inherits.
///
/// - elem node: takes the ambient block when it has none; its own `mods`
///   become its elem modifiers unless those are set; block modifiers come from
///   the ambient context.
/// - block node: keeps its own block and modifiers (empty when absent).
/// - anything else: passes the ambient context through.
fn inherit(json: &mut Bem, block: Option<String>, mods: Option<Mods>) -> (Option<String>, Option<Mods>) {
    if json.elem.is_some() {
        if json.block.is_none() {
            json.block = block.clone();
        }
        if json.elem_mods.is_none() {
            json.elem_mods = Some(json.mods.take().unwrap_or_default());
        }
        if json.mods.is_none() {
            json.mods = mods.clone();
        }
    } else if json.block.is_some() {
        json.mods.get_or_insert_with(Map::new);
    }
    scope(json, block, mods)
}

/// The context a node's content inherits: the node's own block and block
/// modifiers, or the ambient ones for a node with neither block nor elem.
fn scope(json: &Bem, block: Option<String>, mods: Option<Mods>) -> (Option<String>, Option<Mods>) {
    if json.elem.is_some() || json.block.is_some() { (json.block.clone(), json.mods.clone()) } else { (block, mods) }
}
