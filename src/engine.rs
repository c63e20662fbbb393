//! Rule matching and tree expansion.
//!
//! This module is the engine behind [`Engine`](crate::Engine): it turns the
//! registered rules into a dispatch index and runs that index over a tree
//! until nothing changes anymore.
//!
//! ## How the parts work together
//!
//! ```text
//! register_rule(selector, f) ─┐
//!                             │  Selector::from_str          (selector.rs)
//!                             └─ Registry                     (registry.rs)
//!                                    │
//!                                    │ CompiledMatcher::new  (compiled_rules.rs)
//!                                    v   built lazily, dropped on change
//! tree ── Expander::run ─────── dispatch per node            (expander.rs)
//!           - FIFO queue of slots           │
//!           - ambient block context         v
//!           - loop guard               rule(&mut Ctx)        (context.rs)
//!                                        - edit the node
//!                                        - or return a replacement
//!                                    │
//!                                    v
//!                              expanded tree ── Html        (html.rs)
//! ```
//!
//! A replacement goes back into the same slot and is dispatched again. The
//! per-node fired-rule guard keeps a rule from firing twice on a node (or on a
//! copy of it), which is what makes "return a modified clone" terminate.
//!
//! ## Responsibilities by module
//!
//! - `selector.rs`: parses and validates selector strings.
//! - `registry.rs`: ordered rule storage; rule ids.
//! - `compiled_rules.rs`: block/elem index and the dispatch loop.
//! - `context.rs`: the [`Ctx`] API rules are written against.
//! - `expander.rs`: queue-driven traversal, context inheritance, loop guard.
//! - `metrics.rs`: counters and timings for verbose renders.
//!
//! ## Debugging
//!
//! The engine logs through `tracing`: compile and expansion summaries at
//! `debug`, every fired rule and replacement at `trace`, aborted runs at `warn`.

#[path = "engine/compiled_rules.rs"]
mod compiled_rules;
#[path = "engine/context.rs"]
mod context;
#[path = "engine/expander.rs"]
mod expander;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/registry.rs"]
mod registry;
#[path = "engine/selector.rs"]
mod selector;


pub(crate) use compiled_rules::CompiledMatcher;
pub use context::Ctx;
pub(crate) use expander::Expander;
pub use metrics::{ExpandMetrics, RenderMetrics, RuleFire};
pub(crate) use registry::{Registry, Scope};
pub use registry::{Transform, transform};
