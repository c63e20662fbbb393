//! Render metrics.
//!
//! `Engine::render` collects the expansion counters anyway (the loop guard
//! needs them); `Engine::render_verbose` additionally times each phase and
//! hands everything back in a [`RenderMetrics`].

use std::time::Duration;

// --- Metrics -----------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct RenderMetrics {
    /// Total elapsed time for [`Engine::render_verbose`](crate::Engine::render_verbose).
    pub total: Duration,
    pub expand: ExpandMetrics,
    /// Time spent producing the HTML string.
    pub serialize: Duration,
    /// Length of the produced HTML in bytes.
    pub output_bytes: usize,
}

/// Counters for one expansion run.
#[derive(Debug, Default, Clone)]
pub struct ExpandMetrics {
    pub duration: Duration,
    /// Queue slots created, the root included.
    pub slots: usize,
    /// Structured-node visits, i.e. dispatcher invocations, nested
    /// `Ctx::process` runs included.
    pub dispatches: usize,
    /// Visits that ended with the node replaced and re-queued.
    pub replacements: usize,
    /// Longest the queue got.
    pub max_queue: usize,
    /// Rules that fired at least once, in registration order.
    pub fired: Vec<RuleFire>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFire {
    /// Selector, `$before` or `$after`.
    pub rule: String,
    pub count: usize,
}
