//! Error taxonomy.
//!
//! Two families of failures exist, and they never mix:
//!
//! - [`ConfigError`]: raised while the engine is being set up (registering a
//!   rule with an unparsable selector, patching options with a wrongly typed
//!   value). The call that failed has no effect; earlier registrations stay.
//! - [`RenderError`]: raised while a render is running. The only fatal
//!   condition is the loop guard, and it aborts the whole call with no output.
//!
//! Malformed-but-well-formed input trees are not errors: unknown fields end up
//! as params and sparse nodes render as a bare default element.

/// Errors reported at registration/configuration time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The selector does not have one of the accepted shapes
    /// (`block`, `block_mod[_val]`, `block__elem`, `block[_mod[_val]]__elem[_mod[_val]]`).
    #[error("invalid selector \"{selector}\": {reason}")]
    InvalidSelector { selector: String, reason: &'static str },

    /// A recognized option carried a value of the wrong JSON type.
    #[error("invalid options: {0}")]
    Options(#[from] serde_json::Error),
}

/// Errors that abort a render call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// A single queue slot was dispatched more often than the per-node limit.
    #[error("Infinite json loop detected at \"{path}\" ({visits} visits).")]
    NodeLoop { path: String, visits: usize },

    /// The dispatcher ran more often than the per-render limit.
    #[error("Infinite matcher loop detected at \"{path}\" ({dispatches} dispatches).")]
    MatcherLoop { path: String, dispatches: usize },
}

/// Umbrella error for the string-in/string-out entry points.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid BEMJSON: {0}")]
    Json(#[from] serde_json::Error),
}
