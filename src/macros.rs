/// Compile a regex literal once and hand out a `&'static Regex`.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).expect("regex literal"));
        &*RE
    }};
}

/// Build a [`Node`](crate::Node) from JSON-like syntax.
///
/// ```
/// let tree = bh::bemjson!({ "block": "button", "mods": { "disabled": true } });
/// assert!(tree.as_bem().is_some());
/// ```
#[macro_export]
macro_rules! bemjson {
    ($($json:tt)+) => {
        $crate::Node::from($crate::__serde_json::json!($($json)+))
    };
}
