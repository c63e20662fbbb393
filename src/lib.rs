extern crate self as bh;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod html;

pub use api::{Engine, Options, RenderFlags, RenderReport, RuleOrder};
pub use engine::{Ctx, ExpandMetrics, RenderMetrics, RuleFire, Transform, transform};
pub use error::{ConfigError, Error, RenderError};
pub use html::{Html, attr_escape, js_attr_escape, xml_escape};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Modifier (and attribute) map. Insertion order is preserved, and it is the
/// order in which modifier classes and attributes are emitted.
pub type Mods = Map<String, Value>;

// --- Node model --------------------------------------------------------------

/// A BEMJSON value: a scalar, an ordered sequence, or a structured node.
///
/// `Null`, `Bool(false)` and the empty string render to nothing. Everything
/// else renders as text, and `Bool(true)` renders as the word `true`.
#[derive(Debug, Clone, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<Node>),
    Bem(Box<Bem>),
}

impl Node {
    /// `true` for sequences and structured nodes: the values the expander
    /// descends into.
    pub fn is_structured(&self) -> bool {
        matches!(self, Node::List(_) | Node::Bem(_))
    }

    /// `true` for scalars and null.
    pub fn is_simple(&self) -> bool {
        !self.is_structured()
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Node::Null => false,
            Node::Bool(b) => *b,
            Node::Number(n) => n.as_f64() != Some(0.0),
            Node::Text(s) => !s.is_empty(),
            Node::List(_) | Node::Bem(_) => true,
        }
    }

    pub fn as_bem(&self) -> Option<&Bem> {
        match self {
            Node::Bem(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_bem_mut(&mut self) -> Option<&mut Bem> {
        match self {
            Node::Bem(json) => Some(json),
            _ => None,
        }
    }

    /// Convert back to plain JSON. Render hooks have no JSON form and are dropped.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::Text(s) => Value::String(s.clone()),
            Node::List(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Bem(json) => json.to_value(),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::Text(s),
            Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Bem(Box::new(Bem::from_map(map))),
        }
    }
}

impl From<Bem> for Node {
    fn from(json: Bem) -> Self {
        Node::Bem(Box::new(json))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::List(items)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Text(text)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from)
    }
}

/// A structured BEMJSON node.
///
/// Every field is optional. Fields the engine does not know about are kept in
/// `params` and are reachable from rules through [`Ctx::param`].
#[derive(Debug, Clone, Default)]
pub struct Bem {
    /// `None` renders as `div`; `Some("")` suppresses the wrapping element.
    pub tag: Option<String>,
    pub block: Option<String>,
    pub elem: Option<String>,
    pub mods: Option<Mods>,
    pub elem_mods: Option<Mods>,
    pub mix: Option<Vec<Bem>>,
    pub attrs: Option<Mods>,
    pub content: Option<Node>,
    /// Raw markup, preferred over `content` when non-empty.
    pub html: Option<String>,
    pub js: Option<Value>,
    /// Overrides the configured behavior attribute name for this node.
    pub js_attr: Option<String>,
    pub cls: Option<String>,
    /// `Some(false)` turns off class and behavior computation.
    pub bem: Option<bool>,
    pub params: Map<String, Value>,
    pub renderer: Option<RenderHook>,
    pub(crate) state: NodeState,
}

impl Bem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node from a JSON object, routing known BEMJSON keys to fields.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut json = Bem::default();
        for (key, value) in map {
            json.set_field(&key, value);
        }
        json
    }

    /// Attach a custom serializer that replaces default rendering of this node.
    pub fn with_renderer<F>(mut self, render: F) -> Self
    where
        F: Fn(&Bem, &Html<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.renderer = Some(RenderHook(Arc::new(render)));
        self
    }

    /// Read a field by its BEMJSON key.
    pub fn field(&self, key: &str) -> Option<Value> {
        let string = |s: &Option<String>| s.clone().map(Value::String);
        let map = |m: &Option<Mods>| m.clone().map(Value::Object);
        match key {
            "tag" => string(&self.tag),
            "block" => string(&self.block),
            "elem" => string(&self.elem),
            "mods" => map(&self.mods),
            "elemMods" => map(&self.elem_mods),
            "attrs" => map(&self.attrs),
            "mix" => self.mix.as_ref().map(|mix| Value::Array(mix.iter().map(Bem::to_value).collect())),
            "content" => self.content.as_ref().map(Node::to_value),
            "html" => string(&self.html),
            "js" => self.js.clone(),
            "jsAttr" => string(&self.js_attr),
            "cls" => string(&self.cls),
            "bem" => self.bem.map(Value::Bool),
            other => self.params.get(other).cloned(),
        }
    }

    /// Write a field by its BEMJSON key, normalizing the value the same way
    /// input trees are normalized.
    pub fn set_field(&mut self, key: &str, value: Value) {
        match key {
            "tag" => self.tag = Some(tag_name(value)),
            "block" => self.block = name(value),
            "elem" => self.elem = name(value),
            "mods" => self.mods = object(value),
            "elemMods" => self.elem_mods = object(value),
            "attrs" => self.attrs = object(value),
            "mix" => self.mix = Some(Bem::mixes(Node::from(value))),
            "content" => self.content = Some(Node::from(value)),
            "html" => self.html = text(value),
            "js" => self.js = Some(value).filter(|v| !v.is_null()),
            "jsAttr" => self.js_attr = text(value),
            "cls" => self.cls = text(value),
            "bem" => self.bem = value.as_bool(),
            other => {
                self.params.insert(other.to_string(), value);
            }
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for key in ["tag", "block", "elem", "mods", "elemMods", "mix", "attrs", "content", "html", "js", "jsAttr", "cls", "bem"]
        {
            if let Some(value) = self.field(key) {
                out.insert(key.to_string(), value);
            }
        }
        out.extend(self.params.clone());
        Value::Object(out)
    }

    /// Normalize a `mix` value: a single mixin or a sequence of them. Scalars
    /// and nulls inside the sequence are dropped.
    pub fn mixes(value: Node) -> Vec<Bem> {
        match value {
            Node::Bem(json) => vec![*json],
            Node::List(items) => items.into_iter().flat_map(Bem::mixes).collect(),
            _ => Vec::new(),
        }
    }

    /// `block` or `block<delim>elem`, used in loop diagnostics.
    pub(crate) fn path(&self, elem_delimiter: &str) -> String {
        let block = self.block.as_deref().unwrap_or_default();
        match self.elem.as_deref() {
            Some(elem) => format!("{block}{elem_delimiter}{elem}"),
            None => block.to_string(),
        }
    }
}

impl From<Value> for Bem {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Bem::from_map(map),
            _ => Bem::default(),
        }
    }
}

fn name(value: Value) -> Option<String> {
    text(value).filter(|s| !s.is_empty())
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn tag_name(value: Value) -> String {
    if truthy(&value) { text(value).unwrap_or_default() } else { String::new() }
}

fn object(value: Value) -> Option<Mods> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// JSON truthiness: null, `false`, `0` and `""` are falsy.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// --- Render hooks ------------------------------------------------------------

/// Custom serialization for a single node. The returned string is emitted
/// verbatim; `None` emits nothing.
pub trait NodeRenderer: Send + Sync {
    fn render(&self, node: &Bem, html: &Html<'_>) -> Option<String>;
}

impl<F> NodeRenderer for F
where
    F: Fn(&Bem, &Html<'_>) -> Option<String> + Send + Sync,
{
    fn render(&self, node: &Bem, html: &Html<'_>) -> Option<String> {
        self(node, html)
    }
}

#[derive(Clone)]
pub struct RenderHook(Arc<dyn NodeRenderer>);

impl RenderHook {
    pub fn new(renderer: impl NodeRenderer + 'static) -> Self {
        RenderHook(Arc::new(renderer))
    }

    pub(crate) fn render(&self, node: &Bem, html: &Html<'_>) -> Option<String> {
        self.0.render(node, html)
    }
}

impl fmt::Debug for RenderHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderHook(<function>)")
    }
}

// --- Per-node engine state ---------------------------------------------------

/// Bookkeeping the engine attaches to a node while expanding it. Cloning a
/// node clones this too, so a rule returning a copy of its own node stays
/// guarded against re-firing.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeState {
    pub fired: FiredRules,
    pub stopped: bool,
}

/// One bit per rule id, set once that rule fired on the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FiredRules {
    words: Vec<u64>,
}

impl FiredRules {
    pub fn contains(&self, id: usize) -> bool {
        self.words.get(id / 64).is_some_and(|word| word & (1u64 << (id % 64)) != 0)
    }

    pub fn insert(&mut self, id: usize) {
        let word = id / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (id % 64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_keys_become_fields_and_the_rest_params() {
        let node = Node::from(json!({
            "block": "search",
            "elem": "",
            "tag": false,
            "mods": { "theme": "dark" },
            "mix": { "block": "form" },
            "action": "/find",
        }));
        let json = node.as_bem().unwrap();

        assert_eq!(json.block.as_deref(), Some("search"));
        assert_eq!(json.elem, None);
        assert_eq!(json.tag.as_deref(), Some(""));
        assert_eq!(json.mods.as_ref().unwrap()["theme"], json!("dark"));
        assert_eq!(json.mix.as_ref().map(Vec::len), Some(1));
        assert_eq!(json.params["action"], json!("/find"));
        assert_eq!(json.field("action"), Some(json!("/find")));
    }

    #[test]
    fn mix_sequences_drop_non_nodes() {
        let mixes = Bem::mixes(Node::from(json!([null, { "block": "a" }, [{ "block": "b" }], "x"])));
        let blocks: Vec<_> = mixes.iter().map(|m| m.block.clone().unwrap()).collect();
        assert_eq!(blocks, ["a", "b"]);
    }

    #[test]
    fn truthiness_matches_json_conventions() {
        let cases = [
            (json!(null), false),
            (json!(false), false),
            (json!(0), false),
            (json!(""), false),
            (json!(true), true),
            (json!(1), true),
            (json!("0"), true),
            (json!({}), true),
            (json!([]), true),
        ];
        for (value, expected) in cases {
            assert_eq!(truthy(&value), expected, "{value}");
            assert_eq!(Node::from(value).is_truthy(), expected);
        }
    }

    #[test]
    fn fired_rules_grow_on_demand() {
        let mut fired = FiredRules::default();
        assert!(!fired.contains(130));
        fired.insert(130);
        fired.insert(3);
        assert!(fired.contains(130));
        assert!(fired.contains(3));
        assert!(!fired.contains(4));
    }

    #[test]
    fn value_round_trip_keeps_params() {
        let source = json!({ "block": "b", "content": ["x", { "elem": "e" }], "url": "/u" });
        let back = Node::from(source.clone()).to_value();
        assert_eq!(back["block"], source["block"]);
        assert_eq!(back["url"], source["url"]);
        assert_eq!(back["content"][1]["elem"], json!("e"));
    }
}
