//! HTML serialization.
//!
//! [`Html`] turns an expanded tree into markup. It never fails: anything that
//! cannot be rendered meaningfully renders as nothing.
//!
//! For a structured node the output is, in order:
//!
//! ```text
//! <tag class="base mods mixes init cls" attrs behavior='params'>inner</tag>
//! ```
//!
//! - `base` is `block` or `block__elem`; modifiers add `base_name[_value]`.
//! - Mixins contribute their own base and modifier classes and behavior params.
//! - `inner` is the node's raw `html` when non-empty, otherwise its content.
//! - Tags in the self-closing set end with `/>` and drop the inner part.

use crate::{Bem, Mods, Node, Options, RenderFlags, truthy};
use serde_json::{Map, Number, Value};

pub struct Html<'o> {
    options: &'o Options,
    buf: String,
}

impl<'o> Html<'o> {
    pub fn new(options: &'o Options) -> Self {
        Html { options, buf: String::new() }
    }

    pub fn options(&self) -> &Options {
        self.options
    }

    /// Serialize `node` and return the markup.
    pub fn render(mut self, node: &Node) -> String {
        self.write(node);
        self.buf
    }

    /// Serialize a subtree with the same options. Meant for render hooks.
    pub fn fragment(&self, node: &Node) -> String {
        Html::new(self.options).render(node)
    }

    fn write(&mut self, node: &Node) {
        match node {
            Node::Null | Node::Bool(false) => {}
            Node::Bool(true) => self.write_text("true"),
            Node::Number(n) => self.write_text(&number_text(n)),
            Node::Text(text) => self.write_text(text),
            Node::List(items) => items.iter().for_each(|item| self.write(item)),
            Node::Bem(json) => self.write_node(json),
        }
    }

    fn write_text(&mut self, text: &str) {
        if self.options.has(RenderFlags::ESCAPE_TEXT) {
            self.buf.push_str(&xml_escape(text));
        } else {
            self.buf.push_str(text);
        }
    }

    fn write_node(&mut self, json: &Bem) {
        if let Some(hook) = &json.renderer {
            let out = hook.render(json, self);
            self.buf.push_str(out.as_deref().unwrap_or_default());
            return;
        }
        if json.tag.as_deref() == Some("") {
            self.write_inner(json);
            return;
        }

        let options = self.options;
        let mut attrs = render_attrs(json.attrs.as_ref());
        let mut classes = Vec::new();
        if json.bem != Some(false) {
            self.bem_classes_and_behavior(json, &mut classes, &mut attrs);
        }
        if let Some(cls) = json.cls.as_deref() {
            let cls = attr_escape(cls);
            let cls = cls.trim();
            if !cls.is_empty() {
                classes.push(cls.to_string());
            }
        }

        let tag = json.tag.as_deref().unwrap_or("div");
        self.buf.push('<');
        self.buf.push_str(tag);
        if !classes.is_empty() {
            self.buf.push_str(&format!(" class=\"{}\"", classes.join(" ")));
        }
        self.buf.push_str(&attrs);
        if options.self_closing.contains(tag) {
            self.buf.push_str("/>");
        } else {
            self.buf.push('>');
            self.write_inner(json);
            self.buf.push_str(&format!("</{tag}>"));
        }
    }

    fn write_inner(&mut self, json: &Bem) {
        match (json.html.as_deref(), &json.content) {
            (Some(html), _) if !html.is_empty() => self.buf.push_str(html),
            (_, Some(content)) => self.write(content),
            _ => {}
        }
    }

    /// Base, modifier and mixin classes plus the behavior attribute.
    fn bem_classes_and_behavior(&self, json: &Bem, classes: &mut Vec<String>, attrs: &mut String) {
        let options = self.options;
        let base = json.block.as_deref().map(|block| join_base(block, json.elem.as_deref(), &options.elem_delimiter));

        let mut params: Option<Map<String, Value>> = None;
        if let Some(base) = base.as_deref() {
            self.push_classes(classes, json, base, None);
            if let Some(js) = json.js.as_ref().filter(|js| truthy(js)) {
                params.get_or_insert_with(Map::new).insert(base.to_string(), js_params(js));
            }
        }

        let init_enabled = !options.init_class.is_empty();
        let on_elems = options.has(RenderFlags::INIT_CLASS_ON_ELEMS);
        let mut add_init = init_enabled && (on_elems || json.elem.is_none());
        let mut has_mix_js = false;

        for mix in json.mix.iter().flatten() {
            if mix.bem == Some(false) {
                continue;
            }
            let Some(mix_block) = mix.block.as_deref().or(json.block.as_deref()) else {
                continue;
            };
            let mix_elem = match (mix.elem.as_deref(), mix.block.as_deref()) {
                (Some(elem), _) => Some(elem),
                (None, Some(_)) => None,
                (None, None) => json.block.as_ref().and(json.elem.as_deref()),
            };
            let mix_base = join_base(mix_block, mix_elem, &options.elem_delimiter);
            self.push_classes(classes, mix, &mix_base, base.as_deref());

            if let Some(js) = mix.js.as_ref().filter(|js| truthy(js)) {
                params.get_or_insert_with(Map::new).insert(mix_base, js_params(js));
                has_mix_js = true;
                if !add_init {
                    add_init = init_enabled && (on_elems || mix_elem.is_none());
                }
            }
        }

        let Some(params) = params else {
            return;
        };
        if add_init {
            classes.push(options.init_class.clone());
        }
        let data = match base.as_deref() {
            Some(base) if !has_mix_js && json.js == Some(Value::Bool(true)) => format!("{{\"{base}\":{{}}}}"),
            _ => js_attr_escape(&Value::Object(params).to_string()),
        };
        let name = json.js_attr.as_deref().unwrap_or(&options.js_attr_name);
        let wrap = if options.has(RenderFlags::JS_CALL_WRAPPED) { "return " } else { "" };
        attrs.push_str(&format!(" {name}='{wrap}{data}'"));
    }

    /// Base class (unless it repeats the host's) and one class per rendered
    /// modifier.
    fn push_classes(&self, classes: &mut Vec<String>, json: &Bem, base: &str, host_base: Option<&str>) {
        if host_base != Some(base) {
            classes.push(base.to_string());
        }
        let mods = match (&json.elem, &json.elem_mods) {
            (Some(_), Some(elem_mods)) => Some(elem_mods),
            _ => json.mods.as_ref(),
        };
        let delim = &self.options.mod_delimiter;
        let nobase = self.options.has(RenderFlags::NO_BASE_MODS);
        for (name, value) in mods.into_iter().flatten() {
            if !mod_renders(value) {
                continue;
            }
            let mut class = if nobase { delim.clone() } else { format!("{base}{delim}") };
            class.push_str(name);
            if *value != Value::Bool(true) {
                class.push_str(delim);
                class.push_str(&scalar_text(value));
            }
            classes.push(class);
        }
    }
}

fn join_base(block: &str, elem: Option<&str>, elem_delimiter: &str) -> String {
    match elem {
        Some(elem) => format!("{block}{elem_delimiter}{elem}"),
        None => block.to_string(),
    }
}

/// Truthy values and the number zero produce a modifier class.
fn mod_renders(value: &Value) -> bool {
    truthy(value) || value.is_number()
}

fn js_params(js: &Value) -> Value {
    if *js == Value::Bool(true) { Value::Object(Map::new()) } else { js.clone() }
}

fn render_attrs(attrs: Option<&Mods>) -> String {
    let mut out = String::new();
    for (name, value) in attrs.into_iter().flatten() {
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => {
                out.push(' ');
                out.push_str(name);
            }
            other => {
                out.push_str(&format!(" {name}=\"{}\"", attr_escape(&scalar_text(other))));
            }
        }
    }
    out
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_text(n),
        other => other.to_string(),
    }
}

/// Whole-valued floats print without a fraction: `1.0` is `1`.
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => f.to_string(),
        _ => n.to_string(),
    }
}

fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if !special.contains(&c) {
            out.push(c);
            continue;
        }
        out.push_str(match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            '"' => "&quot;",
            _ => "&#39;",
        });
    }
    out
}

/// Escape `&`, `<` and `>` for text content.
pub fn xml_escape(text: &str) -> String {
    escape(text, &['&', '<', '>'])
}

/// Escape `&` and `"` for double-quoted attribute values.
pub fn attr_escape(text: &str) -> String {
    escape(text, &['&', '"'])
}

/// Escape `&` and `'` for the single-quoted behavior attribute.
pub fn js_attr_escape(text: &str) -> String {
    escape(text, &['&', '\''])
}

#[cfg(test)]
#[path = "html/tests.rs"]
mod tests;
