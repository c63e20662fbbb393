use super::*;
use crate::bemjson;
use rstest::rstest;
use serde_json::json;

fn html(tree: Value) -> String {
    let options = Options::default();
    Html::new(&options).render(&Node::from(tree))
}

#[rstest]
#[case(json!([false, null, [], "", { "content": false }, { "tag": false }]), "<div></div>")]
#[case(json!("<a>&nbsp;</a>"), "&lt;a&gt;&amp;nbsp;&lt;/a&gt;")]
#[case(
    json!({ "content": ["<&>", { "content": "<&>", "tag": false }, { "content": "<&>" }] }),
    "<div>&lt;&amp;&gt;&lt;&amp;&gt;<div>&lt;&amp;&gt;</div></div>"
)]
#[case(json!({ "content": "<br/>", "html": "<hr/>" }), "<div><hr/></div>")]
#[case(json!({ "tag": "", "content": "<br/>", "html": "<hr/>" }), "<hr/>")]
#[case(json!({ "html": "", "content": "text" }), "<div>text</div>")]
#[case(json!([true, 0, 1.5]), "true01.5")]
#[case(json!([1.0, -2.0, 2.25]), "1-22.25")]
fn content(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(json!({}), "<div></div>")]
#[case(json!({ "tag": "span" }), "<span></span>")]
#[case(json!({ "tag": "br" }), "<br/>")]
#[case(json!({ "tag": "img", "content": "ignored" }), "<img/>")]
#[case(json!({ "tag": false, "content": "label" }), "label")]
fn tags(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(json!({ "block": "button", "bem": false }), "<div></div>")]
#[case(json!({ "block": "button", "js": true, "bem": false }), "<div></div>")]
#[case(json!({ "block": "button", "mix": { "block": "link", "bem": false } }), "<div class=\"button\"></div>")]
#[case(json!({ "block": "button", "mix": { "block": "link", "js": true, "bem": false } }), "<div class=\"button\"></div>")]
#[case(json!({ "block": "button", "bem": false, "cls": "raw" }), "<div class=\"raw\"></div>")]
fn bem_switch(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(json!({ "block": "button", "attrs": { "href": null } }), "<div class=\"button\"></div>")]
#[case(json!({ "block": "button", "attrs": { "href": "" } }), "<div class=\"button\" href=\"\"></div>")]
#[case(json!({ "block": "button", "attrs": { "disabled": true } }), "<div class=\"button\" disabled></div>")]
#[case(json!({ "block": "button", "attrs": { "hidden": false, "tabindex": 0 } }), "<div class=\"button\" tabindex=\"0\"></div>")]
#[case(json!({ "block": "button", "attrs": { "width": 2.0 } }), "<div class=\"button\" width=\"2\"></div>")]
#[case(
    json!({
        "tag": "a",
        "attrs": { "href": "<script type=\"javascript\">window && alert(document.cookie)</script>" },
        "content": "link"
    }),
    "<a href=\"<script type=&quot;javascript&quot;>window &amp;&amp; alert(document.cookie)</script>\">link</a>"
)]
fn attrs(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(json!({ "block": "button", "mods": { "type": null } }), "<div class=\"button\"></div>")]
#[case(json!({ "block": "button", "mods": { "type": "" } }), "<div class=\"button\"></div>")]
#[case(json!({ "block": "button", "mods": { "disabled": true } }), "<div class=\"button button_disabled\"></div>")]
#[case(json!({ "block": "button", "mods": { "zero": 0 } }), "<div class=\"button button_zero_0\"></div>")]
#[case(json!({ "block": "button", "mods": { "size": 1.0 } }), "<div class=\"button button_size_1\"></div>")]
#[case(json!({ "block": "button", "mods": { "off": false } }), "<div class=\"button\"></div>")]
#[case(
    json!({ "block": "button", "mods": { "disabled": true, "theme": "normal" } }),
    "<div class=\"button button_disabled button_theme_normal\"></div>"
)]
#[case(
    json!({ "block": "menu", "elem": "item", "mods": { "size": "l" }, "elemMods": { "state": "on" } }),
    "<div class=\"menu__item menu__item_state_on\"></div>"
)]
fn mods(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(json!({ "block": "button", "mix": [null, null] }), "<div class=\"button\"></div>")]
#[case(json!({ "mix": { "elem": "button" } }), "<div></div>")]
#[case(json!({ "block": "button", "mix": { "elem": "mix" } }), "<div class=\"button button__mix\"></div>")]
#[case(
    json!({ "block": "button", "mix": { "elem": "control", "mods": { "disabled": true } } }),
    "<div class=\"button button__control button__control_disabled\"></div>"
)]
#[case(
    json!({ "block": "button", "mix": { "elem": "control", "elemMods": { "disabled": true } } }),
    "<div class=\"button button__control button__control_disabled\"></div>"
)]
#[case(
    json!({
        "block": "button",
        "mix": [
            { "block": "link" },
            { "elem": "control" },
            { "mods": { "disabled": true } },
            { "block": "label", "elem": "first", "mods": { "color": "red" } }
        ]
    }),
    "<div class=\"button link button__control button_disabled label__first label__first_color_red\"></div>"
)]
fn mixes(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[rstest]
#[case(
    json!({ "block": "button", "js": true, "content": "submit" }),
    "<div class=\"button i-bem\" onclick='return {\"button\":{}}'>submit</div>"
)]
#[case(
    json!({ "block": "button", "elem": "box", "content": "submit", "mix": { "block": "icon", "js": true } }),
    "<div class=\"button__box icon i-bem\" onclick='return {\"icon\":{}}'>submit</div>"
)]
#[case(
    json!({
        "block": "button",
        "mix": [{ "block": "link", "js": true }, { "elem": "control", "js": { "foo": "bar" } }]
    }),
    "<div class=\"button link button__control i-bem\" onclick='return {\"link\":{},\"button__control\":{\"foo\":\"bar\"}}'></div>"
)]
#[case(
    json!({ "block": "form", "js": { "url": "/q?a=1&b='x'" } }),
    "<div class=\"form i-bem\" onclick='return {\"form\":{\"url\":\"/q?a=1&amp;b=&#39;x&#39;\"}}'></div>"
)]
#[case(
    json!({ "block": "form", "js": true, "jsAttr": "data-bem" }),
    "<div class=\"form i-bem\" data-bem='return {\"form\":{}}'></div>"
)]
#[case(json!({ "block": "form", "js": false }), "<div class=\"form\"></div>")]
fn behavior(#[case] tree: Value, #[case] expected: &str) {
    assert_eq!(html(tree), expected);
}

#[test]
fn cls_is_trimmed_and_escaped() {
    assert_eq!(html(json!({ "cls": "clearfix" })), "<div class=\"clearfix\"></div>");
    assert_eq!(html(json!({ "block": "b", "cls": "  a\"b  " })), "<div class=\"b a&quot;b\"></div>");
    assert_eq!(html(json!({ "cls": "   " })), "<div></div>");
}

#[test]
fn render_hook_replaces_node_output() {
    let doctype = Bem::from(json!({ "block": "doctype", "mods": { "type": "html" } })).with_renderer(|json, _| {
        let kind = json.mods.as_ref()?.get("type")?.as_str()?;
        Some(format!("<!DOCTYPE {kind}>"))
    });
    let tree = Node::List(vec![doctype.into(), bemjson!({ "block": "page" })]);
    let options = Options::default();

    assert_eq!(Html::new(&options).render(&tree), "<!DOCTYPE html><div class=\"page\"></div>");
}

#[test]
fn render_hook_can_serialize_fragments() {
    let wrapper = Bem::from(json!({ "content": { "block": "inner" } }))
        .with_renderer(|json, html| Some(format!("<!--{}-->", html.fragment(json.content.as_ref()?))));
    let options = Options::default();

    assert_eq!(Html::new(&options).render(&wrapper.into()), "<!--<div class=\"inner\"></div>-->");
}

#[test]
fn options_change_the_markup() {
    let mut options = Options::default();
    options.set(RenderFlags::ESCAPE_TEXT, false);
    options.set(RenderFlags::JS_CALL_WRAPPED, false);
    options.set(RenderFlags::NO_BASE_MODS, true);
    options.set(RenderFlags::INIT_CLASS_ON_ELEMS, false);
    options.js_attr_name = "data-bem".to_string();
    options.elem_delimiter = "-".to_string();
    options.mod_delimiter = "--".to_string();

    let tree = Node::from(json!([
        { "block": "b", "mods": { "m": "v" }, "js": true, "content": "<i>" },
        { "block": "b", "elem": "e", "js": true }
    ]));
    assert_eq!(
        Html::new(&options).render(&tree),
        "<div class=\"b --m--v i-bem\" data-bem='{\"b\":{}}'><i></div><div class=\"b-e\" data-bem='{\"b-e\":{}}'></div>"
    );
}

#[test]
fn disabled_init_class_is_omitted() {
    let mut options = Options::default();
    options.init_class = String::new();
    let tree = Node::from(json!({ "block": "b", "js": true }));

    assert_eq!(Html::new(&options).render(&tree), "<div class=\"b\" onclick='return {\"b\":{}}'></div>");
}

#[test]
fn escape_helpers() {
    assert_eq!(xml_escape("a<b>&\"'"), "a&lt;b&gt;&amp;\"'");
    assert_eq!(attr_escape("a<b>&\"'"), "a<b>&amp;&quot;'");
    assert_eq!(js_attr_escape("a<b>&\"'"), "a<b>&amp;\"&#39;");
}
