use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;

/// Sanitizer for generated notes.
///
/// Keeps the structural and inline tags the styling prompt asks for, every
/// `class` (utility classes carry the layout), and filtered inline styles.
/// Scripts, event handlers and unknown tags are dropped.
pub(crate) fn build_notes_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "article",
        "aside",
        "b",
        "blockquote",
        "br",
        "caption",
        "code",
        "col",
        "colgroup",
        "dd",
        "del",
        "details",
        "div",
        "dl",
        "dt",
        "em",
        "figcaption",
        "figure",
        "footer",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "header",
        "hr",
        "i",
        "img",
        "kbd",
        "li",
        "main",
        "mark",
        "nav",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "small",
        "span",
        "strong",
        "sub",
        "summary",
        "sup",
        "table",
        "tbody",
        "td",
        "tfoot",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
    ]);
    builder.tags(tags);

    builder.generic_attributes(HashSet::from([
        "class", "id", "title", "lang", "dir", "role", "style",
    ]));
    builder.add_generic_attribute_prefixes(&["aria-", "data-"]);

    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes("img", &["alt", "width", "height", "loading"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("col", &["span"]);
    builder.add_tag_attributes("details", &["open"]);
    builder.add_tag_attributes("ol", &["start", "type"]);

    builder.add_url_schemes(["http", "https", "mailto"].iter().copied());

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

fn sanitize_style_attribute(value: &str) -> Option<String> {
    let kept: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && is_safe_declaration(decl))
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("; "))
    }
}

fn is_safe_declaration(decl: &str) -> bool {
    const FORBIDDEN: [&str; 8] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
        "url(",
    ];

    let lower = decl.to_ascii_lowercase();
    !FORBIDDEN.iter().any(|needle| lower.contains(needle))
}
