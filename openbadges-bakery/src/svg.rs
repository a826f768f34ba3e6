use once_cell::sync::Lazy;
use regex::Regex;

use crate::{BakeError, Result};

const NAMESPACE: &str = "http://openbadges.org";

static SVG_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<svg\b[^>]*>").expect("valid svg root pattern"));

// The body is either CDATA sections, which may hold any text including a
// closing tag, or character data without markup.
static ASSERTION_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?s)\s*<openbadges:assertion\b(?P<attrs>[^>]*?)",
        r"(?:/>|>(?P<body>(?:\s*<!\[CDATA\[.*?\]\]>)+\s*|[^<]*)</openbadges:assertion>)",
    ))
    .expect("valid assertion element pattern")
});

static VERIFY_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"verify\s*=\s*"(?P<url>[^"]*)""#).expect("valid verify pattern"));

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Wraps text in a CDATA section, splitting any `]]>` sequence it contains.
fn cdata(text: &str) -> String {
    format!("<![CDATA[\n{}\n]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

fn uncdata(body: &str) -> String {
    let body = body.trim();
    match body
        .strip_prefix("<![CDATA[")
        .and_then(|b| b.strip_suffix("]]>"))
    {
        Some(inner) => inner.replace("]]]]><![CDATA[>", "]]>").trim().to_owned(),
        None => unescape_attr(body),
    }
}

pub fn strip(svg: &str) -> String {
    ASSERTION_ELEMENT.replace_all(svg, "").into_owned()
}

pub fn bake(svg: &str, assertion: &str, verify_url: Option<&str>) -> Result<String> {
    let svg = strip(svg);

    let root = SVG_ROOT
        .find(&svg)
        .ok_or_else(|| BakeError::Malformed("no <svg> root element".to_owned()))?;
    let root_tag = root.as_str();
    if root_tag.ends_with("/>") {
        return Err(BakeError::Malformed("empty <svg/> root element".to_owned()));
    }

    let root_tag = if root_tag.contains("xmlns:openbadges") {
        root_tag.to_owned()
    } else {
        let open = &root_tag[..root_tag.len() - 1];
        format!(r#"{open} xmlns:openbadges="{NAMESPACE}">"#)
    };

    let verify = verify_url
        .map(|url| format!(r#" verify="{}""#, escape_attr(url)))
        .unwrap_or_default();
    let element = format!(
        "\n<openbadges:assertion{verify}>{}</openbadges:assertion>",
        cdata(assertion)
    );

    let mut out = String::with_capacity(svg.len() + element.len() + 64);
    out.push_str(&svg[..root.start()]);
    out.push_str(&root_tag);
    out.push_str(&element);
    out.push_str(&svg[root.end()..]);

    Ok(out)
}

/// Returns the embedded assertion text, or the `verify` URL when the element
/// carries no inline assertion.
pub fn unbake(svg: &str) -> Result<Option<String>> {
    let Some(captures) = ASSERTION_ELEMENT.captures(svg) else {
        return Ok(None);
    };

    let body = captures
        .name("body")
        .map(|m| uncdata(m.as_str()))
        .unwrap_or_default();
    if !body.is_empty() {
        return Ok(Some(body));
    }

    let verify = captures
        .name("attrs")
        .and_then(|attrs| VERIFY_ATTR.captures(attrs.as_str()))
        .and_then(|c| c.name("url"))
        .map(|url| unescape_attr(url.as_str()));

    Ok(verify)
}
