//! Minimal AppStream metadata extraction: identity derivation needs nothing
//! but the `<component><id>` text.
//!
//! Reference: <https://www.freedesktop.org/wiki/Distributions/AppStream/>

/// Extract the text of the first `<id>` element inside `<component>`.
/// Attributes on either tag are tolerated. Returns None when the document
/// has no component id or the id is empty.
pub fn component_id(xml: &str) -> Option<String> {
    let component = element_body(xml, "component")?;
    let id = element_body(component, "id")?;
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// The body of the first `<name ...>` element, exclusive of its end tag.
fn element_body<'a>(doc: &'a str, name: &str) -> Option<&'a str> {
    let mut search = doc;
    loop {
        let at = search.find(&format!("<{name}"))?;
        let after_tag = &search[at + name.len() + 1..];
        // Reject partial matches like <idiom> for <id>.
        match after_tag.chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r') | Some('/') => {}
            _ => {
                search = after_tag;
                continue;
            }
        }
        let body_start = after_tag.find('>')?;
        if after_tag[..body_start].ends_with('/') {
            // Self-closing; no body.
            return None;
        }
        let body = &after_tag[body_start + 1..];
        let end = body.find(&format!("</{name}"))?;
        return Some(&body[..end]);
    }
}
