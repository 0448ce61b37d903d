use std::collections::HashMap;

use super::dom::{Dom, NodeId};
use super::{Error, Result};

pub(crate) fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();

    let mut stack = vec![dom.root()];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            let end = find_subslice(bytes, i + 4, b"-->")
                .ok_or_else(|| Error::HtmlParse("unclosed HTML comment".into()))?;
            let parent = current_parent(&stack)?;
            let body = html.get(i + 4..end).unwrap_or_default();
            dom.create_comment_in(parent, body.to_string());
            i = end + 3;
            continue;
        }

        if starts_with_at(bytes, i, b"<!") {
            // Doctype and other markup declarations carry no nodes.
            let end = find_subslice(bytes, i + 2, b">")
                .ok_or_else(|| Error::HtmlParse("unclosed markup declaration".into()))?;
            i = end + 1;
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(|b| *b == b'/' || is_tag_char(*b)) {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                // Only unwind when the tag is actually open.
                let open = stack
                    .iter()
                    .skip(1)
                    .any(|node| dom.tag_name(*node) == Some(tag.as_str()));
                if open {
                    while stack.len() > 1 {
                        let top = current_parent(&stack)?;
                        stack.pop();
                        if dom.tag_name(top) == Some(tag.as_str()) {
                            break;
                        }
                    }
                }
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let parent = current_parent(&stack)?;
            let node = dom.create_element_in(parent, tag.clone(), attrs);

            if is_raw_text_tag(&tag) && !self_closing {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                if let Some(body) = html.get(i..close) {
                    if !body.is_empty() {
                        dom.create_text_in(node, body.to_string());
                    }
                }
                let (_, after_end) = parse_end_tag(html, close)?;
                i = after_end;
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = current_parent(&stack)?;
                dom.create_text_in(parent, text.to_string());
            }
        }
    }

    Ok(dom)
}

fn current_parent(stack: &[NodeId]) -> Result<NodeId> {
    stack
        .last()
        .copied()
        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse(format!("unclosed start tag <{tag}>")));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' {
            if bytes.get(i + 1) == Some(&b'>') {
                self_closing = true;
                i += 2;
                break;
            }
            i += 1;
            continue;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse(format!(
                "invalid attribute name in <{tag}>"
            )));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            String::new()
        };

        attrs.entry(name).or_insert(value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        return Ok(value);
    }

    let start = *i;
    while *i < bytes.len()
        && !bytes[*i].is_ascii_whitespace()
        && bytes[*i] != b'>'
        && !(bytes[*i] == b'/' && *i + 1 < bytes.len() && bytes[*i + 1] == b'>')
    {
        *i += 1;
    }

    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
        .to_string();
    Ok(value)
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':' || b == b'.'
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea" | "title")
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes
        .get(at..at + needle.len())
        .is_some_and(|window| window == needle)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut needle = Vec::new();
    needle.extend_from_slice(b"</");
    needle.extend(tag.iter().map(|b| b.to_ascii_lowercase()));

    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if bytes[i..i + needle.len()]
            .iter()
            .zip(&needle)
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
        {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_media_markup() -> Result<()> {
        let dom = parse_html(
            r#"<figure class="hero"><div><IMG SRC="a.png" alt=x></div><figcaption>Cap</figcaption></figure>"#,
        )?;
        let nodes = dom.all_element_nodes();
        let tags = nodes
            .iter()
            .filter_map(|node| dom.tag_name(*node))
            .collect::<Vec<_>>();
        assert_eq!(tags, vec!["figure", "div", "img", "figcaption"]);
        assert_eq!(dom.attr(nodes[2], "src"), Some("a.png"));
        assert_eq!(dom.attr(nodes[2], "alt"), Some("x"));
        Ok(())
    }

    #[test]
    fn keeps_comments_and_text_as_non_element_children() -> Result<()> {
        let dom = parse_html("<div>hello<!-- c --><span></span></div>")?;
        let div = dom.all_element_nodes()[0];
        assert_eq!(dom.children(div).len(), 3);
        assert_eq!(dom.element_children(div).count(), 1);
        Ok(())
    }

    #[test]
    fn svg_children_nest_under_svg_root() -> Result<()> {
        let dom = parse_html(
            r#"<svg viewBox="0 0 10 10"><g><path d="M0 0L1 1"/><circle r="2"/></g></svg>"#,
        )?;
        let nodes = dom.all_element_nodes();
        let tags = nodes
            .iter()
            .filter_map(|node| dom.tag_name(*node))
            .collect::<Vec<_>>();
        assert_eq!(tags, vec!["svg", "g", "path", "circle"]);
        assert_eq!(dom.parent(nodes[3]), Some(nodes[1]));
        assert_eq!(dom.attr(nodes[0], "viewbox"), Some("0 0 10 10"));
        Ok(())
    }

    #[test]
    fn script_and_style_bodies_are_raw_text() -> Result<()> {
        let dom = parse_html("<style>img > b { x: 1 }</style><script>if (a<b) {}</script><p></p>")?;
        let tags = dom
            .all_element_nodes()
            .iter()
            .filter_map(|node| dom.tag_name(*node).map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(tags, vec!["style", "script", "p"]);
        Ok(())
    }

    #[test]
    fn stray_end_tags_do_not_close_open_elements() -> Result<()> {
        let dom = parse_html("<div id='a'></span><img></div>")?;
        let nodes = dom.all_element_nodes();
        assert_eq!(dom.parent(nodes[1]), Some(nodes[0]));
        Ok(())
    }

    #[test]
    fn doctype_is_skipped() -> Result<()> {
        let dom = parse_html("<!DOCTYPE html><html><body><video></video></body></html>")?;
        assert_eq!(dom.all_element_nodes().len(), 3);
        Ok(())
    }

    #[test]
    fn reports_unclosed_constructs() {
        assert_eq!(
            parse_html("<div><!-- open").err(),
            Some(Error::HtmlParse("unclosed HTML comment".into()))
        );
        assert!(matches!(
            parse_html("<img src='a.png'"),
            Err(Error::HtmlParse(_))
        ));
        assert!(matches!(
            parse_html("<img src='a.png>"),
            Err(Error::HtmlParse(_))
        ));
    }

    #[test]
    fn lone_angle_bracket_is_text() -> Result<()> {
        let dom = parse_html("<p>1 < 2</p>")?;
        let p = dom.all_element_nodes()[0];
        assert_eq!(dom.element_children(p).count(), 0);
        assert_eq!(dom.dump_node(dom.root()), "<p>1 < 2</p>");
        Ok(())
    }
}
