//! Namespace-agnostic lookups in SOAP responses.
//!
//! Cameras disagree on namespace prefixes (`tt:`, `tds:`, `ns0:`, none at all), so elements are
//! matched by local name only. The scanner never panics on malformed input: anything it cannot
//! make sense of is simply not found.

/// A borrowed element of a document.
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    name: &'a str,
    start_tag: &'a str,
    inner: &'a str,
}

impl<'a> Element<'a> {
    /// Local name, without namespace prefix.
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn inner(&self) -> &'a str {
        self.inner
    }

    /// Trimmed, unescaped text content.
    pub fn text(&self) -> String {
        unescape(self.inner.trim())
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        attributes(self.start_tag)
            .into_iter()
            .find(|(key, _)| local_name(key) == name)
            .map(|(_, value)| unescape(value))
    }

    pub fn children(&self) -> Vec<Element<'a>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some((element, end)) = next_element(self.inner, pos) {
            out.push(element);
            pos = end;
        }
        out
    }

    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<Element<'a>> {
        self.children().into_iter().find(|e| e.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|e| e.text())
    }

    /// Follows a `/`-separated chain of direct children, e.g. `Resolution/Width`.
    pub fn path(&self, path: &str) -> Option<Element<'a>> {
        let mut current = *self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn path_text(&self, path: &str) -> Option<String> {
        self.path(path).map(|e| e.text())
    }

    /// First descendant named `name`, at any depth.
    pub fn find(&self, name: &str) -> Option<Element<'a>> {
        find(self.inner, name)
    }
}

/// First element named `name` anywhere in `xml`, searched in document order.
pub fn find<'a>(xml: &'a str, name: &str) -> Option<Element<'a>> {
    find_all(xml, name).into_iter().next()
}

/// Every element named `name` in `xml`. Matches nested inside another match are not reported.
pub fn find_all<'a>(xml: &'a str, name: &str) -> Vec<Element<'a>> {
    let mut out = Vec::new();
    collect(xml, name, &mut out);
    out
}

fn collect<'a>(xml: &'a str, name: &str, out: &mut Vec<Element<'a>>) {
    let mut pos = 0;
    while let Some((element, end)) = next_element(xml, pos) {
        if element.name == name {
            out.push(element);
        } else {
            collect(element.inner, name, out);
        }
        pos = end;
    }
}

fn local_name(qualified: &str) -> &str {
    match qualified.rfind(':') {
        Some(idx) => &qualified[idx + 1..],
        None => qualified,
    }
}

fn tag_name(tag: &str) -> &str {
    let end = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    &tag[..end]
}

/// Skips a comment, processing instruction, CDATA section or doctype starting at `lt`.
/// Returns the offset just past it, or `None` when `lt` does not start one.
fn skip_markup(xml: &str, lt: usize) -> Option<usize> {
    let rest = &xml[lt..];
    let terminator = if rest.starts_with("<!--") {
        "-->"
    } else if rest.starts_with("<![CDATA[") {
        "]]>"
    } else if rest.starts_with("<?") {
        "?>"
    } else if rest.starts_with("<!") {
        ">"
    } else {
        return None;
    };
    Some(match rest.find(terminator) {
        Some(idx) => lt + idx + terminator.len(),
        None => xml.len(),
    })
}

/// Next element starting at or after `from`, with the offset just past its end.
fn next_element(xml: &str, from: usize) -> Option<(Element<'_>, usize)> {
    let mut pos = from;
    loop {
        let lt = pos + xml.get(pos..)?.find('<')?;
        if let Some(next) = skip_markup(xml, lt) {
            pos = next;
            continue;
        }
        let after_lt = &xml[lt + 1..];
        if after_lt.starts_with('/') {
            // stray closing tag
            pos = lt + 1;
            continue;
        }

        let qname = tag_name(after_lt);
        if qname.is_empty() {
            pos = lt + 1;
            continue;
        }
        let gt = lt + 1 + after_lt.find('>')?;
        let start_tag = &xml[lt + 1 + qname.len()..gt];
        let name = local_name(qname);

        if start_tag.ends_with('/') {
            let element = Element {
                name,
                start_tag: &start_tag[..start_tag.len() - 1],
                inner: "",
            };
            return Some((element, gt + 1));
        }

        let content_start = gt + 1;
        let (content_end, end) = closing_tag(xml, content_start, name)?;
        let element = Element {
            name,
            start_tag,
            inner: &xml[content_start..content_end],
        };
        return Some((element, end));
    }
}

/// Finds the tag closing an element named `name` whose content starts at `from`.
/// Returns the start of the closing tag and the offset just past it.
fn closing_tag(xml: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let lt = pos + xml.get(pos..)?.find('<')?;
        if let Some(next) = skip_markup(xml, lt) {
            pos = next;
            continue;
        }
        let after_lt = &xml[lt + 1..];
        let gt = lt + 1 + after_lt.find('>')?;

        if let Some(closing) = after_lt.strip_prefix('/') {
            if local_name(tag_name(closing)) == name {
                depth -= 1;
                if depth == 0 {
                    return Some((lt, gt + 1));
                }
            }
        } else if local_name(tag_name(after_lt)) == name && !xml[..gt].ends_with('/') {
            depth += 1;
        }
        pos = gt + 1;
    }
}

fn attributes(start_tag: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut rest = start_tag;
    loop {
        rest = rest.trim_start();
        let eq = match rest.find('=') {
            Some(idx) => idx,
            None => break,
        };
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = match after.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => break,
        };
        let value_area = &after[1..];
        let close = match value_area.find(quote) {
            Some(idx) => idx,
            None => break,
        };
        out.push((key, &value_area[..close]));
        rest = &value_area[close + 1..];
    }
    out
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Escapes text for inclusion in an element or attribute value.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
