//! The CSS-selector subset understood by the page model.
//!
//! Supported: type / `*`, `#id`, `.class`, `[attr]`, `[attr="value"]`,
//! `:nth-child(n)`, joined by the child (`>`) or descendant (whitespace)
//! combinator. This covers everything the selector synthesizer emits plus the
//! hand-written selectors stored on older anchors.

use crate::dom::{Document, NodeId, MAX_ANCESTOR_DEPTH};
use crate::error::SelectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
    nth_child: Option<usize>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_child.is_none()
    }

    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let node = doc.node(id);
        if let Some(tag) = &self.tag {
            if tag != "*" && *tag != node.tag {
                return false;
            }
        }
        if let Some(want) = &self.id {
            if node.attr("id") != Some(want.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| node.has_class(c)) {
            return false;
        }
        for (name, value) in &self.attrs {
            match (node.attr(name), value) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        if let Some(n) = self.nth_child {
            if doc.nth_child(id) != n {
                return false;
            }
        }
        true
    }
}

/// A parsed selector, ready to be matched against a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    // The combinator on the first step is unused.
    steps: Vec<(Combinator, Compound)>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        match self.steps.len() {
            0 => false,
            len => self.matches_step(doc, id, len - 1),
        }
    }

    fn matches_step(&self, doc: &Document, id: NodeId, step: usize) -> bool {
        let (combinator, compound) = &self.steps[step];
        if !compound.matches(doc, id) {
            return false;
        }
        if step == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => doc
                .parent(id)
                .is_some_and(|parent| self.matches_step(doc, parent, step - 1)),
            Combinator::Descendant => {
                let mut cursor = doc.parent(id);
                let mut hops = 0;
                while let Some(current) = cursor {
                    if self.matches_step(doc, current, step - 1) {
                        return true;
                    }
                    hops += 1;
                    if hops > MAX_ANCESTOR_DEPTH {
                        break;
                    }
                    cursor = doc.parent(current);
                }
                false
            }
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::new(self.input, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut steps = Vec::new();
        self.skip_ws();
        if self.peek().is_none() {
            return Err(self.error("empty selector"));
        }
        let mut combinator = Combinator::Descendant;
        loop {
            let compound = self.compound()?;
            steps.push((combinator, compound));
            let had_ws = self.skip_ws();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    combinator = Combinator::Child;
                }
                Some(_) if had_ws => combinator = Combinator::Descendant,
                Some(ch) => return Err(self.error(format!("unexpected {ch:?}"))),
            }
            if self.peek().is_none() {
                return Err(self.error("dangling combinator"));
            }
        }
        Ok(Selector { steps })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        if self.peek() == Some('*') {
            self.pos += 1;
            compound.tag = Some("*".to_string());
        } else if self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    let class = self.ident()?;
                    compound.classes.push(class);
                }
                Some('[') => {
                    self.pos += 1;
                    let attr = self.attribute()?;
                    compound.attrs.push(attr);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.nth_child = Some(self.nth_child()?);
                }
                _ => break,
            }
        }
        if compound.is_empty() {
            return Err(self.error(format!("expected a simple selector at {}", self.pos)));
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("expected identifier at {start}")));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attribute(&mut self) -> Result<(String, Option<String>), SelectorError> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let value = match self.peek() {
            Some('=') => {
                self.pos += 1;
                self.skip_ws();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => self.quoted(quote)?,
                    _ => self.ident()?,
                };
                self.skip_ws();
                Some(value)
            }
            _ => None,
        };
        if self.peek() != Some(']') {
            return Err(self.error("unterminated attribute selector"));
        }
        self.pos += 1;
        Ok((name.to_ascii_lowercase(), value))
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(ch) => out.push(ch),
                        None => return Err(self.error("dangling escape")),
                    }
                    self.pos += 1;
                }
                Some(ch) if ch == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(ch) => {
                    out.push(ch);
                    self.pos += 1;
                }
            }
        }
    }

    fn nth_child(&mut self) -> Result<usize, SelectorError> {
        let name = self.ident()?;
        if name != "nth-child" || self.peek() != Some('(') {
            return Err(self.error(format!("unsupported pseudo-class :{name}")));
        }
        self.pos += 1;
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        self.skip_ws();
        if self.peek() != Some(')') {
            return Err(self.error("unterminated :nth-child"));
        }
        self.pos += 1;
        match digits.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(self.error(":nth-child needs a positive integer")),
        }
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

/// True when `value` can be written bare after `#` or `.`.
pub fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '-' => {}
        _ => return false,
    }
    if value.starts_with("--") || value == "-" {
        return false;
    }
    if value.starts_with('-') && value.chars().nth(1).is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    chars.all(is_ident_char)
}

/// Double-quoted CSS string literal.
pub fn css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

impl Document {
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let parsed = Selector::parse(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .filter(|id| parsed.matches(self, *id))
            .collect())
    }

    /// First match in document order.
    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        let parsed = Selector::parse(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .find(|id| parsed.matches(self, *id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_snapshot(
            serde_json::from_value(json!({
                "tag": "body",
                "children": [
                    {"tag": "nav", "attrs": {"class": "top-nav dark"}, "children": [
                        {"tag": "button", "attrs": {"data-tour-id": "add-transaction"}, "text": "Nova"},
                        {"tag": "button", "attrs": {"id": "save"}, "text": "Salvar"}
                    ]},
                    {"tag": "div", "children": [
                        {"tag": "span", "text": "a"},
                        {"tag": "button", "attrs": {"title": "say \"hi\""}, "text": "b"}
                    ]}
                ]
            }))
            .unwrap(),
        )
    }

    #[test]
    fn matches_attribute_id_and_class() {
        let doc = doc();
        let hit = doc.query_selector(r#"[data-tour-id="add-transaction"]"#).unwrap().unwrap();
        assert_eq!(doc.node(hit).text, "Nova");
        let hit = doc.query_selector("#save").unwrap().unwrap();
        assert_eq!(doc.node(hit).text, "Salvar");
        assert_eq!(doc.query_selector_all("nav.dark button").unwrap().len(), 2);
        assert_eq!(doc.query_selector_all("[title]").unwrap().len(), 1);
    }

    #[test]
    fn child_combinator_and_nth_child() {
        let doc = doc();
        let hits = doc.query_selector_all("body > div > button:nth-child(2)").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(doc.node(hits[0]).text, "b");
        assert!(doc.query_selector_all("body > button").unwrap().is_empty());
        assert_eq!(doc.query_selector_all("body button").unwrap().len(), 3);
    }

    #[test]
    fn quoted_values_round_trip_through_css_string() {
        let doc = doc();
        let selector = format!("[title={}]", css_string("say \"hi\""));
        assert_eq!(doc.query_selector_all(&selector).unwrap().len(), 1);
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["", "  ", "div >", "[data-x", ".", "a:hover", "div:nth-child(0)", "a,b"] {
            assert!(Selector::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn ident_check() {
        assert!(is_css_ident("save-button"));
        assert!(is_css_ident("_private"));
        assert!(!is_css_ident("1abc"));
        assert!(!is_css_ident("md:flex"));
        assert!(!is_css_ident("-2x"));
        assert!(!is_css_ident(""));
    }
}
