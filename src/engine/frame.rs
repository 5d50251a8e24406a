//! Frames: keyed field dictionaries built from anchor matches.
//!
//! ```text
//! name $ frame(anchor, field1 = p1a p1b ..., field2 = p2a ..., ...)
//! ```
//!
//! For each match of the anchor rule, a frame match with the anchor's extent
//! is produced. Each field's selection path is applied to the anchor match:
//! every name in the path selects, transitively, descendant matches of that
//! name, and the matches reached through the final name become the field's
//! values. Empty fields are omitted. Frames with the same extent are merged
//! into one frame with the union of their fields.

use std::collections::BTreeMap;

use crate::engine::context::Context;
use crate::error::{Result, ValetError};
use crate::manager::{Manager, NsId};
use crate::matches::{Extent, Match, MatchKind, MatchRef};
use crate::tokens::TokenSequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDef {
    pub anchor: String,
    /// Field name -> selection path.
    pub fields: Vec<(String, Vec<String>)>,
}

impl FrameDef {
    pub fn references(&self, out: &mut Vec<String>) {
        if !out.contains(&self.anchor) {
            out.push(self.anchor.clone());
        }
    }

    /// Build frames for anchor matches in `[start, end)`. With `start_only`,
    /// restrict to anchors beginning exactly at `start`.
    pub fn extract<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        start: usize,
        end: usize,
        start_only: bool,
    ) -> Result<Vec<Match<'t>>> {
        let mut acc: BTreeMap<Extent, Match<'t>> = BTreeMap::new();
        for am in mgr.scan_named(ns, &self.anchor, seq, start, end, ctx)? {
            if start_only && am.begin != start {
                continue;
            }
            let mut fields: BTreeMap<String, Vec<MatchRef<'t>>> = BTreeMap::new();
            for (fname, path) in &self.fields {
                let mut selected = Vec::new();
                Match::query(&am, path, &mut selected);
                dedupe_by_extent(&mut selected);
                if !selected.is_empty() {
                    fields.entry(fname.clone()).or_default().extend(selected);
                }
            }
            let extent = am.extent();
            match acc.get_mut(&extent) {
                Some(existing) => merge_fields(existing, fields),
                None => {
                    let mut frame = Match::new(seq, MatchKind::Frame, am.begin, am.end);
                    frame.anchor = Some(am);
                    frame.fields = fields;
                    acc.insert(extent, frame);
                }
            }
        }
        Ok(acc.into_values().collect())
    }
}

fn dedupe_by_extent(matches: &mut Vec<MatchRef<'_>>) {
    let mut seen: Vec<Extent> = Vec::new();
    matches.retain(|m| {
        let e = m.extent();
        if seen.contains(&e) {
            false
        } else {
            seen.push(e);
            true
        }
    });
}

fn merge_fields<'t>(frame: &mut Match<'t>, incoming: BTreeMap<String, Vec<MatchRef<'t>>>) {
    for (fname, values) in incoming {
        let slot = frame.fields.entry(fname).or_default();
        for v in values {
            if !slot.iter().any(|m| m.extent() == v.extent()) {
                slot.push(v);
            }
        }
    }
}

/// Parse a frame rule body.
pub fn parse(expr: &str) -> Result<FrameDef> {
    let toks: Vec<&str> = regex!(r"\w+(?:\.\w+)*|\S").find_iter(expr).map(|m| m.as_str()).collect();
    let mut parser = FrameParser { expr, toks, pos: 0 };
    let def = parser.frame()?;
    if parser.pos < parser.toks.len() {
        return Err(parser.error(format!("Extra tokens starting with '{}'", parser.toks[parser.pos])));
    }
    Ok(def)
}

struct FrameParser<'a> {
    expr: &'a str,
    toks: Vec<&'a str>,
    pos: usize,
}

impl<'a> FrameParser<'a> {
    fn error(&self, message: String) -> ValetError {
        ValetError::Parse { file: String::new(), line: 0, message: format!("{} in frame expression '{}'", message, self.expr) }
    }

    fn peek(&self) -> Option<&'a str> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str> {
        let tok = self.peek().ok_or_else(|| self.error("Unexpected end of expression".to_string()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, expected: &str) -> Result<()> {
        let tok = self.next()?;
        if tok != expected {
            return Err(self.error(format!("Expected '{}' but got '{}'", expected, tok)));
        }
        Ok(())
    }

    fn identifier(&mut self) -> Result<String> {
        let tok = self.next()?;
        if !regex!(r"^\w+(?:\.\w+)*$").is_match(tok) {
            return Err(self.error(format!("'{}' is not a valid name", tok)));
        }
        Ok(tok.to_string())
    }

    fn frame(&mut self) -> Result<FrameDef> {
        self.expect("frame")?;
        self.expect("(")?;
        let anchor = self.identifier()?;
        let mut fields = Vec::new();
        while self.peek() == Some(",") {
            self.pos += 1;
            let fname = self.identifier()?;
            if fname.contains('.') {
                return Err(self.error(format!("Field name '{}' may not be qualified", fname)));
            }
            self.expect("=")?;
            let mut path = vec![self.identifier()?];
            while self.peek().map(|t| regex!(r"^\w+(?:\.\w+)*$").is_match(t)).unwrap_or(false) {
                path.push(self.identifier()?);
            }
            fields.push((fname, path));
        }
        self.expect(")")?;
        Ok(FrameDef { anchor, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_anchor_and_fields() {
        let def = parse("frame(hiring, employer=hsubj name, employee=hobj name)").unwrap();
        assert_eq!(def.anchor, "hiring");
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.fields[0].0, "employer");
        assert_eq!(def.fields[0].1, vec!["hsubj".to_string(), "name".to_string()]);
    }

    #[test]
    fn anchor_only_frames_are_legal() {
        let def = parse("frame(anchor)").unwrap();
        assert!(def.fields.is_empty());
    }

    #[test]
    fn rejects_malformed_field_specs() {
        assert!(parse("frame(a, x y)").is_err());
        assert!(parse("frame(a, x =)").is_err());
        assert!(parse("frame a").is_err());
        assert!(parse("reduce(a)").is_err());
        assert!(parse("frame(a, ns.x = b)").is_err());
    }
}
