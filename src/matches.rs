//! Match model.
//!
//! Every extractor yields [`Match`] values recording where it matched and
//! which named sub-extractors matched inside it. Matches form a directed
//! acyclic graph: a parent owns its `submatches`, while the operator-specific
//! fields (`left`, `right`, `submatch`, `supermatch`, `anchor`) are shared
//! references (`Rc`) to matches co-owned by other streams from the same
//! extraction. Matches borrow the token sequence and never outlive it.
//!
//! Index conventions differ by kind. Phrase matches use half-open
//! `[begin, end)` indices. Arc matches (parse origin) keep their raw walk
//! endpoints: both inclusive, and `begin` may exceed `end` when the walk ran
//! toward the start of the sentence. Every extent comparison goes through
//! [`Match::extent`], which normalizes to half-open ascending order; the raw
//! fields are only meaningful to code that cares about walk direction.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::tokens::TokenSequence;

/// Normalized half-open token range `(begin, end)`.
pub type Extent = (usize, usize);

pub type MatchRef<'t> = Rc<Match<'t>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Token test or phrase match; half-open indices.
    Phrase,
    /// Dependency-walk match; inclusive, possibly reversed indices.
    Arc,
    /// Coordinator output.
    Coord,
    /// Frame output with a field map.
    Frame,
}

#[derive(Debug, Clone)]
pub struct Match<'t> {
    pub seq: &'t TokenSequence,
    pub kind: MatchKind,
    pub begin: usize,
    pub end: usize,
    /// Name of the extractor that produced this match, when it was produced
    /// through a named reference (after binding substitution).
    pub name: Option<String>,
    /// Child matches captured while matching.
    pub submatches: Vec<MatchRef<'t>>,
    /// Operator fields; see the coordinator algebra.
    pub left: Option<MatchRef<'t>>,
    pub right: Option<MatchRef<'t>>,
    pub submatch: Option<MatchRef<'t>>,
    pub supermatch: Option<MatchRef<'t>>,
    /// The match this one takes its extent from (coordinator and frame
    /// outputs); `begin`/`end` above are a raw copy of its endpoints.
    pub anchor: Option<MatchRef<'t>>,
    /// Frame fields: field name -> matches selected for that field.
    pub fields: BTreeMap<String, Vec<MatchRef<'t>>>,
}

impl<'t> Match<'t> {
    pub fn new(seq: &'t TokenSequence, kind: MatchKind, begin: usize, end: usize) -> Match<'t> {
        Match {
            seq,
            kind,
            begin,
            end,
            name: None,
            submatches: Vec::new(),
            left: None,
            right: None,
            submatch: None,
            supermatch: None,
            anchor: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn phrase(seq: &'t TokenSequence, begin: usize, end: usize) -> Match<'t> {
        Match::new(seq, MatchKind::Phrase, begin, end)
    }

    pub fn arc(seq: &'t TokenSequence, begin: usize, end: usize) -> Match<'t> {
        Match::new(seq, MatchKind::Arc, begin, end)
    }

    /// A coordinator match taking its extent from `anchor`.
    pub fn coord(anchor: MatchRef<'t>) -> Match<'t> {
        let mut m = Match::new(anchor.seq, MatchKind::Coord, anchor.begin, anchor.end);
        m.anchor = Some(anchor);
        m
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Match<'t> {
        self.name = Some(name.into());
        self
    }

    /// The normalized extent: half-open, `begin <= end`, delegating to the
    /// anchor match for coordinator and frame outputs.
    pub fn extent(&self) -> Extent {
        if let Some(anchor) = &self.anchor {
            return anchor.extent();
        }
        match self.kind {
            MatchKind::Arc => {
                let (b, e) = if self.end < self.begin { (self.end, self.begin) } else { (self.begin, self.end) };
                (b, e + 1)
            }
            _ => (self.begin, self.end),
        }
    }

    /// True if the extents share at least one token position.
    pub fn overlaps(&self, other: &Match<'t>) -> bool {
        let (b, e) = self.extent();
        let (ob, oe) = other.extent();
        (b <= ob && ob < e) || (b < oe && oe <= e) || (ob <= b && b < oe) || (ob < e && e <= oe)
    }

    /// True if `index` falls inside the extent.
    pub fn covers(&self, index: usize) -> bool {
        let (b, e) = self.extent();
        b <= index && index < e
    }

    /// True if the half-open range `(begin, end)` falls inside the extent.
    pub fn covers_extent(&self, other: Extent) -> bool {
        let (b, e) = self.extent();
        let (ob, oe) = other;
        b <= ob && ob < e && b < oe && oe <= e
    }

    pub fn same_extent(&self, other: &Match<'t>) -> bool {
        self.extent() == other.extent()
    }

    /// The source substring under the normalized extent.
    pub fn matching_text(&self) -> &'t str {
        let (b, e) = self.extent();
        self.seq.spanned_text(b, e)
    }

    /// Direct submatches: the `submatches` list plus any operator fields,
    /// deduplicated by identity. Not recursive.
    pub fn direct_submatches(&self) -> Vec<MatchRef<'t>> {
        let mut out: Vec<MatchRef<'t>> = Vec::new();
        let push = |m: &MatchRef<'t>, out: &mut Vec<MatchRef<'t>>| {
            if !out.iter().any(|seen| Rc::ptr_eq(seen, m)) {
                out.push(Rc::clone(m));
            }
        };
        for m in &self.submatches {
            push(m, &mut out);
        }
        for m in [&self.left, &self.right, &self.submatch, &self.supermatch].into_iter().flatten() {
            push(m, &mut out);
        }
        out
    }

    /// All matches of named subexpressions in this match or any descendant,
    /// optionally restricted to `name`. For frame matches this includes the
    /// values of the field called `name` and the anchor match itself.
    pub fn all_submatches(&self, name: Option<&str>) -> Vec<MatchRef<'t>> {
        let mut out = Vec::new();
        if self.kind == MatchKind::Frame {
            if let Some(n) = name {
                if let Some(values) = self.fields.get(n) {
                    out.extend(values.iter().cloned());
                }
            }
            if let Some(anchor) = &self.anchor {
                if name.is_none() || name_matches(name.unwrap(), anchor.name.as_deref()) {
                    out.push(Rc::clone(anchor));
                }
                out.extend(anchor.all_submatches(name));
            }
            return out;
        }
        for m in self.direct_submatches() {
            if name.is_none() || name_matches(name.unwrap(), m.name.as_deref()) {
                out.push(Rc::clone(&m));
            }
            out.extend(m.all_submatches(name));
        }
        out
    }

    /// Selection-path query used by frames: successively select matches of
    /// each name in `names` from the match/submatch tree, allowing matches of
    /// other extractors in between. Yields the matches for the final name.
    /// On frame matches, a leading field name selects that field's values.
    pub fn query(self_ref: &MatchRef<'t>, names: &[String], out: &mut Vec<MatchRef<'t>>) {
        if names.is_empty() {
            return;
        }
        let mut names = names;
        if name_matches(&names[0], self_ref.name.as_deref()) {
            names = &names[1..];
            if names.is_empty() {
                out.push(Rc::clone(self_ref));
                return;
            }
        }
        if self_ref.kind == MatchKind::Frame {
            if let Some(values) = self_ref.fields.get(&names[0]) {
                let rest = &names[1..];
                for v in values {
                    if rest.is_empty() {
                        out.push(Rc::clone(v));
                    } else {
                        Match::query(v, rest, out);
                    }
                }
            } else if let Some(anchor) = &self_ref.anchor {
                Match::query(anchor, names, out);
            }
            return;
        }
        for m in self_ref.direct_submatches() {
            Match::query(&m, names, out);
        }
    }
}

/// Whether a query name matches a match name. Dotted match names (from
/// imports) are stripped down to the component count of the query name, so an
/// unqualified query name matches the same rule seen through any import path.
pub fn name_matches(query: &str, name: Option<&str>) -> bool {
    let Some(name) = name else { return false };
    let q: Vec<&str> = query.split('.').collect();
    let mut n: Vec<&str> = name.split('.').collect();
    if n.len() > q.len() {
        n.drain(..n.len() - q.len());
    }
    q == n
}

impl fmt::Display for Match<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("?");
        write!(f, "[{}]({},{}) {}", name, self.begin, self.end, self.matching_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::tokenize;

    #[test]
    fn arc_extents_normalize() {
        let seq = tokenize("a b c d");
        let m = Match::arc(&seq, 3, 1);
        assert_eq!(m.extent(), (1, 4));
        assert_eq!(m.matching_text(), "b c d");
        let m = Match::arc(&seq, 1, 3);
        assert_eq!(m.extent(), (1, 4));
    }

    #[test]
    fn coord_extent_delegates_to_anchor() {
        let seq = tokenize("a b c d");
        let inner = Rc::new(Match::arc(&seq, 2, 0));
        let outer = Match::coord(Rc::clone(&inner));
        assert_eq!(outer.extent(), (0, 3));
    }

    #[test]
    fn overlap_and_containment() {
        let seq = tokenize("a b c d e");
        let big = Match::phrase(&seq, 1, 4);
        let small = Match::phrase(&seq, 2, 3);
        let apart = Match::phrase(&seq, 4, 5);
        assert!(big.overlaps(&small));
        assert!(big.covers_extent(small.extent()));
        assert!(!big.overlaps(&apart));
        assert!(big.covers_extent(big.extent()));
    }

    #[test]
    fn all_submatches_filters_by_dotted_suffix() {
        let seq = tokenize("a b");
        let inner = Rc::new(Match::phrase(&seq, 0, 1).with_name("ortho.num"));
        let mut outer = Match::phrase(&seq, 0, 2).with_name("top");
        outer.submatches.push(inner);
        assert_eq!(outer.all_submatches(Some("num")).len(), 1);
        assert_eq!(outer.all_submatches(Some("ortho.num")).len(), 1);
        assert_eq!(outer.all_submatches(Some("other")).len(), 0);
    }

    #[test]
    fn query_walks_selection_paths() {
        let seq = tokenize("a b c");
        let num = Rc::new(Match::phrase(&seq, 1, 2).with_name("num"));
        let mut big = Match::phrase(&seq, 0, 3).with_name("bignum");
        big.submatches.push(Rc::clone(&num));
        let big = Rc::new(big);

        let mut out = Vec::new();
        Match::query(&big, &["bignum".to_string(), "num".to_string()], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].extent(), (1, 2));

        // Intervening names are allowed to be skipped.
        let mut out = Vec::new();
        Match::query(&big, &["num".to_string()], &mut out);
        assert_eq!(out.len(), 1);
    }
}
