//! Coordinators: a small algebra over match streams.
//!
//! A coordinator expression combines streams of matches. `<extractor>` slots
//! take extractor names; `<stream>` slots take nested coordinator
//! expressions. The literal `_` is the base stream: one match covering the
//! extent under consideration (the whole sequence at top level, or the
//! surrounding match when a coordinator runs inside another).
//!
//! A bare extractor name as a stream is shorthand for `match(name, _)`.
//!
//! Filter-family operators pass feed matches through unchanged in extent,
//! recording the triggering pattern match; when `inverted` they pass feed
//! matches that lack one, recording nothing. The set operators (`union`,
//! `inter`, `diff`) compare matches by extent alone and unify coincident
//! matches, collecting the coincident inputs as submatches.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::engine::context::Context;
use crate::error::{Result, ValetError};
use crate::manager::{Manager, NsId};
use crate::matches::{Extent, Match, MatchRef};
use crate::tokens::TokenSequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordExpr {
    /// `_`: one match spanning the scan bounds.
    Base,
    Match { pat: String, feed: Box<CoordExpr> },
    Select { pat: String, feed: Box<CoordExpr> },
    Filter { pat: String, feed: Box<CoordExpr>, inverted: bool },
    Prefix { pat: String, feed: Box<CoordExpr>, inverted: bool },
    Suffix { pat: String, feed: Box<CoordExpr>, inverted: bool },
    Near { pat: String, proximity: usize, feed: Box<CoordExpr>, inverted: bool },
    Precedes { pat: String, proximity: usize, feed: Box<CoordExpr>, inverted: bool },
    Follows { pat: String, proximity: usize, feed: Box<CoordExpr>, inverted: bool },
    Count { pat: String, count: usize, feed: Box<CoordExpr>, inverted: bool },
    Union(Vec<CoordExpr>),
    Inter(Vec<CoordExpr>),
    Diff(Vec<CoordExpr>),
    Contains { left: Box<CoordExpr>, right: Box<CoordExpr> },
    ContainedBy { left: Box<CoordExpr>, right: Box<CoordExpr> },
    Overlaps { left: Box<CoordExpr>, right: Box<CoordExpr> },
    Connects { pat: String, left: Box<CoordExpr>, right: Box<CoordExpr> },
}

impl CoordExpr {
    /// Extractor names referenced anywhere in the expression.
    pub fn references(&self, out: &mut Vec<String>) {
        let push = |name: &String, out: &mut Vec<String>| {
            if !out.contains(name) {
                out.push(name.clone());
            }
        };
        match self {
            CoordExpr::Base => {}
            CoordExpr::Match { pat, feed } | CoordExpr::Select { pat, feed } => {
                push(pat, out);
                feed.references(out);
            }
            CoordExpr::Filter { pat, feed, .. }
            | CoordExpr::Prefix { pat, feed, .. }
            | CoordExpr::Suffix { pat, feed, .. }
            | CoordExpr::Near { pat, feed, .. }
            | CoordExpr::Precedes { pat, feed, .. }
            | CoordExpr::Follows { pat, feed, .. }
            | CoordExpr::Count { pat, feed, .. } => {
                push(pat, out);
                feed.references(out);
            }
            CoordExpr::Union(feeds) | CoordExpr::Inter(feeds) | CoordExpr::Diff(feeds) => {
                for feed in feeds {
                    feed.references(out);
                }
            }
            CoordExpr::Contains { left, right }
            | CoordExpr::ContainedBy { left, right }
            | CoordExpr::Overlaps { left, right } => {
                left.references(out);
                right.references(out);
            }
            CoordExpr::Connects { pat, left, right } => {
                push(pat, out);
                left.references(out);
                right.references(out);
            }
        }
    }

    /// Evaluate over `[start, end)`. `ns` is the defining namespace of the
    /// rule holding this expression.
    pub fn scan<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Match<'t>>> {
        match self {
            CoordExpr::Base => Ok(vec![Match::phrase(seq, start, end).with_name("_")]),

            CoordExpr::Match { pat, feed } => {
                let mut out = Vec::new();
                for fm in feed_refs(feed, mgr, ctx, seq, ns, start, end)? {
                    let (fb, fe) = fm.extent();
                    for pm in mgr.scan_named(ns, pat, seq, fb, fe, ctx)? {
                        let mut m = Match::coord(Rc::clone(&pm));
                        m.left = Some(Rc::clone(&fm));
                        m.submatch = Some(pm);
                        m.supermatch = Some(Rc::clone(&fm));
                        out.push(m);
                    }
                }
                Ok(out)
            }

            CoordExpr::Select { pat, feed } => {
                let resolved = mgr.binding_view(ns, pat, ctx);
                let mut out = Vec::new();
                for fm in feed_refs(feed, mgr, ctx, seq, ns, 0, end)? {
                    let mut selected = fm.all_submatches(Some(&resolved));
                    selected.sort_by_key(|m| m.extent());
                    for pm in selected {
                        let (pb, pe) = pm.extent();
                        if pb >= start && pe <= end {
                            let mut m = Match::coord(Rc::clone(&pm));
                            m.left = Some(Rc::clone(&fm));
                            m.submatch = Some(pm);
                            m.supermatch = Some(Rc::clone(&fm));
                            out.push(m);
                        }
                    }
                }
                Ok(out)
            }

            CoordExpr::Filter { pat, feed, inverted } => {
                let mut out = Vec::new();
                for fm in feed_refs(feed, mgr, ctx, seq, ns, start, end)? {
                    let (fb, fe) = fm.extent();
                    let pms = mgr.scan_named(ns, pat, seq, fb, fe, ctx)?;
                    let hit = pms.into_iter().next();
                    match (hit, inverted) {
                        (Some(pm), false) => {
                            let mut m = Match::coord(Rc::clone(&fm));
                            m.left = Some(Rc::clone(&fm));
                            m.submatch = Some(pm);
                            out.push(m);
                        }
                        (None, true) => {
                            let mut m = Match::coord(Rc::clone(&fm));
                            m.left = Some(Rc::clone(&fm));
                            out.push(m);
                        }
                        _ => {}
                    }
                }
                Ok(out)
            }

            CoordExpr::Prefix { pat, feed, inverted } => self.proximal(
                mgr,
                ctx,
                seq,
                ns,
                start,
                end,
                pat,
                feed,
                *inverted,
                |f| (start, f.0),
                |f, p| f.0 == p.1,
            ),

            CoordExpr::Suffix { pat, feed, inverted } => self.proximal(
                mgr,
                ctx,
                seq,
                ns,
                start,
                end,
                pat,
                feed,
                *inverted,
                |f| (f.1, end),
                |f, p| p.0 == f.1,
            ),

            CoordExpr::Precedes { pat, proximity, feed, inverted } => {
                let k = *proximity as isize;
                self.proximal(
                    mgr,
                    ctx,
                    seq,
                    ns,
                    start,
                    end,
                    pat,
                    feed,
                    *inverted,
                    |f| (start, f.0),
                    move |f, p| {
                        let diff = f.0 as isize - p.1 as isize;
                        0 <= diff && diff <= k
                    },
                )
            }

            CoordExpr::Follows { pat, proximity, feed, inverted } => {
                let k = *proximity as isize;
                self.proximal(
                    mgr,
                    ctx,
                    seq,
                    ns,
                    start,
                    end,
                    pat,
                    feed,
                    *inverted,
                    |f| (f.1, end),
                    move |f, p| {
                        let diff = p.0 as isize - f.1 as isize;
                        0 <= diff && diff <= k
                    },
                )
            }

            CoordExpr::Near { pat, proximity, feed, inverted } => {
                let k = *proximity as isize;
                self.proximal(
                    mgr,
                    ctx,
                    seq,
                    ns,
                    start,
                    end,
                    pat,
                    feed,
                    *inverted,
                    move |_| (start, end),
                    move |f, p| {
                        let before = f.0 as isize - p.1 as isize;
                        let after = p.0 as isize - f.1 as isize;
                        (0 <= before && before <= k) || (0 <= after && after <= k)
                    },
                )
            }

            CoordExpr::Count { pat, count, feed, inverted } => {
                let mut out = Vec::new();
                for fm in feed_refs(feed, mgr, ctx, seq, ns, start, end)? {
                    let (fb, fe) = fm.extent();
                    let pms = mgr.scan_named(ns, pat, seq, fb, fe, ctx)?;
                    if *inverted {
                        if pms.len() < *count {
                            let mut m = Match::coord(Rc::clone(&fm));
                            m.left = Some(Rc::clone(&fm));
                            out.push(m);
                        }
                    } else if pms.len() >= *count {
                        let mut m = Match::coord(Rc::clone(&fm));
                        m.left = Some(Rc::clone(&fm));
                        m.submatches = pms;
                        out.push(m);
                    }
                }
                Ok(out)
            }

            CoordExpr::Union(feeds) => {
                let mut acc: BTreeMap<Extent, Match<'t>> = BTreeMap::new();
                for feed in feeds {
                    for m in feed_refs(feed, mgr, ctx, seq, ns, start, end)? {
                        accumulate(&mut acc, m);
                    }
                }
                Ok(acc.into_values().collect())
            }

            CoordExpr::Inter(feeds) => {
                let mut acc: BTreeMap<Extent, Match<'t>> = BTreeMap::new();
                for (i, feed) in feeds.iter().enumerate() {
                    let matches = feed_refs(feed, mgr, ctx, seq, ns, start, end)?;
                    if i == 0 {
                        for m in matches {
                            accumulate(&mut acc, m);
                        }
                    } else {
                        let mut present: BTreeMap<Extent, Vec<MatchRef<'t>>> = BTreeMap::new();
                        for m in matches {
                            present.entry(m.extent()).or_default().push(m);
                        }
                        acc.retain(|extent, _| present.contains_key(extent));
                        for (extent, ms) in present {
                            if let Some(entry) = acc.get_mut(&extent) {
                                entry.submatches.extend(ms);
                            }
                        }
                    }
                    if acc.is_empty() {
                        break;
                    }
                }
                Ok(acc.into_values().collect())
            }

            CoordExpr::Diff(feeds) => {
                let mut acc: BTreeMap<Extent, Match<'t>> = BTreeMap::new();
                for (i, feed) in feeds.iter().enumerate() {
                    let matches = feed_refs(feed, mgr, ctx, seq, ns, start, end)?;
                    if i == 0 {
                        for m in matches {
                            accumulate(&mut acc, m);
                        }
                    } else {
                        for m in matches {
                            acc.remove(&m.extent());
                        }
                    }
                    if acc.is_empty() {
                        break;
                    }
                }
                Ok(acc.into_values().collect())
            }

            CoordExpr::Contains { left, right } => {
                self.join(mgr, ctx, seq, ns, start, end, left, right, |lm, rm| lm.covers_extent(rm.extent()))
            }

            CoordExpr::ContainedBy { left, right } => {
                self.join(mgr, ctx, seq, ns, start, end, left, right, |lm, rm| rm.covers_extent(lm.extent()))
            }

            CoordExpr::Overlaps { left, right } => {
                self.join(mgr, ctx, seq, ns, start, end, left, right, |lm, rm| lm.overlaps(rm))
            }

            CoordExpr::Connects { pat, left, right } => {
                let leftm = feed_refs(left, mgr, ctx, seq, ns, start, end)?;
                if leftm.is_empty() {
                    return Ok(Vec::new());
                }
                let rightm = feed_refs(right, mgr, ctx, seq, ns, start, end)?;
                if rightm.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Vec::new();
                for lm in &leftm {
                    let (lb, le) = lm.extent();
                    for i in lb..le {
                        for pm in mgr.matches_named(ns, pat, seq, i, seq.len(), ctx)? {
                            for rm in rightm.iter().filter(|rm| rm.covers(pm.end)) {
                                let mut m = Match::coord(Rc::clone(&pm));
                                m.left = Some(Rc::clone(lm));
                                m.right = Some(Rc::clone(rm));
                                m.submatch = Some(Rc::clone(&pm));
                                out.push(m);
                            }
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    /// Shared body of the prefix/suffix/precedes/follows/near family: pass
    /// each feed match when some pattern match in the `bounds` window stands
    /// in `accept` relation to it (or no pattern match does, when inverted).
    #[allow(clippy::too_many_arguments)]
    fn proximal<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        start: usize,
        end: usize,
        pat: &str,
        feed: &CoordExpr,
        inverted: bool,
        bounds: impl Fn(Extent) -> (usize, usize),
        accept: impl Fn(Extent, Extent) -> bool,
    ) -> Result<Vec<Match<'t>>> {
        let mut out = Vec::new();
        for fm in feed_refs(feed, mgr, ctx, seq, ns, start, end)? {
            let f = fm.extent();
            let (pat_start, pat_end) = bounds(f);
            let pms = if pat_start <= pat_end {
                mgr.scan_named(ns, pat, seq, pat_start, pat_end, ctx)?
            } else {
                Vec::new()
            };
            let hit = pms.into_iter().find(|pm| accept(f, pm.extent()));
            match (hit, inverted) {
                (Some(pm), false) => {
                    let mut m = Match::coord(Rc::clone(&fm));
                    m.left = Some(Rc::clone(&fm));
                    m.submatch = Some(pm);
                    out.push(m);
                }
                (None, true) => {
                    let mut m = Match::coord(Rc::clone(&fm));
                    m.left = Some(Rc::clone(&fm));
                    out.push(m);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn join<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        start: usize,
        end: usize,
        left: &CoordExpr,
        right: &CoordExpr,
        accept: impl Fn(&Match<'t>, &Match<'t>) -> bool,
    ) -> Result<Vec<Match<'t>>> {
        let leftm = feed_refs(left, mgr, ctx, seq, ns, start, end)?;
        let rightm = feed_refs(right, mgr, ctx, seq, ns, start, end)?;
        let mut out = Vec::new();
        for lm in &leftm {
            for rm in rightm.iter().filter(|rm| accept(lm, rm)) {
                let mut m = Match::coord(Rc::clone(lm));
                m.left = Some(Rc::clone(lm));
                m.right = Some(Rc::clone(rm));
                out.push(m);
            }
        }
        Ok(out)
    }
}

fn feed_refs<'t>(
    feed: &CoordExpr,
    mgr: &Manager,
    ctx: &mut Context<'t>,
    seq: &'t TokenSequence,
    ns: NsId,
    start: usize,
    end: usize,
) -> Result<Vec<MatchRef<'t>>> {
    Ok(feed.scan(mgr, ctx, seq, ns, start, end)?.into_iter().map(Rc::new).collect())
}

/// Extent-keyed unification used by `union`/`inter`/`diff`: coincident
/// matches collapse to one output collecting them all as submatches.
fn accumulate<'t>(acc: &mut BTreeMap<Extent, Match<'t>>, m: MatchRef<'t>) {
    match acc.get_mut(&m.extent()) {
        Some(entry) => entry.submatches.push(m),
        None => {
            let mut entry = Match::coord(Rc::clone(&m));
            entry.submatches.push(m);
            acc.insert(entry.extent(), entry);
        }
    }
}

/// Parse a coordinator expression.
pub fn parse(expr: &str) -> Result<CoordExpr> {
    let toks: Vec<&str> = regex!(r"\w+(?:\.\w+)*|\S").find_iter(expr).map(|m| m.as_str()).collect();
    let mut parser = CoordParser { expr, toks, pos: 0 };
    let stream = parser.stream()?;
    if parser.pos < parser.toks.len() {
        return Err(parser.error(format!("Extra tokens starting with '{}'", parser.toks[parser.pos])));
    }
    Ok(stream)
}

struct CoordParser<'a> {
    expr: &'a str,
    toks: Vec<&'a str>,
    pos: usize,
}

impl<'a> CoordParser<'a> {
    fn error(&self, message: String) -> ValetError {
        ValetError::Parse {
            file: String::new(),
            line: 0,
            message: format!("{} in coordinator expression '{}'", message, self.expr),
        }
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

    fn extractor_name(&mut self) -> Result<String> {
        let tok = self.next()?;
        if !regex!(r"^\w+(?:\.\w+)*$").is_match(tok) {
            return Err(self.error(format!("Illegal extractor name '{}'", tok)));
        }
        Ok(tok.to_string())
    }

    fn stream(&mut self) -> Result<CoordExpr> {
        let op = self.next()?;

        if op == "_" {
            return Ok(CoordExpr::Base);
        }

        // A bare extractor name is shorthand for match(name, _).
        let name_like = regex!(r"^\w+(?:\.\w+)*$").is_match(op);
        if name_like && self.peek() != Some("(") {
            return Ok(CoordExpr::Match { pat: op.to_string(), feed: Box::new(CoordExpr::Base) });
        }

        let result = match op {
            "match" | "select" => {
                self.expect("(")?;
                let pat = self.extractor_name()?;
                self.expect(",")?;
                let feed = Box::new(self.stream()?);
                if op == "match" {
                    CoordExpr::Match { pat, feed }
                } else {
                    CoordExpr::Select { pat, feed }
                }
            }
            "filter" | "prefix" | "suffix" => {
                self.expect("(")?;
                let pat = self.extractor_name()?;
                self.expect(",")?;
                let feed = Box::new(self.stream()?);
                let inverted = self.inversion_flag()?;
                match op {
                    "filter" => CoordExpr::Filter { pat, feed, inverted },
                    "prefix" => CoordExpr::Prefix { pat, feed, inverted },
                    _ => CoordExpr::Suffix { pat, feed, inverted },
                }
            }
            "near" | "precedes" | "follows" | "count" => {
                self.expect("(")?;
                let pat = self.extractor_name()?;
                self.expect(",")?;
                let param = self.non_negative_int()?;
                self.expect(",")?;
                let feed = Box::new(self.stream()?);
                let inverted = self.inversion_flag()?;
                match op {
                    "near" => CoordExpr::Near { pat, proximity: param, feed, inverted },
                    "precedes" => CoordExpr::Precedes { pat, proximity: param, feed, inverted },
                    "follows" => CoordExpr::Follows { pat, proximity: param, feed, inverted },
                    _ => CoordExpr::Count { pat, count: param, feed, inverted },
                }
            }
            "union" | "inter" | "diff" => {
                self.expect("(")?;
                let mut feeds = vec![self.stream()?];
                while self.peek() == Some(",") {
                    self.pos += 1;
                    feeds.push(self.stream()?);
                }
                match op {
                    "union" => CoordExpr::Union(feeds),
                    "inter" => CoordExpr::Inter(feeds),
                    _ => CoordExpr::Diff(feeds),
                }
            }
            "contains" | "contained_by" | "overlaps" => {
                self.expect("(")?;
                let left = Box::new(self.stream()?);
                self.expect(",")?;
                let right = Box::new(self.stream()?);
                match op {
                    "contains" => CoordExpr::Contains { left, right },
                    "contained_by" => CoordExpr::ContainedBy { left, right },
                    _ => CoordExpr::Overlaps { left, right },
                }
            }
            "connects" => {
                self.expect("(")?;
                let pat = self.extractor_name()?;
                self.expect(",")?;
                let left = Box::new(self.stream()?);
                self.expect(",")?;
                let right = Box::new(self.stream()?);
                CoordExpr::Connects { pat, left, right }
            }
            other => return Err(self.error(format!("Illegal operator '{}'", other))),
        };

        self.expect(")")?;
        Ok(result)
    }

    fn non_negative_int(&mut self) -> Result<usize> {
        let tok = self.next()?;
        tok.parse().map_err(|_| self.error(format!("Expected non-negative integer but got '{}'", tok)))
    }

    /// Optional trailing `, inverted` (also `invert` or the legacy `1`).
    fn inversion_flag(&mut self) -> Result<bool> {
        if self.peek() != Some(",") {
            return Ok(false);
        }
        self.pos += 1;
        let tok = self.next()?;
        match tok {
            "inverted" | "invert" | "1" => Ok(true),
            other => Err(self.error(format!("Invalid inversion flag '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_desugars_to_match_over_base() {
        let e = parse("money").unwrap();
        assert_eq!(e, CoordExpr::Match { pat: "money".to_string(), feed: Box::new(CoordExpr::Base) });
    }

    #[test]
    fn nested_streams_parse() {
        let e = parse("select(hire, connects(nsubj, name, hire))").unwrap();
        let CoordExpr::Select { pat, feed } = e else { panic!() };
        assert_eq!(pat, "hire");
        let CoordExpr::Connects { pat, left, right } = *feed else { panic!() };
        assert_eq!(pat, "nsubj");
        assert!(matches!(*left, CoordExpr::Match { .. }));
        assert!(matches!(*right, CoordExpr::Match { .. }));
    }

    #[test]
    fn inversion_accepts_all_spellings() {
        for flag in ["inverted", "invert", "1"] {
            let e = parse(&format!("prefix(dollar, bignum, {})", flag)).unwrap();
            assert!(matches!(e, CoordExpr::Prefix { inverted: true, .. }), "flag {}", flag);
        }
        assert!(matches!(parse("prefix(dollar, bignum)").unwrap(), CoordExpr::Prefix { inverted: false, .. }));
        assert!(parse("prefix(dollar, bignum, upside_down)").is_err());
    }

    #[test]
    fn proximity_operators_take_a_count() {
        let e = parse("near(x, 3, _)").unwrap();
        assert!(matches!(e, CoordExpr::Near { proximity: 3, .. }));
        assert!(parse("near(x, lots, _)").is_err());
    }

    #[test]
    fn nary_operators_take_any_number_of_streams() {
        let e = parse("union(a, b, c, diff(d, e))").unwrap();
        let CoordExpr::Union(feeds) = e else { panic!() };
        assert_eq!(feeds.len(), 4);
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse("bogus(a, _)").is_err());
        assert!(parse("match(a b, _)").is_err());
        assert!(parse("match(a, _) trailing").is_err());
        assert!(parse("inter()").is_err());
    }

    #[test]
    fn references_include_patterns_and_feeds() {
        let e = parse("filter(a, union(b, match(c, _)))").unwrap();
        let mut refs = Vec::new();
        e.references(&mut refs);
        assert_eq!(refs, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
