//! NFA compilation and execution for phrase and parse expressions.
//!
//! Thompson construction over an alphabet of rule atoms. Transitions come in
//! three consuming kinds plus epsilon:
//!
//! - **symbol**: a literal token string (phrase) or edge label (parse);
//! - **reference** to a token test: consumes one token (or edge) the test
//!   accepts, recording a one-token submatch named after the test;
//! - **reference** to another extractor ("callout"): recursively matches the
//!   referenced extractor at the current position and continues where its
//!   match ends, recording the inner match as a named submatch.
//!
//! References carry the textual name from the rule; what they resolve to is
//! decided at traversal time through the manager, so rebinding qualifiers
//! apply along the call stack.
//!
//! Phrase execution consumes tokens left to right. Arc execution runs the
//! same automaton against dependency-tree edges: one non-epsilon transition
//! consumes one edge, moving to the token at its far end, in either direction
//! unless the atom carries a `/` (toward root) or `\` (away from root)
//! prefix. A `(state, position)` visited set keeps walks from re-entering a
//! configuration, which phrase matching cannot do since it only moves
//! forward.

use std::collections::HashSet;
use std::rc::Rc;

use crate::engine::context::Context;
use crate::error::{Result, ValetError};
use crate::expr::Expr;
use crate::manager::{Manager, NsId, RefKind};
use crate::matches::{Match, MatchRef};
use crate::tokens::TokenSequence;

/// Bound on traversal depth; trips on zero-progress reference loops that the
/// `(extractor, begin)` guard cannot see.
const DEPTH_LIMIT: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDir {
    /// `/`: follow an edge toward the root only.
    Up,
    /// `\`: follow an edge away from the root only.
    Down,
}

#[derive(Debug, Clone)]
enum TransKind {
    Symbol { symbol: String, dir: Option<ArcDir> },
    Reference { name: String, dir: Option<ArcDir> },
    Epsilon,
}

#[derive(Debug, Clone)]
struct Transition {
    kind: TransKind,
    dest: usize,
}

#[derive(Debug)]
pub struct Nfa {
    transitions: Vec<Vec<Transition>>,
    initial: usize,
    finals: Vec<bool>,
    /// Epsilon closure of each state, including itself.
    closures: Vec<Vec<usize>>,
    /// Extractor names referenced by the automaton.
    references: Vec<String>,
    case_insensitive: bool,
    /// Walks longer than this many tokens from their start are abandoned.
    max_match: usize,
    arcs: bool,
}

struct Fragment {
    start: usize,
    ends: Vec<usize>,
}

impl Nfa {
    /// Compile an expression tree. `arcs` selects edge-label interpretation
    /// of atoms (direction prefixes are split off); phrase automata keep
    /// atoms verbatim.
    pub fn compile(expr: &Expr, arcs: bool, case_insensitive: bool, max_match: usize) -> Nfa {
        let mut nfa = Nfa {
            transitions: Vec::new(),
            initial: 0,
            finals: Vec::new(),
            closures: Vec::new(),
            references: expr.references(),
            case_insensitive,
            max_match,
            arcs,
        };
        let frag = nfa.build(expr);
        nfa.initial = frag.start;
        for end in frag.ends {
            nfa.finals[end] = true;
        }
        nfa.compute_closures();
        nfa
    }

    /// Compile a phrase lexicon: one alternation over literal token
    /// sequences.
    pub fn from_lexicon(phrases: &[Vec<String>], case_insensitive: bool, max_match: usize) -> Nfa {
        let mut nfa = Nfa {
            transitions: Vec::new(),
            initial: 0,
            finals: Vec::new(),
            closures: Vec::new(),
            references: Vec::new(),
            case_insensitive,
            max_match,
            arcs: false,
        };
        nfa.initial = nfa.new_state();
        for phrase in phrases {
            if phrase.is_empty() {
                continue;
            }
            let mut cur = nfa.initial;
            for tok in phrase {
                let symbol = if case_insensitive { tok.to_lowercase() } else { tok.clone() };
                let next = nfa.new_state();
                nfa.transitions[cur].push(Transition { kind: TransKind::Symbol { symbol, dir: None }, dest: next });
                cur = next;
            }
            nfa.finals[cur] = true;
        }
        nfa.compute_closures();
        nfa
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    fn new_state(&mut self) -> usize {
        self.transitions.push(Vec::new());
        self.finals.push(false);
        self.transitions.len() - 1
    }

    fn link(&mut self, src: usize, dest: usize) {
        self.transitions[src].push(Transition { kind: TransKind::Epsilon, dest });
    }

    fn build(&mut self, expr: &Expr) -> Fragment {
        match expr {
            Expr::Atom(symbol) => {
                let start = self.new_state();
                let end = self.new_state();
                let kind = self.atom_kind(symbol);
                self.transitions[start].push(Transition { kind, dest: end });
                Fragment { start, ends: vec![end] }
            }
            Expr::Concat(subs) => {
                let frags: Vec<Fragment> = subs.iter().map(|s| self.build(s)).collect();
                let mut frags = frags.into_iter();
                let first = frags.next().expect("parser rejects empty concatenation");
                let mut ends = first.ends;
                for frag in frags {
                    for end in ends {
                        self.link(end, frag.start);
                    }
                    ends = frag.ends;
                }
                Fragment { start: first.start, ends }
            }
            Expr::Altern(subs) => {
                let start = self.new_state();
                let mut ends = Vec::new();
                for sub in subs {
                    let frag = self.build(sub);
                    self.link(start, frag.start);
                    ends.extend(frag.ends);
                }
                Fragment { start, ends }
            }
            Expr::Opt(sub) => {
                let frag = self.build(sub);
                for &end in &frag.ends {
                    self.link(frag.start, end);
                }
                frag
            }
            Expr::Plus(sub) => {
                let frag = self.build(sub);
                for &end in &frag.ends {
                    self.link(end, frag.start);
                }
                frag
            }
            Expr::Star(sub) => {
                let frag = self.build(sub);
                for &end in &frag.ends {
                    self.link(end, frag.start);
                    self.link(frag.start, end);
                }
                frag
            }
        }
    }

    fn atom_kind(&self, symbol: &str) -> TransKind {
        if let Some(caps) = regex!(r"^[&@]([/\\]?)(\w+(?:\.\w+)*)$").captures(symbol) {
            let dir = arc_dir(&caps[1]);
            return TransKind::Reference { name: caps[2].to_string(), dir };
        }
        if self.arcs {
            if let Some(caps) = regex!(r"^([/\\])(.+)$").captures(symbol) {
                return TransKind::Symbol { symbol: caps[2].to_string(), dir: arc_dir(&caps[1]) };
            }
        }
        let symbol = if self.case_insensitive { symbol.to_lowercase() } else { symbol.to_string() };
        TransKind::Symbol { symbol, dir: None }
    }

    fn compute_closures(&mut self) {
        self.closures = (0..self.transitions.len())
            .map(|sid| {
                let mut seen = vec![false; self.transitions.len()];
                let mut stack = vec![sid];
                let mut closure = Vec::new();
                while let Some(s) = stack.pop() {
                    if seen[s] {
                        continue;
                    }
                    seen[s] = true;
                    closure.push(s);
                    for t in &self.transitions[s] {
                        if matches!(t.kind, TransKind::Epsilon) {
                            stack.push(t.dest);
                        }
                    }
                }
                closure
            })
            .collect();
    }

    fn symbol_matches(&self, symbol: &str, token: &str) -> bool {
        if self.case_insensitive {
            symbol == token.to_lowercase()
        } else {
            symbol == token
        }
    }

    /// All accepting runs starting exactly at `start`, each as a phrase match
    /// `[start, run_end)` with its captured submatches. Zero-length runs are
    /// included; callers drop them.
    pub fn phrase_matches<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        rule_name: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Match<'t>>> {
        let mut runs: Vec<(usize, Vec<MatchRef<'t>>)> = Vec::new();
        let mut subs = Vec::new();
        for i in 0..self.closures[self.initial].len() {
            let sid = self.closures[self.initial][i];
            self.phrase_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, start, &mut subs, &mut runs, 0)?;
        }
        Ok(runs
            .into_iter()
            .map(|(run_end, submatches)| {
                let mut m = Match::phrase(seq, start, run_end);
                m.submatches = submatches;
                m
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn phrase_walk<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        rule_name: &str,
        start: usize,
        end: usize,
        state: usize,
        at: usize,
        subs: &mut Vec<MatchRef<'t>>,
        runs: &mut Vec<(usize, Vec<MatchRef<'t>>)>,
        depth: usize,
    ) -> Result<()> {
        if at > end || at - start > self.max_match {
            return Ok(());
        }
        if depth > DEPTH_LIMIT {
            return Err(ValetError::Recursion { name: rule_name.to_string(), at });
        }
        for t in &self.transitions[state] {
            match &t.kind {
                TransKind::Epsilon => {}
                TransKind::Symbol { symbol, .. } => {
                    if at < end && self.symbol_matches(symbol, seq.token(at)) {
                        for i in 0..self.closures[t.dest].len() {
                            let sid = self.closures[t.dest][i];
                            self.phrase_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, at + 1, subs, runs, depth + 1)?;
                        }
                    }
                }
                TransKind::Reference { name, dir } => {
                    let (display, ext, kind) = mgr.ref_kind(ns, name, ctx)?;
                    if kind == RefKind::Test {
                        if dir.is_some() {
                            return Err(ValetError::ParseRequirement(format!(
                                "direction prefix on '{}' is only meaningful in parse expressions",
                                name
                            )));
                        }
                        if at < end && mgr.test_matches_at(ext, seq, at, ctx)? {
                            subs.push(Rc::new(Match::phrase(seq, at, at + 1).with_name(display)));
                            for i in 0..self.closures[t.dest].len() {
                                let sid = self.closures[t.dest][i];
                                self.phrase_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, at + 1, subs, runs, depth + 1)?;
                            }
                            subs.pop();
                        }
                    } else if kind == RefKind::Parse {
                        return Err(ValetError::Type {
                            name: display,
                            expected: "phrase-compatible extractor",
                            actual: "parse expression",
                        });
                    } else {
                        for sm in mgr.matches_resolved(ext, &display, seq, at, end, ctx)? {
                            let (sm_begin, sm_end) = sm.extent();
                            // Only inner matches that advance us are usable.
                            if sm_begin < at || sm_end < at {
                                continue;
                            }
                            subs.push(Rc::clone(&sm));
                            for i in 0..self.closures[t.dest].len() {
                                let sid = self.closures[t.dest][i];
                                self.phrase_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, sm_end, subs, runs, depth + 1)?;
                            }
                            subs.pop();
                        }
                    }
                }
            }
        }
        if self.finals[state] {
            runs.push((at, subs.clone()));
        }
        Ok(())
    }

    /// All accepting walks over the dependency graph starting at token
    /// `start`. Endpoints are raw: `end` is the inclusive far-end token and
    /// may precede `start`.
    pub fn arc_matches<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        rule_name: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Match<'t>>> {
        if !seq.has_dependencies() {
            return Err(ValetError::ParseRequirement(format!(
                "parse expression '{}' applied to a token sequence without a dependency parse",
                rule_name
            )));
        }
        let mut runs: Vec<(usize, Vec<MatchRef<'t>>)> = Vec::new();
        let mut subs = Vec::new();
        for i in 0..self.closures[self.initial].len() {
            let sid = self.closures[self.initial][i];
            let mut visited = HashSet::new();
            self.arc_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, start, &mut visited, &mut subs, &mut runs)?;
        }
        Ok(runs
            .into_iter()
            .map(|(run_end, submatches)| {
                let mut m = Match::arc(seq, start, run_end);
                m.submatches = submatches;
                m
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn arc_walk<'t>(
        &self,
        mgr: &Manager,
        ctx: &mut Context<'t>,
        seq: &'t TokenSequence,
        ns: NsId,
        rule_name: &str,
        start: usize,
        end: usize,
        state: usize,
        at: usize,
        visited: &mut HashSet<(usize, usize)>,
        subs: &mut Vec<MatchRef<'t>>,
        runs: &mut Vec<(usize, Vec<MatchRef<'t>>)>,
    ) -> Result<()> {
        if at > end || at.abs_diff(start) > self.max_match {
            return Ok(());
        }
        // A walk may revisit tokens but not re-enter a configuration.
        if !visited.insert((state, at)) {
            return Ok(());
        }
        for t in &self.transitions[state] {
            match &t.kind {
                TransKind::Epsilon => {}
                TransKind::Symbol { symbol, dir } => {
                    for toki in self.edge_steps(seq, at, *dir, |label| Ok(label == symbol))? {
                        for i in 0..self.closures[t.dest].len() {
                            let sid = self.closures[t.dest][i];
                            self.arc_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, toki, visited, subs, runs)?;
                        }
                    }
                }
                TransKind::Reference { name, dir } => {
                    let (display, ext, kind) = mgr.ref_kind(ns, name, ctx)?;
                    match kind {
                        RefKind::Test => {
                            // Token tests in parse expressions apply to edge
                            // labels; label matches are not recorded as
                            // submatches.
                            let steps = self.edge_steps(seq, at, *dir, |label| mgr.test_matches_label(ext, label, ctx))?;
                            for toki in steps {
                                for i in 0..self.closures[t.dest].len() {
                                    let sid = self.closures[t.dest][i];
                                    self.arc_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, toki, visited, subs, runs)?;
                                }
                            }
                        }
                        RefKind::Parse => {
                            for sm in mgr.matches_resolved(ext, &display, seq, at, end, ctx)? {
                                subs.push(Rc::clone(&sm));
                                for i in 0..self.closures[t.dest].len() {
                                    let sid = self.closures[t.dest][i];
                                    self.arc_walk(mgr, ctx, seq, ns, rule_name, start, end, sid, sm.end, visited, subs, runs)?;
                                }
                                subs.pop();
                            }
                        }
                        _ => {
                            return Err(ValetError::Type {
                                name: display,
                                expected: "parse expression or token test",
                                actual: kind.long_name(),
                            });
                        }
                    }
                }
            }
        }
        if self.finals[state] {
            runs.push((at, subs.clone()));
        }
        Ok(())
    }

    /// Token indices reachable from `at` over one edge whose label satisfies
    /// `pred`, honoring a direction constraint.
    fn edge_steps(
        &self,
        seq: &TokenSequence,
        at: usize,
        dir: Option<ArcDir>,
        mut pred: impl FnMut(&str) -> Result<bool>,
    ) -> Result<Vec<usize>> {
        let mut steps = Vec::new();
        if at >= seq.len() {
            return Ok(steps);
        }
        if dir.is_none() || dir == Some(ArcDir::Up) {
            for (toki, label) in seq.up_dependencies(at) {
                if pred(label)? {
                    steps.push(*toki);
                }
            }
        }
        if dir.is_none() || dir == Some(ArcDir::Down) {
            for (toki, label) in seq.down_dependencies(at) {
                if pred(label)? {
                    steps.push(*toki);
                }
            }
        }
        Ok(steps)
    }
}

fn arc_dir(prefix: &str) -> Option<ArcDir> {
    match prefix {
        "/" => Some(ArcDir::Up),
        "\\" => Some(ArcDir::Down),
        _ => None,
    }
}
