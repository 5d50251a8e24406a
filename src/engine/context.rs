//! Per-extraction execution context.
//!
//! A [`Context`] is created for each top-level application of an extractor
//! and threaded through every nested call. It carries the three pieces of
//! mutable state the otherwise-immutable manager needs:
//!
//! - the **binding stack**: frames of `[a=b, ...]` substitutions pushed on
//!   entry to a rule carrying a binding qualifier and popped on every exit
//!   path; the innermost frame wins;
//! - the **recursion guard**: the set of `(extractor, begin)` pairs currently
//!   on the call stack, so a rule that transitively re-enters itself at the
//!   same position is reported instead of looping;
//! - the **scan cache**: memoized scan results keyed by
//!   `(extractor, start, end)`, bypassed while any binding frame is active
//!   since bindings change what names resolve to.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::error::{Result, ValetError};
use crate::matches::MatchRef;

/// Cache discriminator: full scans and at-position match lists are memoized
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    Scan,
    Matches,
}

#[derive(Debug, Default)]
pub struct Context<'t> {
    bindings: Vec<BTreeMap<String, String>>,
    active: HashSet<(usize, usize)>,
    cache: HashMap<(ScanMode, usize, usize, usize), Rc<Vec<MatchRef<'t>>>>,
}

impl<'t> Context<'t> {
    pub fn new() -> Context<'t> {
        Context::default()
    }

    pub fn push_bindings(&mut self, pairs: &[(String, String)]) {
        self.bindings.push(pairs.iter().cloned().collect());
    }

    pub fn pop_bindings(&mut self) {
        self.bindings.pop();
    }

    pub fn bindings_active(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// Resolve a rebinding for `name`, consulting the top frame first.
    /// A single substitution step: the result is not itself re-substituted,
    /// which is what makes `[a=b]` idempotent.
    pub fn binding_for(&self, name: &str) -> Option<&str> {
        self.bindings.iter().rev().find_map(|frame| frame.get(name).map(|s| s.as_str()))
    }

    /// Mark `(extractor, begin)` as being evaluated. Re-entry means a rule
    /// reached itself again at the same position.
    pub fn enter(&mut self, ext: usize, begin: usize, name: &str) -> Result<()> {
        if !self.active.insert((ext, begin)) {
            return Err(ValetError::Recursion { name: name.to_string(), at: begin });
        }
        Ok(())
    }

    pub fn exit(&mut self, ext: usize, begin: usize) {
        self.active.remove(&(ext, begin));
    }

    pub fn cached(&self, mode: ScanMode, ext: usize, start: usize, end: usize) -> Option<Rc<Vec<MatchRef<'t>>>> {
        if self.bindings_active() {
            return None;
        }
        self.cache.get(&(mode, ext, start, end)).cloned()
    }

    pub fn store(&mut self, mode: ScanMode, ext: usize, start: usize, end: usize, matches: Rc<Vec<MatchRef<'t>>>) {
        if !self.bindings_active() {
            self.cache.insert((mode, ext, start, end), matches);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_binding_wins_and_is_one_step() {
        let mut ctx = Context::new();
        ctx.push_bindings(&[("noun".to_string(), "propnoun".to_string())]);
        assert_eq!(ctx.binding_for("noun"), Some("propnoun"));
        // propnoun itself is not re-substituted
        assert_eq!(ctx.binding_for("propnoun"), None);

        ctx.push_bindings(&[("noun".to_string(), "other".to_string())]);
        assert_eq!(ctx.binding_for("noun"), Some("other"));
        ctx.pop_bindings();
        assert_eq!(ctx.binding_for("noun"), Some("propnoun"));
        ctx.pop_bindings();
        assert_eq!(ctx.binding_for("noun"), None);
    }

    #[test]
    fn recursion_guard_trips_on_reentry() {
        let mut ctx = Context::new();
        ctx.enter(3, 0, "x").unwrap();
        assert!(ctx.enter(3, 0, "x").is_err());
        assert!(ctx.enter(3, 1, "x").is_ok());
        ctx.exit(3, 0);
        assert!(ctx.enter(3, 0, "x").is_ok());
    }

    #[test]
    fn cache_is_bypassed_under_bindings() {
        let mut ctx: Context<'static> = Context::new();
        ctx.store(ScanMode::Scan, 1, 0, 5, Rc::new(Vec::new()));
        assert!(ctx.cached(ScanMode::Scan, 1, 0, 5).is_some());
        assert!(ctx.cached(ScanMode::Matches, 1, 0, 5).is_none());
        ctx.push_bindings(&[("a".to_string(), "b".to_string())]);
        assert!(ctx.cached(ScanMode::Scan, 1, 0, 5).is_none());
        ctx.store(ScanMode::Scan, 2, 0, 5, Rc::new(Vec::new()));
        ctx.pop_bindings();
        assert!(ctx.cached(ScanMode::Scan, 2, 0, 5).is_none());
    }
}
