//! Matching runtime.
//!
//! Rule parsing (see `statement`, `expr`, `tokentest` and the coordinator and
//! frame expression parsers) produces compiled extractors owned by the
//! [`crate::manager::Manager`]; this module tree is what runs them against a
//! token sequence.
//!
//! ## How the parts work together
//!
//! ```text
//! rule source ── statement::parse ── Manager::register
//!                                        │ compiles bodies:
//!                                        │   tokentest  -> TokenTest
//!                                        │   expr + nfa -> Nfa (phrase/arc)
//!                                        │   coordinator/frame ASTs
//!                                        v
//! Manager::apply(name, seq)
//!     │  fresh Context (binding stack, recursion guard, scan cache)
//!     v
//! scan dispatch ──┬─ TokenTest::matches_at      per token          (tokentest)
//!                 ├─ Nfa::phrase_matches        greedy, submatches (nfa)
//!                 ├─ Nfa::arc_matches           all walks          (nfa)
//!                 ├─ CoordExpr::scan            stream algebra     (coordinator)
//!                 └─ FrameDef::extract          field selection    (frame)
//! ```
//!
//! Compiled extractors are immutable once the manager is built; everything
//! mutable during an extraction lives in the per-invocation
//! [`context::Context`], so a manager can be shared freely.
//!
//! Set `VALET_DEBUG_RULES=1` to print match-dispatch traces.

#[path = "engine/context.rs"]
pub mod context;
#[path = "engine/coordinator.rs"]
pub mod coordinator;
#[path = "engine/frame.rs"]
pub mod frame;
#[path = "engine/nfa.rs"]
pub mod nfa;
