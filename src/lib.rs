extern crate self as valet;

#[macro_use]
mod macros;

mod api;
mod engine;
mod error;
mod expr;
mod manager;
mod matches;
mod statement;
mod tokentest;
mod tokens;

pub use api::{extract, extract_with, Extraction};
pub use engine::context::Context;
pub use error::{Result, ValetError};
pub use manager::{Capability, Manager, ManagerOptions, MatchStream};
pub use matches::{Extent, Match, MatchKind, MatchRef};
pub use tokens::{tokenize, TokenSequence};
