//! Error taxonomy for the rule engine.
//!
//! Load-time problems (`Parse`, `Io`) surface eagerly from
//! `Manager::parse_file` / `parse_string`; the rest surface from `apply()`
//! and friends. Inverted filters and empty frame fields are not errors --
//! they just produce absent fields or empty streams.

pub type Result<T> = std::result::Result<T, ValetError>;

#[derive(Debug, thiserror::Error)]
pub enum ValetError {
    /// Malformed statement, unknown delimiter, unterminated quoting,
    /// bad binding qualifier, or a bad rule body.
    #[error("{file}:{line}: {message}")]
    Parse { file: String, line: usize, message: String },

    /// A reference failed to bind after climbing all scopes.
    #[error("unresolved name '{0}'")]
    UnresolvedName(String),

    /// An operand of the wrong kind, e.g. a phrase expression where a
    /// token test is required.
    #[error("'{name}' is a {actual}, but a {expected} is required")]
    Type { name: String, expected: &'static str, actual: &'static str },

    /// The token sequence lacks an annotation layer or dependency parse
    /// that an extractor needs.
    #[error("{0}")]
    ParseRequirement(String),

    /// A rule transitively re-entered itself at the same token position.
    #[error("recursive application of '{name}' at token {at}")]
    Recursion { name: String, at: usize },

    /// An import could not be resolved or read.
    #[error("import '{path}': {message}")]
    Io { path: String, message: String },
}

impl ValetError {
    pub(crate) fn parse(file: &str, line: usize, message: impl Into<String>) -> ValetError {
        ValetError::Parse { file: file.to_string(), line, message: message.into() }
    }
}
