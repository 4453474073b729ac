use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// Malformed URI text: unbalanced parentheses, stray characters.
    Syntax,
    /// A path segment that names nothing in the model.
    UnknownSegment,
    /// A segment that exists but cannot follow the previous one.
    InvalidSegment,
    UnknownProperty,
    UnknownFunction,
    /// Key predicate does not supply exactly the key properties.
    KeyMismatch,
    /// Operands or arguments of incompatible types.
    TypeMismatch,
    InvalidLiteral,
    InvalidOption,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ParseErrorKind::Syntax => "syntax error",
            ParseErrorKind::UnknownSegment => "unknown segment",
            ParseErrorKind::InvalidSegment => "invalid segment",
            ParseErrorKind::UnknownProperty => "unknown property",
            ParseErrorKind::UnknownFunction => "unknown function",
            ParseErrorKind::KeyMismatch => "key mismatch",
            ParseErrorKind::TypeMismatch => "type mismatch",
            ParseErrorKind::InvalidLiteral => "invalid literal",
            ParseErrorKind::InvalidOption => "invalid query option",
        };
        f.write_str(label)
    }
}

/// The first problem found in a request URI.
///
/// `component` is `path` or the query option name (`$filter`, ...).
/// `position` is a byte offset into the request URI when the error comes
/// from [`crate::UriParser`], and into the parsed text otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} in {component} at {position} near `{fragment}`: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub component: String,
    pub fragment: String,
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        component: impl Into<String>,
        fragment: impl Into<String>,
        position: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            component: component.into(),
            fragment: fragment.into(),
            position,
            message: message.into(),
        }
    }

    /// Move `position` into an enclosing text.
    pub(crate) fn relocated(mut self, locate: impl FnOnce(usize) -> usize) -> Self {
        self.position = locate(self.position);
        self
    }

    pub(crate) fn in_option(kind: ParseErrorKind, option: &str, value: &str, message: impl Into<String>) -> Self {
        Self::new(kind, option, value, 0, message)
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
