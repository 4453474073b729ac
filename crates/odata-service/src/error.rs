use odata_uri::ParseError;
use thiserror::Error;

use crate::request::Method;

/// No registered renderer or unmarshaller scored above zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("method {method} is not allowed on {target}")]
    MethodNotAllowed { method: Method, target: String },
    #[error("no {role} for media type `{media_type}` on {target}")]
    UnsupportedMediaType {
        role: &'static str,
        media_type: String,
        target: String,
    },
}

/// A value does not match the type the response declares.
///
/// Raised before the bytes of the offending fragment are produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("expected {expected} at `{path}`, found {found}")]
    ShapeMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("null value for non-nullable `{path}`")]
    NullNotAllowed { path: String },
    #[error("`{type_name}` has no property `{property}`")]
    UnknownProperty { type_name: String, property: String },
    #[error("{renderer} renderer cannot write {what}")]
    Unsupported { renderer: &'static str, what: String },
    #[error("xml output: {0}")]
    Xml(String),
    #[error("json output: {0}")]
    Json(String),
}

impl RenderError {
    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        RenderError::Xml(err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Json(err.to_string())
    }
}

/// A request body could not be decoded against the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnmarshalError {
    #[error("malformed {format} body: {message}")]
    Malformed { format: &'static str, message: String },
    #[error("`{type_name}` has no property `{property}`")]
    UnknownProperty { type_name: String, property: String },
    #[error("`{operation}` has no parameter `{parameter}`")]
    UnknownParameter { operation: String, parameter: String },
    #[error("missing value for `{name}`")]
    Missing { name: String },
    #[error("invalid value for `{name}`: expected {expected}")]
    InvalidValue { name: String, expected: String },
}

/// Failure reported by the query processor. Carried to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub status: u16,
    pub message: String,
}

impl ProcessorError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(501, message)
    }
}

#[derive(Debug, Error)]
pub enum ODataError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Unmarshal(#[from] UnmarshalError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("no resource at {0}")]
    NotFound(String),
    #[error("writing the response failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ODataError {
    /// HTTP status code reported to the client.
    pub fn status(&self) -> u16 {
        match self {
            ODataError::Parse(_) | ODataError::Unmarshal(_) => 400,
            ODataError::NotFound(_) => 404,
            ODataError::Negotiation(NegotiationError::MethodNotAllowed { .. }) => 405,
            ODataError::Negotiation(NegotiationError::UnsupportedMediaType { .. }) => 415,
            ODataError::Render(_) | ODataError::Io(_) => 500,
            ODataError::Processor(e) => e.status,
        }
    }

    /// Short machine-readable code for the error payload.
    pub fn code(&self) -> &'static str {
        match self {
            ODataError::Parse(_) => "ParseError",
            ODataError::Negotiation(_) => "NegotiationError",
            ODataError::Unmarshal(_) => "UnmarshalError",
            ODataError::Render(_) => "RenderError",
            ODataError::Processor(_) => "ProcessorError",
            ODataError::NotFound(_) => "NotFound",
            ODataError::Io(_) => "IoError",
        }
    }
}
