//! Transport-neutral request and response types.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Headers = Vec<(String, String)>;

/// One inbound request as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ODataRequest {
    pub method: Method,
    /// Absolute URL or origin-form target (`/odata.svc/Customers?$top=1`).
    pub target: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ODataRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

// ============================================================================
// Media types
// ============================================================================

/// One entry of an `Accept` header, or a `Content-Type` value.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub kind: String,
    pub subtype: String,
    /// Quality weight in `0.0..=1.0`.
    pub q: f32,
}

impl MediaRange {
    /// Parse `type/subtype;param=value...`. Parameters other than `q` are
    /// dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(';');
        let essence = parts.next()?.trim().to_ascii_lowercase();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        let mut q = 1.0f32;
        for param in parts {
            if let Some((name, value)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    q = value.trim().parse::<f32>().ok()?.clamp(0.0, 1.0);
                }
            }
        }
        Some(Self {
            kind: kind.trim().to_string(),
            subtype: subtype.trim().to_string(),
            q,
        })
    }

    /// All well-formed entries of an `Accept` header, in header order.
    pub fn parse_list(header: &str) -> Vec<Self> {
        header.split(',').filter_map(Self::parse).collect()
    }

    pub fn any() -> Self {
        Self {
            kind: "*".to_string(),
            subtype: "*".to_string(),
            q: 1.0,
        }
    }

    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }
}
