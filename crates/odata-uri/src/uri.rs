use odata_edm::EntityDataModel;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use url::Url;

use crate::error::{ParseError, ParseErrorKind, Result};
use crate::options::{encoded_offset, parse_options, OptionScope, QueryOptions, RawOption};
use crate::path::{parse_resource_path, KeyValue, PathSegment, Target};

/// A fully resolved request URI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ODataUri {
    /// Path prefix of the service root, e.g. `/odata.svc`.
    pub root_path: String,
    pub segments: Vec<PathSegment>,
    pub target: Target,
    /// Entity set the addressed entities belong to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    /// Structured type the query options address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub options: QueryOptions,
}

impl ODataUri {
    pub fn is_service_document(&self) -> bool {
        self.target == Target::ServiceDocument
    }

    pub fn is_metadata(&self) -> bool {
        self.target == Target::Metadata
    }

    /// Values of the last key predicate in the path.
    pub fn key(&self) -> Option<&[KeyValue]> {
        self.segments.iter().rev().find_map(|s| match s {
            PathSegment::Key { values } => Some(values.as_slice()),
            _ => None,
        })
    }

    /// The operation or operation import segment, if the path calls one.
    pub fn operation(&self) -> Option<&PathSegment> {
        self.segments.iter().rev().find(|s| {
            matches!(
                s,
                PathSegment::Operation { .. } | PathSegment::OperationImport { .. }
            )
        })
    }

    /// Entity type addressed by an entity or entity-collection target.
    pub fn entity_type(&self) -> Option<&str> {
        match &self.target {
            Target::Entity { entity_type } | Target::EntityCollection { entity_type } => {
                Some(entity_type)
            }
            _ => None,
        }
    }

    /// The resource path with keys and parameters in canonical form,
    /// e.g. `Customers(1)/Phone`.
    pub fn canonical_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                PathSegment::Metadata => out.push_str("$metadata"),
                PathSegment::EntitySet { name, .. } => out.push_str(name),
                PathSegment::Key { values } => {
                    out.push('(');
                    out.push_str(&render_arguments(values, values.len() > 1));
                    out.push(')');
                }
                PathSegment::Navigation { name, .. } | PathSegment::Property { name, .. } => {
                    push_segment(&mut out, name)
                }
                PathSegment::TypeCast { type_name } => push_segment(&mut out, type_name),
                PathSegment::Operation {
                    operation,
                    parameters,
                    kind,
                    ..
                } => {
                    push_segment(&mut out, operation);
                    if *kind == odata_edm::OperationKind::Function {
                        out.push('(');
                        out.push_str(&render_arguments(parameters, true));
                        out.push(')');
                    }
                }
                PathSegment::OperationImport {
                    name,
                    parameters,
                    kind,
                    ..
                } => {
                    push_segment(&mut out, name);
                    if *kind == odata_edm::OperationKind::Function {
                        out.push('(');
                        out.push_str(&render_arguments(parameters, true));
                        out.push(')');
                    }
                }
                PathSegment::Count => push_segment(&mut out, "$count"),
                PathSegment::Value => push_segment(&mut out, "$value"),
            }
        }
        out
    }
}

fn push_segment(out: &mut String, segment: &str) {
    if !out.is_empty() {
        out.push('/');
    }
    out.push_str(segment);
}

fn render_arguments(values: &[KeyValue], named: bool) -> String {
    values
        .iter()
        .map(|kv| {
            if named {
                format!("{}={}", kv.name, kv.value.to_uri_string())
            } else {
                kv.value.to_uri_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parser settings that are not part of the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriParserConfig {
    /// Service root path used when no path segment ends in `.svc`.
    pub root_path: Option<String>,
    /// Upper bound for `$top`.
    pub max_top: Option<u64>,
}

pub struct UriParser<'m> {
    model: &'m EntityDataModel,
    config: UriParserConfig,
}

impl<'m> UriParser<'m> {
    pub fn new(model: &'m EntityDataModel) -> Self {
        Self::with_config(model, UriParserConfig::default())
    }

    pub fn with_config(model: &'m EntityDataModel, config: UriParserConfig) -> Self {
        Self { model, config }
    }

    /// Parse an absolute URL or an origin-form request target
    /// (`/odata.svc/Customers?$top=2`). Error positions point into `raw`.
    pub fn parse(&self, raw: &str) -> Result<ODataUri> {
        let parts = split_target(raw)?;
        let path = parts.path;
        let (root_path, resource) = split_service_root(path, self.config.root_path.as_deref());
        let resource_start = parts.path_start + (path.len() - resource.len());
        let resolved = parse_resource_path(resource, self.model)
            .map_err(|e| e.relocated(|p| resource_start + p))?;

        let pairs = query_options(parts.query, parts.query_start)?;
        let subject = resolved
            .subject
            .as_deref()
            .and_then(|name| self.model.resolve(name));
        let scope = OptionScope {
            model: self.model,
            subject,
            collection: resolved.collection,
            max_top: self.config.max_top,
        };
        let options = parse_options(&pairs, &scope)?;

        tracing::debug!(
            uri = raw,
            segments = resolved.segments.len(),
            target = ?resolved.target,
            "parsed request uri"
        );

        Ok(ODataUri {
            root_path: root_path.to_string(),
            segments: resolved.segments,
            target: resolved.target,
            entity_set: resolved.entity_set,
            subject: resolved.subject,
            options,
        })
    }
}

/// Parse `raw` with the default parser settings.
pub fn parse_uri(raw: &str, model: &EntityDataModel) -> Result<ODataUri> {
    UriParser::new(model).parse(raw)
}

/// Undecoded path and query of a request target, with their offsets in it.
#[derive(Debug, PartialEq, Eq)]
struct TargetParts<'r> {
    path: &'r str,
    path_start: usize,
    query: &'r str,
    query_start: usize,
}

fn split_target(raw: &str) -> Result<TargetParts<'_>> {
    let mut path_start = 0usize;
    if let Some(scheme_end) = raw.find("://") {
        Url::parse(raw).map_err(|e| {
            ParseError::new(ParseErrorKind::Syntax, "uri", raw, 0, e.to_string())
        })?;
        let authority = scheme_end + 3;
        path_start = raw[authority..]
            .find(['/', '?', '#'])
            .map_or(raw.len(), |i| authority + i);
    }
    let rest = &raw[path_start..];
    let rest = &rest[..rest.find('#').unwrap_or(rest.len())];
    Ok(match rest.split_once('?') {
        Some((path, query)) => TargetParts {
            path,
            path_start,
            query,
            query_start: path_start + path.len() + 1,
        },
        None => TargetParts {
            path: rest,
            path_start,
            query: "",
            query_start: path_start + rest.len(),
        },
    })
}

/// Split a query string on `&` and `=` and percent-decode each side.
/// `+` is an ordinary character here, not an encoded space.
fn query_options(query: &str, query_start: usize) -> Result<Vec<RawOption<'_>>> {
    let mut out = Vec::new();
    let mut offset = query_start;
    for part in query.split('&') {
        let start = offset;
        offset += part.len() + 1;
        if part.is_empty() {
            continue;
        }
        let (name, value) = part.split_once('=').unwrap_or((part, ""));
        let value_start = start + (part.len() - value.len());
        out.push(RawOption {
            name: decode(name, start)?,
            value: decode(value, value_start)?,
            start: value_start,
            encoded: Some(value),
        });
    }
    Ok(out)
}

fn decode(text: &str, start: usize) -> Result<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| {
            ParseError::new(
                ParseErrorKind::Syntax,
                "query",
                text,
                start + encoded_offset(text, e.valid_up_to()),
                "query option is not valid UTF-8 after percent-decoding",
            )
        })
}

/// Split the path into the service root prefix and the resource path.
fn split_service_root<'a>(path: &'a str, configured: Option<&str>) -> (&'a str, &'a str) {
    let mut offset = 0usize;
    for segment in path.split('/') {
        let end = offset + segment.len();
        if segment.ends_with(".svc") {
            let rest = path[end..].trim_start_matches('/');
            return (&path[..end], rest);
        }
        offset = end + 1;
    }
    if let Some(root) = configured {
        let root = root.trim_end_matches('/');
        if !root.is_empty() {
            if let Some(rest) = path.strip_prefix(root) {
                if rest.is_empty() || rest.starts_with('/') {
                    return (&path[..root.len()], rest.trim_start_matches('/'));
                }
            }
        }
    }
    ("", path.trim_start_matches('/'))
}
