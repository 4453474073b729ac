//! Content negotiation.
//!
//! Every registered candidate gets an integer score for the request; zero
//! means "not applicable". The highest score wins and ties go to the
//! candidate registered first. Scores are a pure function of
//! [`RequestContext`].
//!
//! A score is built from three parts:
//!
//! | part | value |
//! |---|---|
//! | method and target shape | gate: 0 if the candidate does not handle them |
//! | media type match | 80 exact, 40 `type/*`, 20 `*/*` or no header, times `q` |
//! | specialisation | +100 when the candidate is specific to the target shape |
//!
//! So `POST Customers(2)/ODataDemo.ODataDemoAction` with
//! `Content-Type: application/xml` scores 180 for the Atom action
//! unmarshaller and 0 for the entity unmarshallers.

use odata_uri::{ODataUri, Target};
use serde::Serialize;

use crate::error::NegotiationError;
use crate::request::{MediaRange, Method};

pub const EXACT_MATCH: u32 = 80;
pub const SUBTYPE_WILDCARD: u32 = 40;
pub const FULL_WILDCARD: u32 = 20;
pub const SHAPE_BONUS: u32 = 100;

pub const JSON: &str = "application/json";
pub const ATOM: &str = "application/atom+xml";
pub const XML: &str = "application/xml";
pub const TEXT: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Everything scoring looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub method: Method,
    pub uri: &'a ODataUri,
    pub accept: Option<&'a str>,
    pub content_type: Option<&'a str>,
}

impl<'a> RequestContext<'a> {
    /// Ranges the response may use. `$format` overrides `Accept`.
    fn response_preferences(&self) -> Vec<MediaRange> {
        if let Some(format) = &self.uri.options.format {
            return MediaRange::parse(format.media_type())
                .map(|r| vec![r])
                .unwrap_or_default();
        }
        match self.accept.map(MediaRange::parse_list) {
            Some(ranges) if !ranges.is_empty() => ranges,
            _ => vec![MediaRange::any()],
        }
    }

    fn request_media(&self) -> Vec<MediaRange> {
        match self.content_type.and_then(MediaRange::parse) {
            Some(range) => vec![MediaRange { q: 1.0, ..range }],
            None => vec![MediaRange::any()],
        }
    }
}

/// Best weighted match of `supported` against `preferences`.
///
/// For each supported type the most specific matching range decides its
/// quality, so `application/json;q=0, */*` excludes JSON.
fn media_score(supported: &[&str], preferences: &[MediaRange]) -> u32 {
    supported
        .iter()
        .filter_map(|media| {
            let (kind, subtype) = media.split_once('/')?;
            preferences
                .iter()
                .filter_map(|range| {
                    let base = if range.kind == "*" && range.subtype == "*" {
                        FULL_WILDCARD
                    } else if range.kind == kind && range.subtype == "*" {
                        SUBTYPE_WILDCARD
                    } else if range.kind == kind && range.subtype == subtype {
                        EXACT_MATCH
                    } else {
                        return None;
                    };
                    Some((base, range.q))
                })
                .max_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)))
                .map(|(base, q)| (base as f32 * q).round() as u32)
        })
        .max()
        .unwrap_or(0)
}

pub(crate) fn target_label(target: &Target) -> String {
    match target {
        Target::ServiceDocument => "the service document".to_string(),
        Target::Metadata => "the metadata document".to_string(),
        Target::EntityCollection { entity_type } => format!("a collection of {entity_type}"),
        Target::Entity { entity_type } => format!("a single {entity_type}"),
        Target::Property { name, .. } => format!("property `{name}`"),
        Target::Value { .. } => "a raw value".to_string(),
        Target::Count => "a count".to_string(),
        Target::Action { operation, .. } => format!("action `{operation}`"),
    }
}

// ============================================================================
// Renderers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Json,
    Atom,
    Metadata,
    RawValue,
    /// Plain XML for property values, operation results and the service
    /// document.
    Xml,
}

impl RendererKind {
    pub fn name(self) -> &'static str {
        match self {
            RendererKind::Json => "json",
            RendererKind::Atom => "atom",
            RendererKind::Metadata => "metadata",
            RendererKind::RawValue => "raw",
            RendererKind::Xml => "xml",
        }
    }

    pub fn media_types(self) -> &'static [&'static str] {
        match self {
            RendererKind::Json => &[JSON],
            RendererKind::Atom => &[ATOM, XML],
            RendererKind::Metadata => &[XML],
            RendererKind::RawValue => &[TEXT, OCTET_STREAM],
            RendererKind::Xml => &[XML],
        }
    }

    /// Whether the candidate can produce a response for this method and
    /// target, regardless of media type.
    pub fn handles(self, method: Method, target: &Target) -> bool {
        let read = method == Method::Get;
        let create = method == Method::Post && matches!(target, Target::EntityCollection { .. });
        match self {
            RendererKind::Json => match target {
                Target::ServiceDocument
                | Target::Property { .. }
                | Target::Entity { .. } => read,
                Target::EntityCollection { .. } => read || create,
                Target::Action { return_type, .. } => {
                    method == Method::Post && return_type.is_some()
                }
                Target::Metadata | Target::Value { .. } | Target::Count => false,
            },
            RendererKind::Atom => match target {
                Target::Entity { .. } => read,
                Target::EntityCollection { .. } => read || create,
                _ => false,
            },
            RendererKind::Metadata => read && *target == Target::Metadata,
            RendererKind::RawValue => read && matches!(target, Target::Value { .. } | Target::Count),
            RendererKind::Xml => match target {
                Target::ServiceDocument | Target::Property { .. } => read,
                Target::Action { return_type, .. } => {
                    method == Method::Post && return_type.is_some()
                }
                _ => false,
            },
        }
    }

    fn bonus(self, target: &Target) -> u32 {
        match (self, target) {
            (RendererKind::Metadata, Target::Metadata) => SHAPE_BONUS,
            (RendererKind::RawValue, Target::Value { .. } | Target::Count) => SHAPE_BONUS,
            _ => 0,
        }
    }

    pub fn score(self, ctx: &RequestContext<'_>) -> u32 {
        if !self.handles(ctx.method, &ctx.uri.target) {
            return 0;
        }
        match media_score(self.media_types(), &ctx.response_preferences()) {
            0 => 0,
            media => media + self.bonus(&ctx.uri.target),
        }
    }

    /// The media type to answer with, given what the client accepts.
    pub fn response_media_type(self, ctx: &RequestContext<'_>) -> &'static str {
        match (self, &ctx.uri.target) {
            (RendererKind::RawValue, Target::Value { primitive })
                if matches!(
                    primitive,
                    odata_edm::PrimitiveType::Binary | odata_edm::PrimitiveType::Stream
                ) =>
            {
                OCTET_STREAM
            }
            (RendererKind::RawValue, _) => TEXT,
            (RendererKind::Atom, Target::Entity { .. } | Target::EntityCollection { .. }) => {
                let prefs = ctx.response_preferences();
                if media_score(&[XML], &prefs) > media_score(&[ATOM], &prefs) {
                    XML
                } else {
                    ATOM
                }
            }
            (kind, _) => kind.media_types()[0],
        }
    }
}

// ============================================================================
// Unmarshallers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmarshallerKind {
    JsonEntity,
    AtomEntity,
    JsonAction,
    AtomAction,
}

impl UnmarshallerKind {
    pub fn name(self) -> &'static str {
        match self {
            UnmarshallerKind::JsonEntity => "json entity",
            UnmarshallerKind::AtomEntity => "atom entity",
            UnmarshallerKind::JsonAction => "json action",
            UnmarshallerKind::AtomAction => "atom action",
        }
    }

    pub fn media_types(self) -> &'static [&'static str] {
        match self {
            UnmarshallerKind::JsonEntity | UnmarshallerKind::JsonAction => &[JSON],
            UnmarshallerKind::AtomEntity | UnmarshallerKind::AtomAction => &[ATOM, XML],
        }
    }

    pub fn handles(self, method: Method, target: &Target) -> bool {
        match self {
            UnmarshallerKind::JsonEntity | UnmarshallerKind::AtomEntity => match target {
                Target::EntityCollection { .. } => method == Method::Post,
                Target::Entity { .. } => matches!(method, Method::Put | Method::Patch),
                _ => false,
            },
            UnmarshallerKind::JsonAction | UnmarshallerKind::AtomAction => {
                method == Method::Post && matches!(target, Target::Action { .. })
            }
        }
    }

    fn bonus(self, target: &Target) -> u32 {
        match (self, target) {
            (UnmarshallerKind::JsonAction | UnmarshallerKind::AtomAction, Target::Action { .. }) => {
                SHAPE_BONUS
            }
            _ => 0,
        }
    }

    pub fn score(self, ctx: &RequestContext<'_>) -> u32 {
        if !self.handles(ctx.method, &ctx.uri.target) {
            return 0;
        }
        match media_score(self.media_types(), &ctx.request_media()) {
            0 => 0,
            media => media + self.bonus(&ctx.uri.target),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<K> {
    pub kind: K,
    pub score: u32,
}

/// The registered candidates, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiator {
    renderers: Vec<RendererKind>,
    unmarshallers: Vec<UnmarshallerKind>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self {
            renderers: vec![
                RendererKind::Json,
                RendererKind::Atom,
                RendererKind::Metadata,
                RendererKind::RawValue,
                RendererKind::Xml,
            ],
            unmarshallers: vec![
                UnmarshallerKind::JsonEntity,
                UnmarshallerKind::AtomEntity,
                UnmarshallerKind::JsonAction,
                UnmarshallerKind::AtomAction,
            ],
        }
    }
}

impl Negotiator {
    pub fn new(renderers: Vec<RendererKind>, unmarshallers: Vec<UnmarshallerKind>) -> Self {
        Self {
            renderers,
            unmarshallers,
        }
    }

    pub fn renderers(&self) -> &[RendererKind] {
        &self.renderers
    }

    pub fn unmarshallers(&self) -> &[UnmarshallerKind] {
        &self.unmarshallers
    }

    pub fn select_renderer(
        &self,
        ctx: &RequestContext<'_>,
    ) -> Result<Selection<RendererKind>, NegotiationError> {
        let scored: Vec<(RendererKind, u32)> =
            self.renderers.iter().map(|&r| (r, r.score(ctx))).collect();
        let selection = pick(&scored).ok_or_else(|| {
            let any_handles = self
                .renderers
                .iter()
                .any(|r| r.handles(ctx.method, &ctx.uri.target));
            rejection(ctx, any_handles, "renderer", || {
                ctx.uri
                    .options
                    .format
                    .as_ref()
                    .map(|f| f.media_type().to_string())
                    .or_else(|| ctx.accept.map(str::to_string))
                    .unwrap_or_else(|| "*/*".to_string())
            })
        })?;
        tracing::debug!(
            renderer = selection.kind.name(),
            score = selection.score,
            method = %ctx.method,
            "selected renderer"
        );
        Ok(selection)
    }

    pub fn select_unmarshaller(
        &self,
        ctx: &RequestContext<'_>,
    ) -> Result<Selection<UnmarshallerKind>, NegotiationError> {
        let scored: Vec<(UnmarshallerKind, u32)> =
            self.unmarshallers.iter().map(|&u| (u, u.score(ctx))).collect();
        let selection = pick(&scored).ok_or_else(|| {
            let any_handles = self
                .unmarshallers
                .iter()
                .any(|u| u.handles(ctx.method, &ctx.uri.target));
            rejection(ctx, any_handles, "unmarshaller", || {
                ctx.content_type.unwrap_or("*/*").to_string()
            })
        })?;
        tracing::debug!(
            unmarshaller = selection.kind.name(),
            score = selection.score,
            method = %ctx.method,
            "selected unmarshaller"
        );
        Ok(selection)
    }
}

/// Strictly highest non-zero score; the earliest candidate wins a tie.
fn pick<K: Copy>(scored: &[(K, u32)]) -> Option<Selection<K>> {
    let mut best: Option<Selection<K>> = None;
    for &(kind, score) in scored {
        if score == 0 {
            continue;
        }
        if best.map_or(true, |b| score > b.score) {
            best = Some(Selection { kind, score });
        }
    }
    best
}

fn rejection(
    ctx: &RequestContext<'_>,
    any_handles: bool,
    role: &'static str,
    media: impl FnOnce() -> String,
) -> NegotiationError {
    if any_handles {
        NegotiationError::UnsupportedMediaType {
            role,
            media_type: media(),
            target: target_label(&ctx.uri.target),
        }
    } else {
        NegotiationError::MethodNotAllowed {
            method: ctx.method,
            target: target_label(&ctx.uri.target),
        }
    }
}
