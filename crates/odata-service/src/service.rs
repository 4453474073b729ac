//! The request pipeline: parse, negotiate, decode, call the processor,
//! render.
//!
//! Negotiation happens before the processor is called, so a request that
//! cannot be answered in an acceptable format never reaches the backend.

use std::fmt;
use std::sync::Arc;

use odata_edm::EntityDataModel;
use odata_uri::{ODataUri, ParseError, Target, UriParser, UriParserConfig};
use serde_json::json;

use crate::config::ServiceConfig;
use crate::error::{NegotiationError, ODataError, RenderError};
use crate::negotiation::{target_label, Negotiator, RendererKind, RequestContext, Selection, JSON};
use crate::processor::QueryProcessor;
use crate::render::{self, content_headers, BoxedStreamRenderer, RenderContext, Shape, ODATA_VERSION};
use crate::request::{Headers, Method, ODataRequest};
use crate::result::{LazySequence, QueryResult};
use crate::streamer::{BufferSink, ChunkSink, ContentStreamer, StreamReport};
use crate::unmarshal::{self, Payload};
use crate::value::ODataValue;

// ============================================================================
// Responses
// ============================================================================

/// A collection whose elements have not been pulled yet.
pub struct PendingStream {
    renderer: BoxedStreamRenderer,
    sequence: LazySequence,
}

impl PendingStream {
    /// Drive the stream into `sink`. Headers arrive with the first chunk.
    pub fn write_to<S: ChunkSink + ?Sized>(self, sink: &mut S) -> Result<StreamReport, ODataError> {
        ContentStreamer::new(self.renderer).run(self.sequence, sink)
    }
}

impl fmt::Debug for PendingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingStream")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Full(Vec<u8>),
    Stream(PendingStream),
}

#[derive(Debug)]
pub struct ODataResponse {
    pub status: u16,
    /// For streamed bodies these are only the headers common to every
    /// response; content headers come with the first chunk.
    pub headers: Headers,
    pub body: ResponseBody,
}

impl ODataResponse {
    fn full(status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Full(body),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            headers: vec![("OData-Version".to_string(), ODATA_VERSION.to_string())],
            body: ResponseBody::Empty,
        }
    }

    fn stream(renderer: BoxedStreamRenderer, sequence: LazySequence) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: ResponseBody::Stream(PendingStream { renderer, sequence }),
        }
    }

    /// The JSON error payload for `err`.
    pub fn error(err: &ODataError) -> Self {
        let status = err.status();
        if status >= 500 {
            tracing::error!(status, code = err.code(), error = %err, "request failed");
        } else {
            tracing::debug!(status, code = err.code(), error = %err, "request rejected");
        }
        let payload = json!({ "error": { "code": err.code(), "message": err.to_string() } });
        Self::full(status, content_headers(JSON), payload.to_string().into_bytes())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Drain a streamed body into memory. Other bodies pass through.
    pub fn buffered(self) -> Result<ODataResponse, ODataError> {
        let ResponseBody::Stream(pending) = self.body else {
            return Ok(self);
        };
        let mut sink = BufferSink::default();
        pending.write_to(&mut sink)?;
        let mut headers = self.headers;
        headers.extend(sink.headers.unwrap_or_default());
        Ok(Self::full(self.status, headers, sink.body))
    }

    /// Body bytes of a non-streamed response.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Empty | ResponseBody::Stream(_) => &[],
        }
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct ODataService<P> {
    model: Arc<EntityDataModel>,
    processor: P,
    config: ServiceConfig,
    negotiator: Negotiator,
}

impl<P: QueryProcessor> ODataService<P> {
    pub fn new(model: Arc<EntityDataModel>, processor: P) -> Self {
        Self {
            model,
            processor,
            config: ServiceConfig::default(),
            negotiator: Negotiator::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn model(&self) -> &Arc<EntityDataModel> {
        &self.model
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Parse a request target with this service's root and limits.
    pub fn parse(&self, target: &str) -> Result<ODataUri, ParseError> {
        let config = UriParserConfig {
            root_path: Some(self.config.root_path()),
            max_top: self.config.max_top,
        };
        UriParser::with_config(&self.model, config).parse(target)
    }

    /// Answer `request`. Failures become JSON error responses.
    pub fn handle(&self, request: &ODataRequest) -> ODataResponse {
        match self.process(request) {
            Ok(response) => response,
            Err(err) => ODataResponse::error(&err),
        }
    }

    pub fn process(&self, request: &ODataRequest) -> Result<ODataResponse, ODataError> {
        let uri = self.parse(&request.target)?;
        let ctx = RequestContext {
            method: request.method,
            uri: &uri,
            accept: request.accept(),
            content_type: request.content_type(),
        };
        tracing::debug!(method = %request.method, path = %uri.canonical_path(), "dispatching request");

        match (request.method, &uri.target) {
            (Method::Get, _) => {
                let renderer = self.negotiator.select_renderer(&ctx)?;
                let rctx = self.render_context(&ctx, renderer);
                match uri.target {
                    Target::Metadata => {
                        let body = render::metadata::render_metadata(&self.model)?;
                        Ok(ODataResponse::full(200, content_headers(rctx.media_type), body))
                    }
                    Target::ServiceDocument => {
                        let body = render::render_service_document(renderer.kind, &rctx)?;
                        Ok(ODataResponse::full(200, content_headers(rctx.media_type), body))
                    }
                    _ => {
                        let result = self.processor.query(&uri)?;
                        self.respond(&ctx, renderer, result)
                    }
                }
            }
            (Method::Post, Target::EntityCollection { .. }) => {
                let decoder = self.negotiator.select_unmarshaller(&ctx)?;
                let renderer = self.negotiator.select_renderer(&ctx)?;
                let Payload::Entity(entity) =
                    unmarshal::unmarshal(decoder.kind, &self.model, &uri, &request.body)?
                else {
                    return Err(method_not_allowed(&ctx));
                };
                let result = self.processor.create(&uri, entity)?;
                self.respond_created(&ctx, renderer, result)
            }
            (Method::Post, Target::Action { return_type, .. }) => {
                let decoder = self.negotiator.select_unmarshaller(&ctx)?;
                let renderer = match return_type {
                    Some(_) => Some(self.negotiator.select_renderer(&ctx)?),
                    None => None,
                };
                let Payload::Parameters(parameters) =
                    unmarshal::unmarshal(decoder.kind, &self.model, &uri, &request.body)?
                else {
                    return Err(method_not_allowed(&ctx));
                };
                let result = self.processor.invoke_operation(&uri, parameters)?;
                match renderer {
                    Some(renderer) => self.respond(&ctx, renderer, result),
                    None => {
                        discard(result);
                        Ok(ODataResponse::no_content())
                    }
                }
            }
            (Method::Put | Method::Patch, Target::Entity { .. }) => {
                let decoder = self.negotiator.select_unmarshaller(&ctx)?;
                let Payload::Entity(entity) =
                    unmarshal::unmarshal(decoder.kind, &self.model, &uri, &request.body)?
                else {
                    return Err(method_not_allowed(&ctx));
                };
                self.processor
                    .update(&uri, entity, request.method == Method::Patch)?;
                Ok(ODataResponse::no_content())
            }
            (Method::Delete, Target::Entity { .. }) => {
                self.processor.delete(&uri)?;
                Ok(ODataResponse::no_content())
            }
            _ => Err(method_not_allowed(&ctx)),
        }
    }

    fn render_context<'a>(
        &'a self,
        ctx: &RequestContext<'a>,
        renderer: Selection<RendererKind>,
    ) -> RenderContext<'a> {
        RenderContext {
            model: &self.model,
            uri: ctx.uri,
            service_root: self.config.root(),
            media_type: renderer.kind.response_media_type(ctx),
        }
    }

    fn respond(
        &self,
        ctx: &RequestContext<'_>,
        renderer: Selection<RendererKind>,
        result: QueryResult,
    ) -> Result<ODataResponse, ODataError> {
        let rctx = self.render_context(ctx, renderer);
        let Some(shape) = rctx.shape() else {
            discard(result);
            return Ok(ODataResponse::no_content());
        };
        self.render_result(renderer.kind, &rctx, &shape, result, 200)
    }

    fn respond_created(
        &self,
        ctx: &RequestContext<'_>,
        renderer: Selection<RendererKind>,
        result: QueryResult,
    ) -> Result<ODataResponse, ODataError> {
        let rctx = self.render_context(ctx, renderer);
        let Some(shape) = rctx.created_shape() else {
            discard(result);
            return Ok(ODataResponse::no_content());
        };
        let location = match &result {
            QueryResult::Single(ODataValue::Structured(entity)) => {
                render::atom::entity_path(&self.model, ctx.uri.entity_set.as_deref(), entity)
                    .map(|path| format!("{}/{path}", rctx.service_root))
            }
            _ => None,
        };
        let mut response = self.render_result(renderer.kind, &rctx, &shape, result, 201)?;
        if let Some(location) = location {
            response.headers.push(("Location".to_string(), location));
        }
        Ok(response)
    }

    fn render_result(
        &self,
        kind: RendererKind,
        rctx: &RenderContext<'_>,
        shape: &Shape,
        result: QueryResult,
        status: u16,
    ) -> Result<ODataResponse, ODataError> {
        let not_found = || ODataError::NotFound(rctx.uri.canonical_path());
        match result {
            QueryResult::Empty if shape.declared.collection => {
                self.render_collection(kind, rctx, shape, LazySequence::from_values(Vec::new()), false)
            }
            absent @ (QueryResult::Empty | QueryResult::Single(ODataValue::Null)) => {
                match rctx.uri.target {
                    Target::Entity { .. } | Target::Value { .. } | Target::Count => Err(not_found()),
                    _ if shape.nullable => Ok(ODataResponse::no_content()),
                    _ if matches!(absent, QueryResult::Empty) => Err(not_found()),
                    _ => Err(RenderError::NullNotAllowed {
                        path: "$".to_string(),
                    }
                    .into()),
                }
            }
            QueryResult::Single(ODataValue::Collection(values)) if shape.declared.collection => {
                let sequence = LazySequence::from_values(values);
                self.render_collection(kind, rctx, shape, sequence, false)
            }
            QueryResult::Single(value) => {
                if shape.declared.collection {
                    return Err(shape_mismatch(shape, value.describe()).into());
                }
                let body = render::render_single(kind, rctx, shape, &value)?;
                Ok(ODataResponse::full(status, content_headers(rctx.media_type), body))
            }
            QueryResult::Collection { values, count } => {
                if !shape.declared.collection {
                    return Err(shape_mismatch(shape, "a collection".to_string()).into());
                }
                let count = count.unwrap_or(values.len() as u64);
                let sequence = LazySequence::from_values(values).with_count(count);
                self.render_collection(kind, rctx, shape, sequence, self.config.stream_collections)
            }
            QueryResult::Lazy(sequence) => {
                if !shape.declared.collection {
                    discard(QueryResult::Lazy(sequence));
                    return Err(shape_mismatch(shape, "a collection".to_string()).into());
                }
                self.render_collection(kind, rctx, shape, sequence, true)
            }
        }
    }

    fn render_collection(
        &self,
        kind: RendererKind,
        rctx: &RenderContext<'_>,
        shape: &Shape,
        sequence: LazySequence,
        stream: bool,
    ) -> Result<ODataResponse, ODataError> {
        let renderer = render::collection_renderer(kind, rctx, shape, sequence.count())?;
        let response = ODataResponse::stream(renderer, sequence);
        if stream {
            Ok(response)
        } else {
            response.buffered()
        }
    }
}

fn method_not_allowed(ctx: &RequestContext<'_>) -> ODataError {
    NegotiationError::MethodNotAllowed {
        method: ctx.method,
        target: target_label(&ctx.uri.target),
    }
    .into()
}

fn shape_mismatch(shape: &Shape, found: String) -> RenderError {
    RenderError::ShapeMismatch {
        path: "$".to_string(),
        expected: shape.declared.to_string(),
        found,
    }
}

/// Release a result that will not be rendered.
fn discard(result: QueryResult) {
    if let QueryResult::Lazy(sequence) = result {
        if let Err(err) = sequence.close() {
            tracing::warn!(error = %err, "closing an unused result source failed");
        }
    }
}
