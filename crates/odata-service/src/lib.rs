//! OData request pipeline on top of `odata-edm` and `odata-uri`.
//!
//! An [`ODataService`] turns an [`ODataRequest`] into an [`ODataResponse`]:
//!
//! ```text
//! request ─▶ parse URI ─▶ negotiate ─▶ unmarshal body ─▶ QueryProcessor
//!                                                            │
//!            response ◀─ render / stream ◀───────────────────┘
//! ```
//!
//! The backend is any [`QueryProcessor`]. Collection results may be lazy;
//! the [`ContentStreamer`] renders them one element per chunk.

pub mod config;
pub mod error;
pub mod negotiation;
pub mod processor;
pub mod render;
pub mod request;
pub mod result;
pub mod service;
pub mod streamer;
pub mod unmarshal;
pub mod value;
pub mod xml;

pub use config::{ServiceConfig, DEFAULT_SERVICE_ROOT};
pub use error::{NegotiationError, ODataError, ProcessorError, RenderError, UnmarshalError};
pub use negotiation::{Negotiator, RendererKind, RequestContext, Selection, UnmarshallerKind};
pub use processor::{Parameter, QueryProcessor};
pub use request::{Headers, MediaRange, Method, ODataRequest};
pub use result::{LazySequence, QueryResult, ResultSource};
pub use service::{ODataResponse, ODataService, PendingStream, ResponseBody};
pub use streamer::{BufferSink, ChunkSink, ContentStreamer, RenderChunk, StreamReport, StreamState};
pub use unmarshal::Payload;
pub use value::{ODataValue, Property, StructuredValue};
