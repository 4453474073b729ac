//! Response renderers.
//!
//! Single values are rendered into one buffer. Collections go through a
//! [`StreamRenderer`] so that the same code serves buffered and chunked
//! responses.

pub mod atom;
pub mod json;
pub mod metadata;
pub mod raw;
pub mod shape;
pub mod xml;

use std::sync::Arc;

use odata_edm::{EntityDataModel, OperationKind, PrimitiveType, TypeRef};
use odata_uri::{ODataUri, PathSegment, SelectItem, Target};

use crate::error::RenderError;
use crate::negotiation::RendererKind;
use crate::request::Headers;
use crate::streamer::StreamRenderer;
use crate::value::ODataValue;

pub const ODATA_VERSION: &str = "4.0";

/// A streaming renderer that can be moved to another thread.
pub type BoxedStreamRenderer = Box<dyn StreamRenderer + Send>;

pub(crate) fn content_headers(media_type: &str) -> Headers {
    vec![
        ("Content-Type".to_string(), media_type.to_string()),
        ("OData-Version".to_string(), ODATA_VERSION.to_string()),
    ]
}

/// Everything a renderer needs to know about the request.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub model: &'a Arc<EntityDataModel>,
    pub uri: &'a ODataUri,
    /// Absolute service root without a trailing slash.
    pub service_root: &'a str,
    /// Negotiated response media type.
    pub media_type: &'static str,
}

/// What the response body declares itself to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    pub declared: TypeRef,
    pub nullable: bool,
    /// Context URL, e.g. `http://host/odata.svc/$metadata#Customers/$entity`.
    pub context: String,
    /// A single entity: rendered as an entry / top-level object.
    pub entity: bool,
}

impl<'a> RenderContext<'a> {
    /// Shape of a read or action response.
    pub fn shape(&self) -> Option<Shape> {
        let (declared, nullable) = match &self.uri.target {
            Target::EntityCollection { entity_type } => (TypeRef::collection(entity_type.clone()), false),
            Target::Entity { entity_type } => (TypeRef::single(entity_type.clone()), false),
            Target::Property { type_ref, .. } => {
                // Function results addressed as properties have no declared
                // nullability.
                let declared = match self.uri.segments.last() {
                    Some(PathSegment::Property { nullable, .. }) => *nullable,
                    _ => true,
                };
                (type_ref.clone(), declared && !type_ref.collection)
            }
            Target::Value { primitive } => (TypeRef::primitive(*primitive), false),
            Target::Count => (TypeRef::primitive(PrimitiveType::Int64), false),
            Target::Action {
                return_type: Some(rt),
                ..
            } => (rt.clone(), !rt.collection),
            Target::Action { return_type: None, .. }
            | Target::ServiceDocument
            | Target::Metadata => return None,
        };
        let entity = !declared.collection && self.is_entity_type(&declared.type_name);
        Some(Shape {
            context: self.context_for(&declared, entity),
            declared,
            nullable,
            entity,
        })
    }

    /// Shape of the entity returned by a create on an entity collection.
    pub fn created_shape(&self) -> Option<Shape> {
        let Target::EntityCollection { entity_type } = &self.uri.target else {
            return None;
        };
        let declared = TypeRef::single(entity_type.clone());
        Some(Shape {
            context: self.context_for(&declared, true),
            declared,
            nullable: false,
            entity: true,
        })
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/$metadata", self.service_root)
    }

    fn is_entity_type(&self, name: &str) -> bool {
        self.model.resolve(name).is_some_and(|t| t.is_entity())
    }

    fn context_for(&self, declared: &TypeRef, single_entity: bool) -> String {
        let element_is_entity = self.is_entity_type(&declared.type_name);
        let fragment = if element_is_entity {
            let mut fragment = self.entity_fragment(declared);
            fragment.push_str(&self.select_suffix());
            if single_entity && self.uri.entity_set.is_some() {
                fragment.push_str("/$entity");
            }
            fragment
        } else if matches!(self.uri.segments.last(), Some(PathSegment::Property { .. })) {
            self.uri.canonical_path()
        } else {
            declared.to_string()
        };
        format!("{}#{}", self.metadata_url(), fragment)
    }

    /// `Customers`, `Customers/ODataDemo.VipCustomer`, or the type itself
    /// when the entities do not belong to a known set.
    fn entity_fragment(&self, declared: &TypeRef) -> String {
        let set_type = self
            .uri
            .entity_set
            .as_deref()
            .and_then(|set| self.model.entity_set_descriptor(set));
        match set_type {
            Some(set) if set.entity_type == declared.type_name => set.name.clone(),
            Some(set) => format!("{}/{}", set.name, declared.type_name),
            None => declared.to_string(),
        }
    }

    fn select_suffix(&self) -> String {
        let select = &self.uri.options.select;
        if select.is_empty() {
            return String::new();
        }
        let items: Vec<String> = select
            .iter()
            .map(|item| match item {
                SelectItem::All => "*".to_string(),
                SelectItem::Path(path) => path.join("/"),
            })
            .collect();
        format!("({})", items.join(","))
    }
}

/// What a service document lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceEntryKind {
    EntitySet,
    FunctionImport,
}

/// Entity sets, then function imports, in model order. Action imports are
/// only reachable by POST and are not listed.
pub(crate) fn service_entries(model: &EntityDataModel) -> Vec<(&str, ServiceEntryKind)> {
    let sets = model
        .entity_sets()
        .map(|set| (set.name.as_str(), ServiceEntryKind::EntitySet));
    let functions = model
        .operation_imports()
        .filter(|import| {
            model
                .operation_import(&import.name)
                .is_some_and(|(_, op)| op.kind == OperationKind::Function)
        })
        .map(|import| (import.name.as_str(), ServiceEntryKind::FunctionImport));
    sets.chain(functions).collect()
}

// ============================================================================
// Dispatch
// ============================================================================

/// The service document in the negotiated format.
pub fn render_service_document(
    kind: RendererKind,
    ctx: &RenderContext<'_>,
) -> Result<Vec<u8>, RenderError> {
    match kind {
        RendererKind::Json => json::render_service_document(ctx),
        RendererKind::Xml => xml::render_service_document(ctx),
        RendererKind::Atom | RendererKind::Metadata | RendererKind::RawValue => {
            Err(RenderError::Unsupported {
                renderer: kind.name(),
                what: "the service document".to_string(),
            })
        }
    }
}

/// Render one value as a complete document.
pub fn render_single(
    kind: RendererKind,
    ctx: &RenderContext<'_>,
    shape: &Shape,
    value: &ODataValue,
) -> Result<Vec<u8>, RenderError> {
    shape::check_value(ctx.model, "$", &shape.declared, shape.nullable, value)?;
    match kind {
        RendererKind::Json => json::render_single(ctx, shape, value),
        RendererKind::Atom | RendererKind::Xml if shape.entity => {
            atom::render_entry_document(ctx, shape, value)
        }
        RendererKind::Xml => xml::render_value_document(ctx, shape, value),
        RendererKind::RawValue => raw::render_raw(value),
        RendererKind::Atom | RendererKind::Metadata => Err(RenderError::Unsupported {
            renderer: kind.name(),
            what: shape.declared.to_string(),
        }),
    }
}

/// A streaming renderer for a collection-shaped response.
pub fn collection_renderer(
    kind: RendererKind,
    ctx: &RenderContext<'_>,
    shape: &Shape,
    count: Option<u64>,
) -> Result<BoxedStreamRenderer, RenderError> {
    if !shape.declared.collection {
        return Err(RenderError::ShapeMismatch {
            path: "$".to_string(),
            expected: shape.declared.to_string(),
            found: "a collection".to_string(),
        });
    }
    let count = count.filter(|_| ctx.uri.options.count);
    let element = shape.declared.element();
    match kind {
        RendererKind::Json => Ok(Box::new(Checked::new(
            json::JsonCollection::new(ctx, shape, count),
            ctx.model,
            element,
        ))),
        RendererKind::Atom | RendererKind::Xml if ctx.is_entity_type(&shape.declared.type_name) => {
            Ok(Box::new(Checked::new(
                atom::AtomFeed::new(ctx, shape, count),
                ctx.model,
                element,
            )))
        }
        RendererKind::Xml => Ok(Box::new(Checked::new(
            xml::XmlCollection::new(ctx, shape),
            ctx.model,
            element,
        ))),
        RendererKind::Atom | RendererKind::Metadata | RendererKind::RawValue => {
            Err(RenderError::Unsupported {
                renderer: kind.name(),
                what: shape.declared.to_string(),
            })
        }
    }
}

/// Validates every element against the declared element type before the
/// wrapped renderer sees it.
struct Checked<R> {
    inner: R,
    model: Arc<EntityDataModel>,
    element: TypeRef,
    index: usize,
}

impl<R: StreamRenderer> Checked<R> {
    fn new(inner: R, model: &Arc<EntityDataModel>, element: TypeRef) -> Self {
        Self {
            inner,
            model: Arc::clone(model),
            element,
            index: 0,
        }
    }

    fn check(&mut self, value: &ODataValue) -> Result<(), RenderError> {
        let path = format!("$[{}]", self.index);
        self.index += 1;
        shape::check_value(&self.model, &path, &self.element, false, value)
    }
}

impl<R: StreamRenderer> StreamRenderer for Checked<R> {
    fn headers(&self) -> Headers {
        self.inner.headers()
    }

    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
        self.check(first)?;
        self.inner.start(first)
    }

    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
        self.check(element)?;
        self.inner.body(element)
    }

    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
        self.inner.end(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_edm::demo_model;
    use odata_uri::parse_uri;

    fn context_of(raw: &str) -> String {
        let model = Arc::new(demo_model().expect("demo model"));
        let uri = parse_uri(raw, &model).expect("uri");
        let ctx = RenderContext {
            model: &model,
            uri: &uri,
            service_root: "http://host/odata.svc",
            media_type: crate::negotiation::JSON,
        };
        ctx.shape().expect("shape").context
    }

    #[test]
    fn collection_elements_are_checked_before_rendering() {
        use crate::result::LazySequence;
        use crate::streamer::{BufferSink, ContentStreamer};
        use crate::value::StructuredValue;

        let model = Arc::new(demo_model().expect("demo model"));
        let uri = parse_uri("/odata.svc/Customers", &model).expect("uri");
        let ctx = RenderContext {
            model: &model,
            uri: &uri,
            service_root: "http://host/odata.svc",
            media_type: crate::negotiation::JSON,
        };
        let shape = ctx.shape().expect("shape");
        let renderer = collection_renderer(RendererKind::Json, &ctx, &shape, None).expect("renderer");
        let source = LazySequence::from_values(vec![
            StructuredValue::new("ODataDemo.Customer").with("id", 1i64).into(),
            StructuredValue::new("ODataDemo.Order").with("id", 2i64).into(),
        ]);

        let mut sink = BufferSink::default();
        let err = ContentStreamer::new(renderer)
            .run(source, &mut sink)
            .expect_err("order in a customer feed");
        assert!(matches!(
            err,
            crate::error::ODataError::Render(RenderError::ShapeMismatch { ref path, .. }) if path == "$[1]"
        ));
        assert_eq!(sink.chunks, 1);
    }

    #[test]
    fn context_urls() {
        let root = "http://host/odata.svc/$metadata#";
        assert_eq!(context_of("/odata.svc/Customers"), format!("{root}Customers"));
        assert_eq!(
            context_of("/odata.svc/Customers(1)"),
            format!("{root}Customers/$entity")
        );
        assert_eq!(
            context_of("/odata.svc/Customers?$select=id,name"),
            format!("{root}Customers(id,name)")
        );
        assert_eq!(
            context_of("/odata.svc/Customers(1)/Phone"),
            format!("{root}Customers(1)/Phone")
        );
        assert_eq!(
            context_of("/odata.svc/Customers(1)/Orders"),
            format!("{root}Orders")
        );
        assert_eq!(
            context_of("/odata.svc/Customers(2)/ODataDemo.ODataDemoAction"),
            format!("{root}Edm.String")
        );
    }
}
