//! Plain XML for responses that are not entities: property values, operation
//! results and the AtomPub service document.

use std::sync::Arc;

use odata_edm::{EntityDataModel, TypeRef};

use super::atom::{type_attribute, write_property};
use super::{content_headers, service_entries, RenderContext, ServiceEntryKind, Shape};
use crate::error::RenderError;
use crate::request::Headers;
use crate::streamer::StreamRenderer;
use crate::value::ODataValue;
use crate::xml::{XmlWriter, APP_NS, ATOM_NS, DATA_NS, METADATA_NS};

fn root_attributes(context: &str) -> [(&'static str, &str); 3] {
    [
        ("xmlns:d", DATA_NS),
        ("xmlns:m", METADATA_NS),
        ("m:context", context),
    ]
}

/// `<m:value m:context="..." m:type="...">...</m:value>`
pub fn render_value_document(
    ctx: &RenderContext<'_>,
    shape: &Shape,
    value: &ODataValue,
) -> Result<Vec<u8>, RenderError> {
    let mut w = XmlWriter::new();
    w.declaration()?;
    write_property(
        ctx.model,
        &mut w,
        "m:value",
        value,
        &shape.declared,
        &root_attributes(&shape.context),
    )?;
    Ok(w.into_bytes())
}

/// AtomPub `<service>` listing entity sets as collections and function
/// imports as `m:function-import`.
pub fn render_service_document(ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
    let base = format!("{}/", ctx.service_root);
    let context = ctx.metadata_url();
    let mut w = XmlWriter::new();
    w.declaration()?;
    w.start(
        "service",
        &[
            ("xmlns", APP_NS),
            ("xmlns:atom", ATOM_NS),
            ("xmlns:m", METADATA_NS),
            ("xml:base", base.as_str()),
            ("m:context", context.as_str()),
        ],
    )?;
    w.start("workspace", &[])?;
    w.text_element("atom:title", &[("type", "text")], "Default")?;
    for (name, kind) in service_entries(ctx.model) {
        let tag = match kind {
            ServiceEntryKind::EntitySet => "collection",
            ServiceEntryKind::FunctionImport => "m:function-import",
        };
        w.start(tag, &[("href", name)])?;
        w.text_element("atom:title", &[("type", "text")], name)?;
        w.end(tag)?;
    }
    w.end("workspace")?;
    w.end("service")?;
    Ok(w.into_bytes())
}

// ============================================================================
// Streaming collections
// ============================================================================

/// `<m:value m:type="#Collection(...)">` with one `<m:element>` per element.
pub struct XmlCollection {
    model: Arc<EntityDataModel>,
    element: TypeRef,
    context: String,
    collection_type: Option<String>,
    media_type: &'static str,
}

impl XmlCollection {
    pub fn new(ctx: &RenderContext<'_>, shape: &Shape) -> Self {
        Self {
            model: Arc::clone(ctx.model),
            element: shape.declared.element(),
            context: shape.context.clone(),
            collection_type: type_attribute(&shape.declared),
            media_type: ctx.media_type,
        }
    }

    fn head(&self, w: &mut XmlWriter) -> Result<(), RenderError> {
        w.declaration()?;
        let mut attrs = root_attributes(&self.context).to_vec();
        if let Some(t) = &self.collection_type {
            attrs.push(("m:type", t.as_str()));
        }
        w.start("m:value", &attrs)
    }

    fn element(&self, w: &mut XmlWriter, element: &ODataValue) -> Result<(), RenderError> {
        write_property(&self.model, w, "m:element", element, &self.element, &[])
    }
}

impl StreamRenderer for XmlCollection {
    fn headers(&self) -> Headers {
        content_headers(self.media_type)
    }

    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        self.head(&mut w)?;
        self.element(&mut w, first)?;
        Ok(w.into_bytes())
    }

    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        self.element(&mut w, element)?;
        Ok(w.into_bytes())
    }

    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        if last.is_none() {
            self.head(&mut w)?;
        }
        w.end("m:value")?;
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::{RendererKind, XML};
    use crate::render::{collection_renderer, render_single};
    use crate::result::LazySequence;
    use crate::streamer::{BufferSink, ContentStreamer};
    use crate::value::StructuredValue;
    use crate::xml::{parse_document, XmlNode};
    use odata_edm::demo_model;
    use odata_uri::{parse_uri, ODataUri};

    const ROOT: &str = "http://host/odata.svc";

    fn setup(raw: &str) -> (Arc<EntityDataModel>, ODataUri) {
        let model = Arc::new(demo_model().expect("demo model"));
        let uri = parse_uri(raw, &model).expect("uri");
        (model, uri)
    }

    fn ctx<'a>(model: &'a Arc<EntityDataModel>, uri: &'a ODataUri) -> RenderContext<'a> {
        RenderContext {
            model,
            uri,
            service_root: ROOT,
            media_type: XML,
        }
    }

    fn single(raw: &str, value: ODataValue) -> XmlNode {
        let (model, uri) = setup(raw);
        let ctx = ctx(&model, &uri);
        let shape = ctx.shape().expect("shape");
        let bytes = render_single(RendererKind::Xml, &ctx, &shape, &value).expect("render");
        parse_document(&String::from_utf8(bytes).expect("utf8")).expect("well formed")
    }

    fn address(city: &str) -> ODataValue {
        StructuredValue::new("ODataDemo.Address")
            .with("city", city)
            .with("country", "NZ")
            .into()
    }

    #[test]
    fn primitive_property_values() {
        let name = single("/odata.svc/Customers(1)/name", "Ann & Co".into());
        assert_eq!(name.name, "value");
        assert_eq!(name.text, "Ann & Co");
        assert_eq!(name.attribute("type"), None);
        assert_eq!(
            name.attribute("context"),
            Some("http://host/odata.svc/$metadata#Customers(1)/name")
        );

        let id = single("/odata.svc/Customers(1)/id", 1i64.into());
        assert_eq!(id.text, "1");
        assert_eq!(id.attribute("type"), Some("Int64"));
    }

    #[test]
    fn action_results_render_as_values() {
        let (model, uri) = setup("/odata.svc/Customers(2)/ODataDemo.ODataDemoAction");
        let ctx = ctx(&model, &uri);
        let shape = ctx.shape().expect("shape");
        let value = ODataValue::from("noted: hi");
        let bytes = render_single(RendererKind::Xml, &ctx, &shape, &value).expect("render");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with("<?xml"));
        assert!(text.contains(r#"m:context="http://host/odata.svc/$metadata#Edm.String""#));
        assert!(text.ends_with(">noted: hi</m:value>"));
    }

    #[test]
    fn complex_collections_stream_as_elements() {
        let (model, uri) = setup("/odata.svc/Customers(1)/address");
        let ctx = ctx(&model, &uri);
        let shape = ctx.shape().expect("shape");
        let renderer = collection_renderer(RendererKind::Xml, &ctx, &shape, None).expect("renderer");
        let source = LazySequence::from_values(vec![address("Wellington"), address("Auckland")]);

        let mut sink = BufferSink::default();
        let report = ContentStreamer::new(renderer).run(source, &mut sink).expect("stream");
        assert_eq!((report.started, report.bodies, report.ended), (1, 1, 1));

        let root = parse_document(&String::from_utf8(sink.body).expect("utf8")).expect("parse");
        assert_eq!(root.name, "value");
        assert_eq!(root.attribute("type"), Some("#Collection(ODataDemo.Address)"));
        let cities: Vec<&str> = root
            .children
            .iter()
            .filter_map(|e| e.child("city"))
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(cities, ["Wellington", "Auckland"]);
    }

    #[test]
    fn empty_collection_is_a_complete_document() {
        let (model, uri) = setup("/odata.svc/Customers(1)/Phone");
        let ctx = ctx(&model, &uri);
        let shape = ctx.shape().expect("shape");
        let mut renderer = XmlCollection::new(&ctx, &shape);
        let bytes = renderer.end(None).expect("end");
        let root = parse_document(&String::from_utf8(bytes).expect("utf8")).expect("parse");
        assert_eq!(root.attribute("type"), Some("#Collection(String)"));
        assert!(root.children.is_empty());
    }

    #[test]
    fn service_document_lists_collections_and_function_imports() {
        let (model, uri) = setup("/odata.svc/");
        let bytes = render_service_document(&ctx(&model, &uri)).expect("render");
        let root = parse_document(&String::from_utf8(bytes).expect("utf8")).expect("parse");
        assert_eq!(root.name, "service");
        assert_eq!(root.attribute("base"), Some("http://host/odata.svc/"));

        let workspace = root.child("workspace").expect("workspace");
        let hrefs = |tag: &str| -> Vec<String> {
            workspace
                .children
                .iter()
                .filter(|c| c.name == tag)
                .filter_map(|c| c.attribute("href").map(str::to_string))
                .collect()
        };
        assert_eq!(hrefs("collection"), ["Customers", "Orders"]);
        assert_eq!(hrefs("function-import"), ["GetTopCustomers"]);
    }
}
