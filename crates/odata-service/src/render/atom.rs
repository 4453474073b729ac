//! Atom format: entries and feeds with OData data/metadata namespaces.

use std::sync::Arc;

use odata_edm::{EntityDataModel, TypeRef};
use odata_uri::QueryOptions;
use uuid::Uuid;

use super::{content_headers, RenderContext, Shape};
use crate::error::RenderError;
use crate::request::Headers;
use crate::streamer::StreamRenderer;
use crate::value::{ODataValue, StructuredValue};
use crate::xml::{XmlWriter, ATOM_NS, DATA_NS, METADATA_NS, RELATED_NS, SCHEME_NS};

const ENTRY_MEDIA: &str = "application/atom+xml;type=entry";
const FEED_MEDIA: &str = "application/atom+xml;type=feed";

/// `Customers(1)` or `OrderLines(order=1,line=2)`.
pub(crate) fn entity_path(
    model: &EntityDataModel,
    entity_set: Option<&str>,
    entity: &StructuredValue,
) -> Option<String> {
    let set = entity_set?;
    let ty = model.resolve(&entity.type_name)?;
    let keys = model.key_names(ty);
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let literal = entity.get(key)?.to_key_literal()?;
        if keys.len() == 1 {
            parts.push(literal);
        } else {
            parts.push(format!("{key}={literal}"));
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("{set}({})", parts.join(",")))
}

/// `m:type` for a declared type: `Int32`, `#ODataDemo.Address`,
/// `#Collection(String)`. `None` for strings, which are the default.
pub(crate) fn type_attribute(declared: &TypeRef) -> Option<String> {
    let element = match declared.as_primitive() {
        Some(p) if !declared.collection && p == odata_edm::PrimitiveType::String => return None,
        Some(p) if !declared.collection => return Some(p.name().to_string()),
        Some(p) => p.name().to_string(),
        None => declared.type_name.clone(),
    };
    if declared.collection {
        Some(format!("#Collection({element})"))
    } else {
        Some(format!("#{element}"))
    }
}

fn root_attributes(context: &str) -> [(&'static str, &str); 4] {
    [
        ("xmlns", ATOM_NS),
        ("xmlns:d", DATA_NS),
        ("xmlns:m", METADATA_NS),
        ("m:context", context),
    ]
}

/// Writes entries for one document.
struct EntryWriter<'a> {
    model: &'a EntityDataModel,
    service_root: &'a str,
    updated: &'a str,
}

impl EntryWriter<'_> {
    fn entry(
        &self,
        w: &mut XmlWriter,
        entity: &StructuredValue,
        entity_set: Option<&str>,
        options: Option<&QueryOptions>,
        attrs: &[(&str, &str)],
    ) -> Result<(), RenderError> {
        let actual = self
            .model
            .resolve(&entity.type_name)
            .ok_or_else(|| RenderError::Unsupported {
                renderer: "atom",
                what: entity.type_name.clone(),
            })?;
        let path = entity_path(self.model, entity_set, entity);
        let id = match &path {
            Some(path) => format!("{}/{path}", self.service_root),
            None => format!("urn:uuid:{}", Uuid::new_v4()),
        };

        w.start("entry", attrs)?;
        w.text_element("id", &[], &id)?;
        w.empty("title", &[("type", "text")])?;
        w.text_element("updated", &[], self.updated)?;
        w.start("author", &[])?;
        w.empty("name", &[])?;
        w.end("author")?;
        if let Some(path) = &path {
            w.empty("link", &[("rel", "edit"), ("href", path.as_str())])?;
        }

        for nav in self.model.navigation_properties(actual) {
            let rel = format!("{RELATED_NS}{}", nav.name);
            let link_type = if nav.target.collection { FEED_MEDIA } else { ENTRY_MEDIA };
            let href = path.as_ref().map(|p| format!("{p}/{}", nav.name));
            let mut link_attrs = vec![("rel", rel.as_str()), ("type", link_type), ("title", nav.name.as_str())];
            if let Some(href) = &href {
                link_attrs.push(("href", href.as_str()));
            }

            let expanded = options
                .and_then(|o| o.expanded(&nav.name))
                .zip(entity.get(&nav.name));
            let Some((item, member)) = expanded else {
                if href.is_some() {
                    w.empty("link", &link_attrs)?;
                }
                continue;
            };

            let target_set = self
                .model
                .entity_set_for_type(&nav.target.type_name)
                .map(|s| s.name.as_str());
            w.start("link", &link_attrs)?;
            w.start("m:inline", &[])?;
            match member {
                ODataValue::Collection(items) => {
                    w.start("feed", &[])?;
                    if let Some(href) = &href {
                        w.text_element("id", &[], &format!("{}/{href}", self.service_root))?;
                    }
                    for item_value in items {
                        let nested = as_entity(item_value, &nav.name)?;
                        self.entry(w, nested, target_set, Some(&item.options), &[])?;
                    }
                    w.end("feed")?;
                }
                ODataValue::Null => {}
                other => {
                    let nested = as_entity(other, &nav.name)?;
                    self.entry(w, nested, target_set, Some(&item.options), &[])?;
                }
            }
            w.end("m:inline")?;
            w.end("link")?;
        }

        let term = format!("#{}", entity.type_name);
        w.empty("category", &[("term", term.as_str()), ("scheme", SCHEME_NS)])?;
        w.start("content", &[("type", "application/xml")])?;
        w.start("m:properties", &[])?;
        for property in self.model.structural_properties(actual) {
            if !options.map_or(true, |o| o.is_selected(&property.name)) {
                continue;
            }
            if let Some(member) = entity.get(&property.name) {
                let tag = format!("d:{}", property.name);
                write_property(self.model, w, &tag, member, &property.type_ref, &[])?;
            }
        }
        w.end("m:properties")?;
        w.end("content")?;
        w.end("entry")
    }
}

/// `<d:name m:type="...">...</d:name>`, also used for `m:element` and the
/// root of plain XML value documents. `leading` attributes come before
/// `m:type`.
pub(crate) fn write_property(
    model: &EntityDataModel,
    w: &mut XmlWriter,
    tag: &str,
    value: &ODataValue,
    declared: &TypeRef,
    leading: &[(&str, &str)],
) -> Result<(), RenderError> {
    let type_attr = match value {
        ODataValue::Structured(c) if c.type_name != declared.type_name => {
            Some(format!("#{}", c.type_name))
        }
        _ => type_attribute(declared),
    };
    let mut attrs: Vec<(&str, &str)> = leading.to_vec();
    if let Some(t) = &type_attr {
        attrs.push(("m:type", t.as_str()));
    }

    match value {
        ODataValue::Null => {
            attrs.push(("m:null", "true"));
            w.empty(tag, &attrs)
        }
        ODataValue::Collection(items) => {
            let element = declared.element();
            w.start(tag, &attrs)?;
            for item in items {
                write_property(model, w, "m:element", item, &element, &[])?;
            }
            w.end(tag)
        }
        ODataValue::Structured(complex) => {
            let ty = model
                .resolve(&complex.type_name)
                .ok_or_else(|| RenderError::Unsupported {
                    renderer: "xml",
                    what: complex.type_name.clone(),
                })?;
            w.start(tag, &attrs)?;
            for member in model.structural_properties(ty) {
                if let Some(v) = complex.get(&member.name) {
                    let tag = format!("d:{}", member.name);
                    write_property(model, w, &tag, v, &member.type_ref, &[])?;
                }
            }
            w.end(tag)
        }
        primitive => {
            let text = primitive.to_text().unwrap_or_default();
            w.text_element(tag, &attrs, &text)
        }
    }
}

fn as_entity<'v>(value: &'v ODataValue, path: &str) -> Result<&'v StructuredValue, RenderError> {
    value.as_structured().ok_or_else(|| RenderError::ShapeMismatch {
        path: path.to_string(),
        expected: "an entity".to_string(),
        found: value.describe(),
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// A complete `<entry>` document.
pub fn render_entry_document(
    ctx: &RenderContext<'_>,
    shape: &Shape,
    value: &ODataValue,
) -> Result<Vec<u8>, RenderError> {
    let entity = as_entity(value, "$")?;
    let updated = now();
    let writer = EntryWriter {
        model: ctx.model,
        service_root: ctx.service_root,
        updated: &updated,
    };
    let mut w = XmlWriter::new();
    w.declaration()?;
    writer.entry(
        &mut w,
        entity,
        ctx.uri.entity_set.as_deref(),
        Some(&ctx.uri.options),
        &root_attributes(&shape.context),
    )?;
    Ok(w.into_bytes())
}

// ============================================================================
// Streaming feeds
// ============================================================================

/// `<feed>` head with the first entry, one entry per element, then `</feed>`.
pub struct AtomFeed {
    model: Arc<EntityDataModel>,
    service_root: String,
    entity_set: Option<String>,
    options: QueryOptions,
    context: String,
    feed_id: String,
    count: Option<u64>,
    updated: String,
    media_type: &'static str,
}

impl AtomFeed {
    pub fn new(ctx: &RenderContext<'_>, shape: &Shape, count: Option<u64>) -> Self {
        Self {
            model: Arc::clone(ctx.model),
            service_root: ctx.service_root.to_string(),
            entity_set: ctx.uri.entity_set.clone(),
            options: ctx.uri.options.clone(),
            context: shape.context.clone(),
            feed_id: format!("{}/{}", ctx.service_root, ctx.uri.canonical_path()),
            count,
            updated: now(),
            media_type: ctx.media_type,
        }
    }

    fn head(&self, w: &mut XmlWriter) -> Result<(), RenderError> {
        w.declaration()?;
        w.start("feed", &root_attributes(&self.context))?;
        w.text_element("id", &[], &self.feed_id)?;
        w.empty("title", &[("type", "text")])?;
        w.text_element("updated", &[], &self.updated)?;
        if let Some(count) = self.count {
            w.text_element("m:count", &[], &count.to_string())?;
        }
        Ok(())
    }

    fn entry(&self, w: &mut XmlWriter, element: &ODataValue) -> Result<(), RenderError> {
        let writer = EntryWriter {
            model: &self.model,
            service_root: &self.service_root,
            updated: &self.updated,
        };
        let entity = as_entity(element, "$")?;
        writer.entry(w, entity, self.entity_set.as_deref(), Some(&self.options), &[])
    }
}

impl StreamRenderer for AtomFeed {
    fn headers(&self) -> Headers {
        content_headers(self.media_type)
    }

    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        self.head(&mut w)?;
        self.entry(&mut w, first)?;
        Ok(w.into_bytes())
    }

    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        self.entry(&mut w, element)?;
        Ok(w.into_bytes())
    }

    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
        let mut w = XmlWriter::new();
        if last.is_none() {
            self.head(&mut w)?;
        }
        w.end("feed")?;
        Ok(w.into_bytes())
    }
}
