//! JSON format with minimal metadata.
//!
//! Documents are built as [`serde_json::Value`] trees. The workspace enables
//! serde_json's `preserve_order` feature, so members keep insertion order and
//! properties come out in declared order.

use std::sync::Arc;

use odata_edm::EntityDataModel;
use odata_uri::QueryOptions;
use serde_json::{json, Map, Value};

use super::{content_headers, service_entries, RenderContext, ServiceEntryKind, Shape};
use crate::error::RenderError;
use crate::request::Headers;
use crate::streamer::StreamRenderer;
use crate::value::{ODataValue, StructuredValue};

/// `value`, declared as (an element of) `declared`, as JSON.
///
/// `options` carries `$select`/`$expand` for entities; `None` writes every
/// structural property and no navigation properties.
pub(crate) fn to_json(
    model: &EntityDataModel,
    value: &ODataValue,
    declared: &str,
    options: Option<&QueryOptions>,
) -> Result<Value, RenderError> {
    Ok(match value {
        ODataValue::Null => Value::Null,
        ODataValue::Boolean(b) => Value::Bool(*b),
        ODataValue::Int(v) => Value::from(*v),
        ODataValue::Double(v) if v.is_finite() => Value::from(*v),
        ODataValue::Structured(s) => {
            Value::Object(structured(model, s, declared, options, Map::new())?)
        }
        ODataValue::Collection(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json(model, item, declared, options))
                .collect::<Result<_, _>>()?,
        ),
        // Decimals, non-finite doubles and the remaining primitives are strings.
        other => Value::String(other.to_text().unwrap_or_default()),
    })
}

/// An entity or complex value appended to `members`, which may already hold
/// leading annotations such as the context URL of a top-level entity.
fn structured(
    model: &EntityDataModel,
    value: &StructuredValue,
    declared: &str,
    options: Option<&QueryOptions>,
    mut members: Map<String, Value>,
) -> Result<Map<String, Value>, RenderError> {
    let actual = model
        .resolve(&value.type_name)
        .ok_or_else(|| RenderError::Unsupported {
            renderer: "json",
            what: value.type_name.clone(),
        })?;

    if value.type_name != declared {
        members.insert("@odata.type".into(), Value::String(format!("#{}", value.type_name)));
    }

    for property in model.structural_properties(actual) {
        if !options.map_or(true, |o| o.is_selected(&property.name)) {
            continue;
        }
        if let Some(member) = value.get(&property.name) {
            let json = to_json(model, member, &property.type_ref.type_name, None)?;
            members.insert(property.name.clone(), json);
        }
    }

    if let Some(options) = options {
        for nav in model.navigation_properties(actual) {
            let (Some(item), Some(member)) = (options.expanded(&nav.name), value.get(&nav.name))
            else {
                continue;
            };
            let json = to_json(model, member, &nav.target.type_name, Some(&item.options))?;
            members.insert(nav.name.clone(), json);
        }
    }

    Ok(members)
}

/// A single entity as a top-level object, anything else wrapped in `value`.
pub fn render_single(
    ctx: &RenderContext<'_>,
    shape: &Shape,
    value: &ODataValue,
) -> Result<Vec<u8>, RenderError> {
    let document = match value {
        ODataValue::Structured(entity) if shape.entity => {
            let mut leading = Map::new();
            leading.insert("@odata.context".into(), Value::String(shape.context.clone()));
            Value::Object(structured(
                ctx.model,
                entity,
                &shape.declared.type_name,
                Some(&ctx.uri.options),
                leading,
            )?)
        }
        other => json!({
            "@odata.context": shape.context,
            "value": to_json(ctx.model, other, &shape.declared.type_name, Some(&ctx.uri.options))?,
        }),
    };
    Ok(serde_json::to_vec(&document)?)
}

/// `{"@odata.context":..., "value":[{"name":"Customers","kind":"EntitySet",...}]}`
pub fn render_service_document(ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
    let entries: Vec<Value> = service_entries(ctx.model)
        .into_iter()
        .map(|(name, kind)| {
            let kind = match kind {
                ServiceEntryKind::EntitySet => "EntitySet",
                ServiceEntryKind::FunctionImport => "FunctionImport",
            };
            json!({ "name": name, "kind": kind, "url": name })
        })
        .collect();
    let document = json!({
        "@odata.context": ctx.metadata_url(),
        "value": entries,
    });
    Ok(serde_json::to_vec(&document)?)
}

// ============================================================================
// Streaming collections
// ============================================================================

/// `{"@odata.context":...,"@odata.count":N,"value":[...]}` one element at a
/// time.
pub struct JsonCollection {
    model: Arc<EntityDataModel>,
    element: String,
    options: QueryOptions,
    context: String,
    count: Option<u64>,
    media_type: &'static str,
}

impl JsonCollection {
    pub fn new(ctx: &RenderContext<'_>, shape: &Shape, count: Option<u64>) -> Self {
        Self {
            model: Arc::clone(ctx.model),
            element: shape.declared.type_name.clone(),
            options: ctx.uri.options.clone(),
            context: shape.context.clone(),
            count,
            media_type: ctx.media_type,
        }
    }

    /// The envelope up to and including the `[` that opens `value`.
    fn envelope(&self) -> Result<Vec<u8>, RenderError> {
        let mut annotations = Map::new();
        annotations.insert("@odata.context".into(), Value::String(self.context.clone()));
        if let Some(count) = self.count {
            annotations.insert("@odata.count".into(), Value::from(count));
        }
        let mut out = serde_json::to_vec(&Value::Object(annotations))?;
        // Reopen the object: `{...}` becomes `{...,"value":[`.
        out.pop();
        out.extend_from_slice(br#","value":["#);
        Ok(out)
    }

    fn element(&self, out: &mut Vec<u8>, element: &ODataValue) -> Result<(), RenderError> {
        let json = to_json(&self.model, element, &self.element, Some(&self.options))?;
        serde_json::to_writer(out, &json)?;
        Ok(())
    }
}

impl StreamRenderer for JsonCollection {
    fn headers(&self) -> Headers {
        content_headers(self.media_type)
    }

    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut out = self.envelope()?;
        self.element(&mut out, first)?;
        Ok(out)
    }

    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
        let mut out = vec![b','];
        self.element(&mut out, element)?;
        Ok(out)
    }

    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
        let mut out = match last {
            Some(_) => Vec::new(),
            None => self.envelope()?,
        };
        out.extend_from_slice(b"]}");
        Ok(out)
    }
}
