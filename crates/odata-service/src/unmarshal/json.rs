//! JSON request bodies.

use odata_edm::{EntityDataModel, OperationDescriptor, PrimitiveType, TypeDescriptor, TypeRef};
use serde_json::{Map, Value};

use super::{annotated_type, null_check, parameter};
use crate::error::UnmarshalError;
use crate::processor::Parameter;
use crate::value::{ODataValue, StructuredValue};

const FORMAT: &str = "json";

fn parse(text: &str) -> Result<Map<String, Value>, UnmarshalError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(UnmarshalError::Malformed {
            format: FORMAT,
            message: format!("expected an object, found {}", kind_of(&other)),
        }),
        Err(e) => Err(UnmarshalError::Malformed {
            format: FORMAT,
            message: e.to_string(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Control information (`@odata.type`, `Orders@odata.bind`, ...) is not data.
fn is_annotation(key: &str) -> bool {
    key.contains('@')
}

pub fn read_entity(
    model: &EntityDataModel,
    declared: &TypeDescriptor,
    text: &str,
) -> Result<StructuredValue, UnmarshalError> {
    let object = parse(text)?;
    read_structured(model, declared, &object)
}

fn read_structured(
    model: &EntityDataModel,
    declared: &TypeDescriptor,
    object: &Map<String, Value>,
) -> Result<StructuredValue, UnmarshalError> {
    let annotation = object.get("@odata.type").and_then(Value::as_str);
    let ty = annotated_type(model, declared, annotation)?;
    let mut out = StructuredValue::new(ty.fully_qualified_name());

    for (key, json) in object {
        if is_annotation(key) {
            continue;
        }
        if let Some(property) = model.structural_property(ty, key) {
            let value = convert(model, key, json, &property.type_ref)?;
            out.set(key.clone(), null_check(key, property.nullable, value)?);
        } else if let Some(nav) = model.navigation_property(ty, key) {
            let value = convert(model, key, json, &nav.target)?;
            out.set(key.clone(), value);
        } else {
            return Err(UnmarshalError::UnknownProperty {
                type_name: ty.fully_qualified_name(),
                property: key.clone(),
            });
        }
    }
    Ok(out)
}

fn invalid(name: &str, expected: &TypeRef) -> UnmarshalError {
    UnmarshalError::InvalidValue {
        name: name.to_string(),
        expected: expected.to_string(),
    }
}

/// Convert one JSON value to a value of `declared`.
fn convert(
    model: &EntityDataModel,
    name: &str,
    json: &Value,
    declared: &TypeRef,
) -> Result<ODataValue, UnmarshalError> {
    if json.is_null() {
        return Ok(ODataValue::Null);
    }
    if declared.collection {
        let Value::Array(items) = json else {
            return Err(invalid(name, declared));
        };
        let element = declared.element();
        return items
            .iter()
            .map(|item| convert(model, name, item, &element))
            .collect::<Result<Vec<_>, _>>()
            .map(ODataValue::Collection);
    }
    if let Some(primitive) = declared.as_primitive() {
        return convert_primitive(primitive, json).ok_or_else(|| invalid(name, declared));
    }

    let (Value::Object(object), Some(ty)) = (json, model.resolve(&declared.type_name)) else {
        return Err(invalid(name, declared));
    };
    read_structured(model, ty, object).map(ODataValue::Structured)
}

fn convert_primitive(ty: PrimitiveType, json: &Value) -> Option<ODataValue> {
    use PrimitiveType as P;
    match (ty, json) {
        (P::Boolean, Value::Bool(b)) => Some(ODataValue::Boolean(*b)),
        (P::Byte | P::SByte | P::Int16 | P::Int32 | P::Int64, Value::Number(n)) => {
            let value = ODataValue::Int(n.as_i64()?);
            value.matches_primitive(ty).then_some(value)
        }
        (P::Double | P::Single, Value::Number(n)) => n.as_f64().map(ODataValue::Double),
        (P::Decimal, Value::Number(n)) => ODataValue::parse_text(ty, &n.to_string()),
        // Int64 and Decimal may come as strings to keep precision, doubles
        // may spell INF and NaN.
        (_, Value::String(s)) => ODataValue::parse_text(ty, s),
        _ => None,
    }
}

pub fn read_parameters(
    model: &EntityDataModel,
    operation: &OperationDescriptor,
    text: &str,
) -> Result<Vec<Parameter>, UnmarshalError> {
    let object = parse(text)?;
    let mut out = Vec::with_capacity(object.len());
    for (key, json) in &object {
        if is_annotation(key) {
            continue;
        }
        let declared = parameter(operation, key)?;
        let value = convert(model, key, json, &declared.type_ref)?;
        out.push(Parameter {
            name: key.clone(),
            value,
        });
    }
    Ok(out)
}
