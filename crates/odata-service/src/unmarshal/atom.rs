//! Atom/XML request bodies: `<entry>` documents and `<m:parameters>`.

use odata_edm::{EntityDataModel, OperationDescriptor, TypeDescriptor, TypeRef};

use super::{annotated_type, null_check, parameter};
use crate::error::UnmarshalError;
use crate::processor::Parameter;
use crate::value::{ODataValue, StructuredValue};
use crate::xml::{parse_document, XmlNode};

const FORMAT: &str = "atom";

fn parse(text: &str, root: &str) -> Result<XmlNode, UnmarshalError> {
    let node = parse_document(text).map_err(|message| UnmarshalError::Malformed {
        format: FORMAT,
        message,
    })?;
    if node.name != root {
        return Err(UnmarshalError::Malformed {
            format: FORMAT,
            message: format!("expected <{root}>, found <{}>", node.name),
        });
    }
    Ok(node)
}

pub fn read_entry(
    model: &EntityDataModel,
    declared: &TypeDescriptor,
    text: &str,
) -> Result<StructuredValue, UnmarshalError> {
    let entry = parse(text, "entry")?;
    let term = entry.child("category").and_then(|c| c.attribute("term"));
    let ty = annotated_type(model, declared, term)?;

    // Media-link entries carry their properties outside <content>.
    let properties = entry
        .child("content")
        .and_then(|c| c.child("properties"))
        .or_else(|| entry.child("properties"));
    let mut out = StructuredValue::new(ty.fully_qualified_name());
    if let Some(properties) = properties {
        read_members(model, ty, properties, &mut out)?;
    }
    Ok(out)
}

fn read_members(
    model: &EntityDataModel,
    ty: &TypeDescriptor,
    node: &XmlNode,
    out: &mut StructuredValue,
) -> Result<(), UnmarshalError> {
    for child in &node.children {
        let Some(property) = model.structural_property(ty, &child.name) else {
            return Err(UnmarshalError::UnknownProperty {
                type_name: ty.fully_qualified_name(),
                property: child.name.clone(),
            });
        };
        let value = convert(model, child, &property.type_ref)?;
        out.set(child.name.clone(), null_check(&child.name, property.nullable, value)?);
    }
    Ok(())
}

fn convert(
    model: &EntityDataModel,
    node: &XmlNode,
    declared: &TypeRef,
) -> Result<ODataValue, UnmarshalError> {
    let invalid = || UnmarshalError::InvalidValue {
        name: node.name.clone(),
        expected: declared.to_string(),
    };
    if node.is_null() {
        return Ok(ODataValue::Null);
    }
    if declared.collection {
        let element = declared.element();
        return node
            .children
            .iter()
            .filter(|c| c.name == "element")
            .map(|c| convert(model, c, &element))
            .collect::<Result<Vec<_>, _>>()
            .map(ODataValue::Collection);
    }
    if let Some(primitive) = declared.as_primitive() {
        return ODataValue::parse_text(primitive, &node.text).ok_or_else(invalid);
    }

    let declared_ty = model.resolve(&declared.type_name).ok_or_else(invalid)?;
    let ty = annotated_type(model, declared_ty, node.attribute("type"))?;
    let mut out = StructuredValue::new(ty.fully_qualified_name());
    read_members(model, ty, node, &mut out)?;
    Ok(ODataValue::Structured(out))
}

pub fn read_parameters(
    model: &EntityDataModel,
    operation: &OperationDescriptor,
    text: &str,
) -> Result<Vec<Parameter>, UnmarshalError> {
    let root = parse(text, "parameters")?;
    let mut out = Vec::with_capacity(root.children.len());
    for child in &root.children {
        let declared = parameter(operation, &child.name)?;
        out.push(Parameter {
            name: child.name.clone(),
            value: convert(model, child, &declared.type_ref)?,
        });
    }
    Ok(out)
}
