//! Request body decoding: entities for create/update and parameters for
//! action calls.

pub mod atom;
pub mod json;

use odata_edm::{
    split_qualified, EntityDataModel, OperationDescriptor, ParameterDescriptor, TypeDescriptor,
};
use odata_uri::{ODataUri, Target};

use crate::error::UnmarshalError;
use crate::negotiation::UnmarshallerKind;
use crate::processor::Parameter;
use crate::value::{ODataValue, StructuredValue};

/// A decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Entity(StructuredValue),
    Parameters(Vec<Parameter>),
}

pub fn unmarshal(
    kind: UnmarshallerKind,
    model: &EntityDataModel,
    uri: &ODataUri,
    body: &[u8],
) -> Result<Payload, UnmarshalError> {
    let format = match kind {
        UnmarshallerKind::JsonEntity | UnmarshallerKind::JsonAction => "json",
        UnmarshallerKind::AtomEntity | UnmarshallerKind::AtomAction => "atom",
    };
    let text = std::str::from_utf8(body).map_err(|e| UnmarshalError::Malformed {
        format,
        message: e.to_string(),
    })?;

    match kind {
        UnmarshallerKind::JsonEntity | UnmarshallerKind::AtomEntity => {
            let declared = entity_type(model, uri)?;
            let entity = if kind == UnmarshallerKind::JsonEntity {
                json::read_entity(model, declared, text)?
            } else {
                atom::read_entry(model, declared, text)?
            };
            Ok(Payload::Entity(entity))
        }
        UnmarshallerKind::JsonAction | UnmarshallerKind::AtomAction => {
            let operation = action(model, uri)?;
            let provided = if text.trim().is_empty() {
                Vec::new()
            } else if kind == UnmarshallerKind::JsonAction {
                json::read_parameters(model, operation, text)?
            } else {
                atom::read_parameters(model, operation, text)?
            };
            Ok(Payload::Parameters(complete_parameters(operation, provided)?))
        }
    }
}

fn entity_type<'m>(model: &'m EntityDataModel, uri: &ODataUri) -> Result<&'m TypeDescriptor, UnmarshalError> {
    uri.entity_type()
        .and_then(|name| model.resolve(name))
        .ok_or_else(|| UnmarshalError::Missing {
            name: "entity type".to_string(),
        })
}

fn action<'m>(model: &'m EntityDataModel, uri: &ODataUri) -> Result<&'m OperationDescriptor, UnmarshalError> {
    let Target::Action {
        operation,
        is_bound,
        ..
    } = &uri.target
    else {
        return Err(UnmarshalError::Missing {
            name: "action".to_string(),
        });
    };
    split_qualified(operation)
        .and_then(|(ns, name)| model.operation(ns, name, *is_bound))
        .ok_or_else(|| UnmarshalError::Missing {
            name: operation.clone(),
        })
}

pub(crate) fn parameter<'o>(
    operation: &'o OperationDescriptor,
    name: &str,
) -> Result<&'o ParameterDescriptor, UnmarshalError> {
    operation
        .call_parameters()
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| UnmarshalError::UnknownParameter {
            operation: operation.fully_qualified_name(),
            parameter: name.to_string(),
        })
}

/// Order parameters as declared and require every non-nullable one.
fn complete_parameters(
    operation: &OperationDescriptor,
    mut provided: Vec<Parameter>,
) -> Result<Vec<Parameter>, UnmarshalError> {
    let mut ordered = Vec::with_capacity(provided.len());
    for declared in operation.call_parameters() {
        match provided.iter().position(|p| p.name == declared.name) {
            Some(i) => {
                let parameter = provided.swap_remove(i);
                if parameter.value.is_null() && !declared.nullable {
                    return Err(UnmarshalError::Missing {
                        name: declared.name.clone(),
                    });
                }
                ordered.push(parameter);
            }
            None if !declared.nullable => {
                return Err(UnmarshalError::Missing {
                    name: declared.name.clone(),
                })
            }
            None => {}
        }
    }
    Ok(ordered)
}

/// Resolve an explicit type annotation against the declared entity type.
pub(crate) fn annotated_type<'m>(
    model: &'m EntityDataModel,
    declared: &'m TypeDescriptor,
    annotation: Option<&str>,
) -> Result<&'m TypeDescriptor, UnmarshalError> {
    let Some(name) = annotation else {
        return Ok(declared);
    };
    let name = name.trim_start_matches('#');
    let declared_name = declared.fully_qualified_name();
    match model.resolve(name) {
        Some(ty) if model.is_subtype_of(name, &declared_name) => Ok(ty),
        _ => Err(UnmarshalError::InvalidValue {
            name: "type annotation".to_string(),
            expected: format!("{declared_name} or a derived type"),
        }),
    }
}

pub(crate) fn null_check(
    name: &str,
    nullable: bool,
    value: ODataValue,
) -> Result<ODataValue, UnmarshalError> {
    if value.is_null() && !nullable {
        return Err(UnmarshalError::InvalidValue {
            name: name.to_string(),
            expected: "a non-null value".to_string(),
        });
    }
    Ok(value)
}
