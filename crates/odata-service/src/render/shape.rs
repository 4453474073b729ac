//! Checks that a value has the shape its declared type promises.

use odata_edm::{EntityDataModel, TypeRef};

use crate::error::RenderError;
use crate::value::ODataValue;

pub fn check_value(
    model: &EntityDataModel,
    path: &str,
    expected: &TypeRef,
    nullable: bool,
    value: &ODataValue,
) -> Result<(), RenderError> {
    if value.is_null() {
        return if nullable {
            Ok(())
        } else {
            Err(RenderError::NullNotAllowed {
                path: path.to_string(),
            })
        };
    }

    if expected.collection {
        let ODataValue::Collection(items) = value else {
            return Err(mismatch(path, expected, value));
        };
        let element = expected.element();
        for (i, item) in items.iter().enumerate() {
            check_value(model, &format!("{path}[{i}]"), &element, false, item)?;
        }
        return Ok(());
    }

    if let Some(primitive) = expected.as_primitive() {
        return if value.matches_primitive(primitive) {
            Ok(())
        } else {
            Err(mismatch(path, expected, value))
        };
    }

    let ODataValue::Structured(structured) = value else {
        return Err(mismatch(path, expected, value));
    };
    if !model.is_subtype_of(&structured.type_name, &expected.type_name) {
        return Err(mismatch(path, expected, value));
    }
    let Some(actual) = model.resolve(&structured.type_name) else {
        return Err(mismatch(path, expected, value));
    };

    for property in &structured.properties {
        let member_path = format!("{path}/{}", property.name);
        if let Some(declared) = model.structural_property(actual, &property.name) {
            check_value(
                model,
                &member_path,
                &declared.type_ref,
                declared.nullable,
                &property.value,
            )?;
        } else if let Some(nav) = model.navigation_property(actual, &property.name) {
            check_value(model, &member_path, &nav.target, nav.nullable, &property.value)?;
        } else {
            return Err(RenderError::UnknownProperty {
                type_name: structured.type_name.clone(),
                property: property.name.clone(),
            });
        }
    }
    Ok(())
}

fn mismatch(path: &str, expected: &TypeRef, found: &ODataValue) -> RenderError {
    RenderError::ShapeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.describe(),
    }
}
