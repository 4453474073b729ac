//! Entity data model (EDM) registry.
//!
//! Applications describe their types as [`TypeDescriptor`] values (built in
//! code or deserialized from JSON), hand them to an [`EntityDataModelBuilder`]
//! and get back an immutable [`EntityDataModel`]. Construction validates the
//! whole reference graph up front:
//!
//! - every property, navigation, parameter and return type resolves
//! - every entity type has a key made of non-nullable primitive properties
//! - names are unique within their namespace and container
//!
//! After `build()` the model is read-only and is normally shared behind an
//! `Arc` by the URI parser and the service layer.

pub mod demo;
pub mod descriptor;
pub mod model;
pub mod primitive;

pub use demo::{demo_builder, demo_model, DEMO_NAMESPACE};
pub use descriptor::{
    EntitySetDescriptor, ModelDocument, Name, NavigationPropertyDescriptor, OperationDescriptor,
    OperationImportDescriptor, OperationKind, ParameterDescriptor, PropertyDescriptor,
    TypeDescriptor, TypeKind, TypeRef,
};
pub use model::{split_qualified, EntityDataModel, EntityDataModelBuilder, ModelError};
pub use primitive::{MetaType, PrimitiveType, UnknownPrimitiveType, EDM_NAMESPACE};
