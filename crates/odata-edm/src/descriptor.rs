//! Type descriptors: the backend-agnostic metadata an application hands to
//! [`crate::EntityDataModelBuilder`].
//!
//! Descriptors are plain values. They can be assembled with the builder-style
//! helpers below or deserialized from JSON, e.g.
//!
//! ```json
//! {
//!   "kind": "entity",
//!   "namespace": "ODataDemo",
//!   "name": "Customer",
//!   "key": ["id"],
//!   "properties": [
//!     { "name": "id", "type": "Edm.Int64", "nullable": false },
//!     { "name": "Phone", "type": "Collection(Edm.String)" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::primitive::{PrimitiveType, EDM_NAMESPACE};

pub type Name = String;

/// Reference to a type by fully-qualified name, optionally as a collection.
///
/// Serialized in the CSDL surface form: `Edm.String` or
/// `Collection(ODataDemo.Address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeRef {
    pub type_name: Name,
    pub collection: bool,
}

impl TypeRef {
    pub fn single(type_name: impl Into<Name>) -> Self {
        Self {
            type_name: type_name.into(),
            collection: false,
        }
    }

    pub fn collection(type_name: impl Into<Name>) -> Self {
        Self {
            type_name: type_name.into(),
            collection: true,
        }
    }

    pub fn primitive(ty: PrimitiveType) -> Self {
        Self::single(ty.fully_qualified_name())
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if let Some(inner) = text
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let inner = inner.trim();
            if inner.is_empty() || inner.starts_with("Collection(") {
                return Err(format!("invalid collection type reference `{text}`"));
            }
            return Ok(Self::collection(inner));
        }
        if text.is_empty() || text.contains(['(', ')', ' ']) {
            return Err(format!("invalid type reference `{text}`"));
        }
        Ok(Self::single(text))
    }

    /// The same type, without the collection wrapper.
    pub fn element(&self) -> Self {
        Self::single(self.type_name.clone())
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        if !self.type_name.starts_with(EDM_NAMESPACE) {
            return None;
        }
        PrimitiveType::for_name(&self.type_name).ok()
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.collection {
            write!(f, "Collection({})", self.type_name)
        } else {
            write!(f, "{}", self.type_name)
        }
    }
}

impl TryFrom<String> for TypeRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Primitive(PrimitiveType),
    Complex,
    Entity,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<Name>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            nullable: true,
        }
    }

    pub fn primitive(name: impl Into<Name>, ty: PrimitiveType) -> Self {
        Self::new(name, TypeRef::primitive(ty))
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_collection(&self) -> bool {
        self.type_ref.collection
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationPropertyDescriptor {
    pub name: Name,
    #[serde(rename = "type")]
    pub target: TypeRef,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<Name>,
}

impl NavigationPropertyDescriptor {
    pub fn new(name: impl Into<Name>, target: TypeRef) -> Self {
        Self {
            name: name.into(),
            target,
            nullable: true,
            partner: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_partner(mut self, partner: impl Into<Name>) -> Self {
        self.partner = Some(partner.into());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.target.collection
    }
}

/// Metadata for one application type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    pub namespace: Name,
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<Name>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationPropertyDescriptor>,
    /// Key property names. Only meaningful for entity types.
    #[serde(default)]
    pub key: Vec<Name>,
}

impl TypeDescriptor {
    fn structured(kind: TypeKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            base_type: None,
            is_abstract: false,
            properties: Vec::new(),
            navigation_properties: Vec::new(),
            key: Vec::new(),
        }
    }

    pub fn entity(namespace: &str, name: &str) -> Self {
        Self::structured(TypeKind::Entity, namespace, name)
    }

    pub fn complex(namespace: &str, name: &str) -> Self {
        Self::structured(TypeKind::Complex, namespace, name)
    }

    pub(crate) fn builtin(ty: PrimitiveType) -> Self {
        Self::structured(TypeKind::Primitive(ty), EDM_NAMESPACE, ty.name())
    }

    pub fn key(mut self, names: &[&str]) -> Self {
        self.key = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn navigation(mut self, navigation: NavigationPropertyDescriptor) -> Self {
        self.navigation_properties.push(navigation);
        self
    }

    pub fn base(mut self, base_type: impl Into<Name>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        self.kind == TypeKind::Entity
    }

    pub fn is_complex(&self) -> bool {
        self.kind == TypeKind::Complex
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.kind, TypeKind::Complex | TypeKind::Entity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySetDescriptor {
    pub name: Name,
    pub entity_type: Name,
}

impl EntitySetDescriptor {
    pub fn new(name: impl Into<Name>, entity_type: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Side-effecting; invoked with POST.
    Action,
    /// Side-effect free; invoked with GET.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<Name>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// An action or function.
///
/// For bound operations the first parameter is the binding parameter; its
/// type is the type the operation is invoked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub namespace: Name,
    pub name: Name,
    #[serde(default)]
    pub is_bound: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set_path: Option<Name>,
}

impl OperationDescriptor {
    fn new(kind: OperationKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            is_bound: false,
            parameters: Vec::new(),
            return_type: None,
            entity_set_path: None,
        }
    }

    pub fn action(namespace: &str, name: &str) -> Self {
        Self::new(OperationKind::Action, namespace, name)
    }

    pub fn function(namespace: &str, name: &str) -> Self {
        Self::new(OperationKind::Function, namespace, name)
    }

    /// Bind to `binding`, which becomes the first parameter.
    pub fn bound_to(mut self, binding_name: &str, binding: TypeRef) -> Self {
        self.is_bound = true;
        self.parameters
            .insert(0, ParameterDescriptor::new(binding_name, binding).not_null());
        self
    }

    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, return_type: TypeRef) -> Self {
        self.return_type = Some(return_type);
        self
    }

    pub fn entity_set_path(mut self, path: impl Into<Name>) -> Self {
        self.entity_set_path = Some(path.into());
        self
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn is_action(&self) -> bool {
        self.kind == OperationKind::Action
    }

    pub fn is_function(&self) -> bool {
        self.kind == OperationKind::Function
    }

    pub fn binding_parameter(&self) -> Option<&ParameterDescriptor> {
        if self.is_bound {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters a caller supplies explicitly (everything but the binding
    /// parameter).
    pub fn call_parameters(&self) -> &[ParameterDescriptor] {
        if self.is_bound && !self.parameters.is_empty() {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }
}

/// Entity-container level import of an unbound operation under an
/// unqualified name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationImportDescriptor {
    pub name: Name,
    /// Fully-qualified name of the unbound operation.
    pub operation: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<Name>,
}

impl OperationImportDescriptor {
    pub fn new(name: impl Into<Name>, operation: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            entity_set: None,
        }
    }

    pub fn with_entity_set(mut self, entity_set: impl Into<Name>) -> Self {
        self.entity_set = Some(entity_set.into());
        self
    }
}

/// Everything needed to build a model, in one serializable document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
    #[serde(default)]
    pub entity_sets: Vec<EntitySetDescriptor>,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
    #[serde(default)]
    pub operation_imports: Vec<OperationImportDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ref_parses_collections() {
        let t = TypeRef::parse("Collection(Edm.String)").expect("parse");
        assert!(t.collection);
        assert_eq!(t.type_name, "Edm.String");
        assert_eq!(t.to_string(), "Collection(Edm.String)");
        assert_eq!(t.as_primitive(), Some(PrimitiveType::String));
    }

    #[test]
    fn type_ref_rejects_nested_and_malformed() {
        assert!(TypeRef::parse("Collection(Collection(Edm.String))").is_err());
        assert!(TypeRef::parse("Collection()").is_err());
        assert!(TypeRef::parse("Edm.String)").is_err());
        assert!(TypeRef::parse("").is_err());
    }

    #[test]
    fn bound_operation_splits_binding_parameter() {
        let op = OperationDescriptor::action("NS", "Act")
            .bound_to("customer", TypeRef::single("NS.Customer"))
            .parameter(ParameterDescriptor::new(
                "note",
                TypeRef::primitive(PrimitiveType::String),
            ));
        assert_eq!(
            op.binding_parameter().map(|p| p.name.as_str()),
            Some("customer")
        );
        assert_eq!(op.call_parameters().len(), 1);
        assert_eq!(op.fully_qualified_name(), "NS.Act");
    }

    #[test]
    fn descriptor_deserializes_from_json() {
        let json = r#"{
            "kind": "entity",
            "namespace": "NS",
            "name": "Thing",
            "key": ["id"],
            "properties": [
                { "name": "id", "type": "Edm.Int32", "nullable": false },
                { "name": "tags", "type": "Collection(Edm.String)" }
            ]
        }"#;
        let td: TypeDescriptor = serde_json::from_str(json).expect("deserialize");
        assert!(td.is_entity());
        assert_eq!(td.fully_qualified_name(), "NS.Thing");
        assert!(!td.properties[0].nullable);
        assert!(td.properties[1].nullable);
        assert!(td.properties[1].is_collection());
    }
}
