//! The resolved, immutable entity data model.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::descriptor::{
    EntitySetDescriptor, ModelDocument, NavigationPropertyDescriptor, OperationDescriptor,
    OperationImportDescriptor, OperationKind, PropertyDescriptor, TypeDescriptor, TypeKind,
    TypeRef,
};
use crate::primitive::{PrimitiveType, EDM_NAMESPACE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("`{owner}` references unknown type `{reference}`")]
    DanglingReference { owner: String, reference: String },
    #[error("`{owner}` references `{reference}`, which is not {expected}")]
    WrongKind {
        owner: String,
        reference: String,
        expected: &'static str,
    },
    #[error("duplicate name `{name}` in `{scope}`")]
    DuplicateName { scope: String, name: String },
    #[error("entity type `{entity_type}` declares no key property")]
    MissingKey { entity_type: String },
    #[error("key property `{property}` of `{entity_type}` {reason}")]
    InvalidKey {
        entity_type: String,
        property: String,
        reason: &'static str,
    },
    #[error("inheritance cycle through `{type_name}`")]
    InheritanceCycle { type_name: String },
    #[error("invalid descriptor `{name}`: {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

/// Immutable model: types, entity sets, operations and operation imports.
///
/// Construct via [`EntityDataModelBuilder::build`]; there are no mutating
/// methods, so a built model can be shared (`Arc<EntityDataModel>`) across
/// request tasks without synchronisation.
#[derive(Debug, Clone)]
pub struct EntityDataModel {
    types: BTreeMap<String, TypeDescriptor>,
    entity_sets: Vec<EntitySetDescriptor>,
    entity_set_index: HashMap<String, usize>,
    operations: BTreeMap<(bool, String, String), OperationDescriptor>,
    operation_imports: BTreeMap<String, OperationImportDescriptor>,
}

impl EntityDataModel {
    pub fn builder() -> EntityDataModelBuilder {
        EntityDataModelBuilder::new()
    }

    /// Resolve a fully-qualified type name. Primitive types resolve under the
    /// `Edm` namespace.
    pub fn resolve(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    /// The entity type exposed by an entity set.
    pub fn entity_set(&self, name: &str) -> Option<&TypeDescriptor> {
        let set = self.entity_set_descriptor(name)?;
        self.resolve(&set.entity_type)
    }

    pub fn entity_set_descriptor(&self, name: &str) -> Option<&EntitySetDescriptor> {
        self.entity_set_index
            .get(name)
            .map(|&index| &self.entity_sets[index])
    }

    /// First entity set (in declaration order) whose entity type is
    /// `type_name` or one of its base types.
    pub fn entity_set_for_type(&self, type_name: &str) -> Option<&EntitySetDescriptor> {
        self.entity_sets
            .iter()
            .find(|set| set.entity_type == type_name)
            .or_else(|| {
                self.entity_sets
                    .iter()
                    .find(|set| self.is_subtype_of(type_name, &set.entity_type))
            })
    }

    pub fn operation(
        &self,
        namespace: &str,
        name: &str,
        is_bound: bool,
    ) -> Option<&OperationDescriptor> {
        self.operations
            .get(&(is_bound, namespace.to_string(), name.to_string()))
    }

    /// Resolve an operation import together with the operation it exposes.
    pub fn operation_import(
        &self,
        name: &str,
    ) -> Option<(&OperationImportDescriptor, &OperationDescriptor)> {
        let import = self.operation_imports.get(name)?;
        let (namespace, op_name) = split_qualified(&import.operation)?;
        let op = self.operation(namespace, op_name, false)?;
        Some((import, op))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values().filter(|t| t.is_structured())
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &EntitySetDescriptor> {
        self.entity_sets.iter()
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values()
    }

    pub fn operation_imports(&self) -> impl Iterator<Item = &OperationImportDescriptor> {
        self.operation_imports.values()
    }

    /// Namespaces of user-declared types and operations, sorted.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .types()
            .map(|t| t.namespace.as_str())
            .chain(self.operations().map(|o| o.namespace.as_str()))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn base_type(&self, ty: &TypeDescriptor) -> Option<&TypeDescriptor> {
        ty.base_type.as_deref().and_then(|b| self.resolve(b))
    }

    /// True when `derived` equals `base` or inherits from it.
    pub fn is_subtype_of(&self, derived: &str, base: &str) -> bool {
        let mut current = self.resolve(derived);
        while let Some(ty) = current {
            if ty.fully_qualified_name() == base {
                return true;
            }
            current = self.base_type(ty);
        }
        false
    }

    /// Structural properties including inherited ones, base type first.
    pub fn structural_properties<'a>(&'a self, ty: &'a TypeDescriptor) -> Vec<&'a PropertyDescriptor> {
        let mut chain = self.inheritance_chain(ty);
        chain.reverse();
        chain.into_iter().flat_map(|t| t.properties.iter()).collect()
    }

    pub fn navigation_properties<'a>(
        &'a self,
        ty: &'a TypeDescriptor,
    ) -> Vec<&'a NavigationPropertyDescriptor> {
        let mut chain = self.inheritance_chain(ty);
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|t| t.navigation_properties.iter())
            .collect()
    }

    pub fn structural_property<'a>(
        &'a self,
        ty: &'a TypeDescriptor,
        name: &str,
    ) -> Option<&'a PropertyDescriptor> {
        self.inheritance_chain(ty)
            .into_iter()
            .find_map(|t| t.properties.iter().find(|p| p.name == name))
    }

    pub fn navigation_property<'a>(
        &'a self,
        ty: &'a TypeDescriptor,
        name: &str,
    ) -> Option<&'a NavigationPropertyDescriptor> {
        self.inheritance_chain(ty)
            .into_iter()
            .find_map(|t| t.navigation_properties.iter().find(|p| p.name == name))
    }

    /// Key property names, taken from the nearest type in the inheritance
    /// chain that declares a key.
    pub fn key_names<'a>(&'a self, ty: &'a TypeDescriptor) -> &'a [String] {
        self.inheritance_chain(ty)
            .into_iter()
            .find(|t| !t.key.is_empty())
            .map(|t| t.key.as_slice())
            .unwrap_or(&[])
    }

    pub fn key_properties<'a>(&'a self, ty: &'a TypeDescriptor) -> Vec<&'a PropertyDescriptor> {
        self.key_names(ty)
            .iter()
            .filter_map(|k| self.structural_property(ty, k))
            .collect()
    }

    fn inheritance_chain<'a>(&'a self, ty: &'a TypeDescriptor) -> Vec<&'a TypeDescriptor> {
        let mut chain = vec![ty];
        let mut current = ty;
        while let Some(base) = self.base_type(current) {
            // Cycles are rejected at build time.
            if chain.len() > self.types.len() {
                break;
            }
            chain.push(base);
            current = base;
        }
        chain
    }
}

/// Collects descriptors and validates them into an [`EntityDataModel`].
#[derive(Debug, Clone, Default)]
pub struct EntityDataModelBuilder {
    document: ModelDocument,
}

impl EntityDataModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: ModelDocument) -> Self {
        Self { document }
    }

    pub fn add_type(mut self, ty: TypeDescriptor) -> Self {
        self.document.types.push(ty);
        self
    }

    pub fn add_types(mut self, types: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.document.types.extend(types);
        self
    }

    pub fn add_entity_set(mut self, name: &str, entity_type: &str) -> Self {
        self.document
            .entity_sets
            .push(EntitySetDescriptor::new(name, entity_type));
        self
    }

    pub fn add_operation(mut self, operation: OperationDescriptor) -> Self {
        self.document.operations.push(operation);
        self
    }

    pub fn add_operation_import(mut self, import: OperationImportDescriptor) -> Self {
        self.document.operation_imports.push(import);
        self
    }

    /// Validate referential integrity and produce the model. The first
    /// violation found is returned; a failed build yields no model.
    pub fn build(self) -> Result<EntityDataModel, ModelError> {
        let ModelDocument {
            types: declared,
            entity_sets,
            operations: declared_ops,
            operation_imports: declared_imports,
        } = self.document;

        let mut types: BTreeMap<String, TypeDescriptor> = PrimitiveType::ALL
            .iter()
            .map(|p| (p.fully_qualified_name(), TypeDescriptor::builtin(*p)))
            .collect();

        for ty in declared {
            let fqn = ty.fully_qualified_name();
            if ty.namespace.trim().is_empty() || ty.name.trim().is_empty() {
                return Err(ModelError::InvalidDescriptor {
                    name: fqn,
                    reason: "namespace and name must be non-empty".to_string(),
                });
            }
            if matches!(ty.kind, TypeKind::Primitive(_)) || ty.namespace == EDM_NAMESPACE {
                return Err(ModelError::InvalidDescriptor {
                    name: fqn,
                    reason: "primitive types are built in and cannot be declared".to_string(),
                });
            }
            if types.contains_key(&fqn) {
                return Err(ModelError::DuplicateName {
                    scope: ty.namespace.clone(),
                    name: ty.name.clone(),
                });
            }
            types.insert(fqn, ty);
        }

        let mut model = EntityDataModel {
            types,
            entity_sets: Vec::new(),
            entity_set_index: HashMap::new(),
            operations: BTreeMap::new(),
            operation_imports: BTreeMap::new(),
        };

        model.validate_inheritance()?;
        model.validate_members()?;
        model.validate_keys()?;

        for set in entity_sets {
            if model.entity_set_index.contains_key(&set.name) {
                return Err(ModelError::DuplicateName {
                    scope: "EntityContainer".to_string(),
                    name: set.name,
                });
            }
            model.expect_kind(&set.name, &set.entity_type, TypeKind::Entity, "an entity type")?;
            model
                .entity_set_index
                .insert(set.name.clone(), model.entity_sets.len());
            model.entity_sets.push(set);
        }

        // Types and operations share one namespace; a bound and an unbound
        // operation may share a name.
        for op in declared_ops {
            model.validate_operation(&op)?;
            let key = (op.is_bound, op.namespace.clone(), op.name.clone());
            if model.operations.contains_key(&key)
                || model.types.contains_key(&op.fully_qualified_name())
            {
                return Err(ModelError::DuplicateName {
                    scope: op.namespace.clone(),
                    name: op.name.clone(),
                });
            }
            model.operations.insert(key, op);
        }

        for import in declared_imports {
            if model.operation_imports.contains_key(&import.name)
                || model.entity_set_index.contains_key(&import.name)
            {
                return Err(ModelError::DuplicateName {
                    scope: "EntityContainer".to_string(),
                    name: import.name,
                });
            }
            let resolved = split_qualified(&import.operation)
                .and_then(|(ns, name)| model.operation(ns, name, false));
            if resolved.is_none() {
                return Err(ModelError::DanglingReference {
                    owner: import.name.clone(),
                    reference: import.operation.clone(),
                });
            }
            if let Some(set) = import.entity_set.as_deref() {
                if !model.entity_set_index.contains_key(set) {
                    return Err(ModelError::DanglingReference {
                        owner: import.name.clone(),
                        reference: set.to_string(),
                    });
                }
            }
            model.operation_imports.insert(import.name.clone(), import);
        }

        Ok(model)
    }
}

impl EntityDataModel {
    fn expect_kind(
        &self,
        owner: &str,
        reference: &str,
        kind: TypeKind,
        expected: &'static str,
    ) -> Result<(), ModelError> {
        let ty = self
            .resolve(reference)
            .ok_or_else(|| ModelError::DanglingReference {
                owner: owner.to_string(),
                reference: reference.to_string(),
            })?;
        if ty.kind != kind {
            return Err(ModelError::WrongKind {
                owner: owner.to_string(),
                reference: reference.to_string(),
                expected,
            });
        }
        Ok(())
    }

    fn expect_type(&self, owner: &str, type_ref: &TypeRef) -> Result<&TypeDescriptor, ModelError> {
        self.resolve(&type_ref.type_name)
            .ok_or_else(|| ModelError::DanglingReference {
                owner: owner.to_string(),
                reference: type_ref.type_name.clone(),
            })
    }

    fn validate_inheritance(&self) -> Result<(), ModelError> {
        for ty in self.types() {
            let fqn = ty.fully_qualified_name();
            let mut seen: HashSet<String> = HashSet::from([fqn.clone()]);
            let mut current = ty;
            while let Some(base_name) = current.base_type.as_deref() {
                let base = self
                    .resolve(base_name)
                    .ok_or_else(|| ModelError::DanglingReference {
                        owner: current.fully_qualified_name(),
                        reference: base_name.to_string(),
                    })?;
                if base.kind != ty.kind {
                    return Err(ModelError::WrongKind {
                        owner: fqn.clone(),
                        reference: base_name.to_string(),
                        expected: if ty.is_entity() {
                            "an entity type"
                        } else {
                            "a complex type"
                        },
                    });
                }
                if !seen.insert(base_name.to_string()) {
                    return Err(ModelError::InheritanceCycle { type_name: fqn });
                }
                current = base;
            }
        }
        Ok(())
    }

    fn validate_members(&self) -> Result<(), ModelError> {
        for ty in self.types() {
            let fqn = ty.fully_qualified_name();
            let mut names: HashSet<&str> = HashSet::new();
            for p in self.structural_properties(ty) {
                if !names.insert(p.name.as_str()) {
                    return Err(ModelError::DuplicateName {
                        scope: fqn.clone(),
                        name: p.name.clone(),
                    });
                }
            }
            for n in self.navigation_properties(ty) {
                if !names.insert(n.name.as_str()) {
                    return Err(ModelError::DuplicateName {
                        scope: fqn.clone(),
                        name: n.name.clone(),
                    });
                }
            }

            for p in &ty.properties {
                let owner = format!("{fqn}/{}", p.name);
                let target = self.expect_type(&owner, &p.type_ref)?;
                if target.is_entity() {
                    return Err(ModelError::WrongKind {
                        owner,
                        reference: p.type_ref.type_name.clone(),
                        expected: "a primitive or complex type",
                    });
                }
            }
            for n in &ty.navigation_properties {
                let owner = format!("{fqn}/{}", n.name);
                self.expect_kind(&owner, &n.target.type_name, TypeKind::Entity, "an entity type")?;
            }
            if ty.is_complex() && !ty.navigation_properties.is_empty() {
                return Err(ModelError::InvalidDescriptor {
                    name: fqn,
                    reason: "complex types cannot declare navigation properties".to_string(),
                });
            }
            if !ty.is_entity() && !ty.key.is_empty() {
                return Err(ModelError::InvalidDescriptor {
                    name: fqn,
                    reason: "only entity types declare keys".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_keys(&self) -> Result<(), ModelError> {
        for ty in self.types().filter(|t| t.is_entity()) {
            let fqn = ty.fully_qualified_name();
            let key = self.key_names(ty);
            if key.is_empty() {
                return Err(ModelError::MissingKey { entity_type: fqn });
            }
            for name in key {
                let property = self.structural_property(ty, name).ok_or_else(|| {
                    ModelError::InvalidKey {
                        entity_type: fqn.clone(),
                        property: name.clone(),
                        reason: "is not a declared property",
                    }
                })?;
                if property.is_collection() || property.type_ref.as_primitive().is_none() {
                    return Err(ModelError::InvalidKey {
                        entity_type: fqn.clone(),
                        property: name.clone(),
                        reason: "must be a single primitive value",
                    });
                }
                if property.nullable {
                    return Err(ModelError::InvalidKey {
                        entity_type: fqn.clone(),
                        property: name.clone(),
                        reason: "must not be nullable",
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_operation(&self, op: &OperationDescriptor) -> Result<(), ModelError> {
        let fqn = op.fully_qualified_name();
        if op.namespace.trim().is_empty() || op.name.trim().is_empty() {
            return Err(ModelError::InvalidDescriptor {
                name: fqn,
                reason: "namespace and name must be non-empty".to_string(),
            });
        }
        if op.is_bound && op.parameters.is_empty() {
            return Err(ModelError::InvalidDescriptor {
                name: fqn,
                reason: "bound operations need a binding parameter".to_string(),
            });
        }
        if op.kind == OperationKind::Function && op.return_type.is_none() {
            return Err(ModelError::InvalidDescriptor {
                name: fqn,
                reason: "functions must declare a return type".to_string(),
            });
        }
        let mut names: HashSet<&str> = HashSet::new();
        for p in &op.parameters {
            if !names.insert(p.name.as_str()) {
                return Err(ModelError::DuplicateName {
                    scope: fqn.clone(),
                    name: p.name.clone(),
                });
            }
            self.expect_type(&format!("{fqn}/{}", p.name), &p.type_ref)?;
        }
        if let Some(ret) = &op.return_type {
            self.expect_type(&fqn, ret)?;
        }
        Ok(())
    }
}

/// Split `Namespace.Name` at the last dot.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (ns, simple) = name.rsplit_once('.')?;
    if ns.is_empty() || simple.is_empty() {
        return None;
    }
    Some((ns, simple))
}
