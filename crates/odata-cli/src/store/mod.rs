//! In-memory backend behind `odata serve`.
//!
//! Entities live in per-set vectors; relationships are kept as a set of
//! directed links so that both ends of a partnered navigation can be walked.
//! Every query works on a snapshot taken under a read lock; collection
//! results are handed out as lazy sequences over that snapshot.

mod eval;
mod seed;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use odata_edm::{EntityDataModel, NavigationPropertyDescriptor, OperationKind, PrimitiveType, TypeRef};
use odata_service::{
    LazySequence, ODataValue, Parameter, ProcessorError, QueryProcessor, QueryResult, StructuredValue,
};
use odata_uri::{KeyValue, ODataUri, PathSegment, QueryOptions, Target};

pub use seed::seed_demo;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntityRef {
    set: String,
    /// Key values in key-predicate syntax, comma separated.
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Link {
    from: EntityRef,
    navigation: String,
    to: EntityRef,
}

#[derive(Default)]
struct State {
    sets: BTreeMap<String, Vec<StructuredValue>>,
    links: BTreeSet<Link>,
}

/// Where a resource path ends up.
enum Node {
    Entities {
        set: String,
        items: Vec<StructuredValue>,
    },
    Entity {
        set: String,
        item: StructuredValue,
    },
    Value(ODataValue),
    Missing,
}

pub struct MemoryStore {
    model: Arc<EntityDataModel>,
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new(model: Arc<EntityDataModel>) -> Self {
        let sets = model
            .entity_sets()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        Self {
            model,
            state: RwLock::new(State {
                sets,
                links: BTreeSet::new(),
            }),
        }
    }

    pub fn model(&self) -> &Arc<EntityDataModel> {
        &self.model
    }

    /// Number of entities stored in `set`.
    pub fn entity_count(&self, set: &str) -> usize {
        self.read()
            .map(|state| state.sets.get(set).map_or(0, Vec::len))
            .unwrap_or_default()
    }

    /// Store `entity` in `set`, assigning an integer key when it has none.
    pub fn insert(&self, set: &str, entity: StructuredValue) -> Result<StructuredValue, ProcessorError> {
        let mut state = self.write()?;
        self.insert_into(&mut state, set, entity)
    }

    /// Link two stored entities through `navigation`, and back through its
    /// partner when the model declares one.
    pub fn link(
        &self,
        from_set: &str,
        from: &StructuredValue,
        navigation: &str,
        to_set: &str,
        to: &StructuredValue,
    ) -> Result<(), ProcessorError> {
        let from = self.reference(from_set, from)?;
        let to = self.reference(to_set, to)?;
        if self.navigation(&from.set, navigation).is_none() {
            return Err(ProcessorError::bad_request(format!(
                "`{navigation}` is not a navigation property of {}",
                from.set
            )));
        }
        let mut state = self.write()?;
        self.connect(&mut state, &from, navigation, &to);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, ProcessorError> {
        self.state
            .read()
            .map_err(|_| ProcessorError::internal("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, ProcessorError> {
        self.state
            .write()
            .map_err(|_| ProcessorError::internal("memory store lock poisoned"))
    }

    // ========================================================================
    // Keys and links
    // ========================================================================

    fn key_text(&self, entity: &StructuredValue) -> Option<String> {
        let ty = self.model.resolve(&entity.type_name)?;
        let names = self.model.key_names(ty);
        if names.is_empty() {
            return None;
        }
        let parts = names
            .iter()
            .map(|name| entity.get(name).and_then(ODataValue::to_key_literal))
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join(","))
    }

    fn reference(&self, set: &str, entity: &StructuredValue) -> Result<EntityRef, ProcessorError> {
        let key = self.key_text(entity).ok_or_else(|| {
            ProcessorError::internal(format!("{} entity without a complete key", entity.type_name))
        })?;
        Ok(EntityRef {
            set: set.to_string(),
            key,
        })
    }

    fn navigation(&self, set: &str, navigation: &str) -> Option<&NavigationPropertyDescriptor> {
        let ty = self.model.entity_set(set)?;
        self.model.navigation_property(ty, navigation)
    }

    fn set_for(&self, type_name: &str) -> Result<String, ProcessorError> {
        self.model
            .entity_set_for_type(type_name)
            .map(|s| s.name.clone())
            .ok_or_else(|| ProcessorError::internal(format!("no entity set holds {type_name}")))
    }

    fn lookup<'s>(&self, state: &'s State, reference: &EntityRef) -> Option<&'s StructuredValue> {
        state
            .sets
            .get(&reference.set)?
            .iter()
            .find(|e| self.key_text(e).as_deref() == Some(reference.key.as_str()))
    }

    fn related(&self, state: &State, from: &EntityRef, navigation: &str) -> Vec<StructuredValue> {
        state
            .links
            .iter()
            .filter(|l| l.from == *from && l.navigation == navigation)
            .filter_map(|l| self.lookup(state, &l.to))
            .cloned()
            .collect()
    }

    fn connect(&self, state: &mut State, from: &EntityRef, navigation: &str, to: &EntityRef) {
        let partner = self
            .navigation(&from.set, navigation)
            .and_then(|n| n.partner.clone());
        self.attach(state, from, navigation, to);
        if let Some(partner) = partner {
            self.attach(state, to, &partner, from);
        }
    }

    fn attach(&self, state: &mut State, from: &EntityRef, navigation: &str, to: &EntityRef) {
        let single = self
            .navigation(&from.set, navigation)
            .is_some_and(|n| !n.target.collection);
        if single {
            state
                .links
                .retain(|l| !(l.from == *from && l.navigation == navigation));
        }
        state.links.insert(Link {
            from: from.clone(),
            navigation: navigation.to_string(),
            to: to.clone(),
        });
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn reject_navigation(&self, entity: &StructuredValue) -> Result<(), ProcessorError> {
        let Some(ty) = self.model.resolve(&entity.type_name) else {
            return Err(ProcessorError::bad_request(format!(
                "unknown type {}",
                entity.type_name
            )));
        };
        match entity
            .properties
            .iter()
            .find(|p| self.model.navigation_property(ty, &p.name).is_some())
        {
            Some(p) => Err(ProcessorError::bad_request(format!(
                "`{}` is a navigation property; deep inserts and updates are not supported",
                p.name
            ))),
            None => Ok(()),
        }
    }

    fn insert_into(
        &self,
        state: &mut State,
        set: &str,
        mut entity: StructuredValue,
    ) -> Result<StructuredValue, ProcessorError> {
        self.reject_navigation(&entity)?;
        let ty = self
            .model
            .resolve(&entity.type_name)
            .ok_or_else(|| ProcessorError::bad_request(format!("unknown type {}", entity.type_name)))?;
        let existing = state
            .sets
            .get(set)
            .ok_or_else(|| ProcessorError::not_found(format!("no entity set named {set}")))?;

        for name in self.model.key_names(ty) {
            if !entity.get(name).map_or(true, ODataValue::is_null) {
                continue;
            }
            let integral = self
                .model
                .structural_property(ty, name)
                .and_then(|p| p.type_ref.as_primitive())
                .is_some_and(|p| {
                    matches!(p, PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64)
                });
            if !integral {
                return Err(ProcessorError::bad_request(format!("key property `{name}` is required")));
            }
            let next = existing
                .iter()
                .filter_map(|e| e.get(name).and_then(ODataValue::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            entity.set(name.clone(), next);
        }
        for property in self.model.structural_properties(ty) {
            if !property.nullable && entity.get(&property.name).map_or(true, ODataValue::is_null) {
                return Err(ProcessorError::bad_request(format!(
                    "property `{}` is required",
                    property.name
                )));
            }
        }

        let key = self.key_text(&entity);
        if existing.iter().any(|e| self.key_text(e) == key) {
            return Err(ProcessorError::conflict(format!(
                "{set}({}) already exists",
                key.unwrap_or_default()
            )));
        }
        tracing::debug!(set, key = ?key, "inserting entity");
        if let Some(items) = state.sets.get_mut(set) {
            items.push(entity.clone());
        }
        Ok(entity)
    }

    /// The navigation segment the URI writes through, with the entity it
    /// starts from.
    fn parent(&self, state: &State, uri: &ODataUri) -> Result<Option<(EntityRef, String)>, ProcessorError> {
        let Some((index, navigation)) = uri
            .segments
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| match s {
                PathSegment::Navigation { name, .. } => Some((i, name.clone())),
                _ => None,
            })
        else {
            return Ok(None);
        };
        match self.resolve(state, &uri.segments[..index])? {
            Node::Entity { set, item } => Ok(Some((self.reference(&set, &item)?, navigation))),
            _ => Err(ProcessorError::not_found("the parent entity does not exist")),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn resolve(&self, state: &State, segments: &[PathSegment]) -> Result<Node, ProcessorError> {
        let mut node = Node::Missing;
        for segment in segments {
            node = match (node, segment) {
                (_, PathSegment::EntitySet { name, .. }) => Node::Entities {
                    set: name.clone(),
                    items: state.sets.get(name).cloned().unwrap_or_default(),
                },
                (
                    _,
                    PathSegment::OperationImport {
                        operation,
                        kind: OperationKind::Function,
                        parameters,
                        ..
                    }
                    | PathSegment::Operation {
                        operation,
                        kind: OperationKind::Function,
                        parameters,
                        ..
                    },
                ) => self.call_function(state, operation, parameters)?,
                (Node::Missing, _) => Node::Missing,
                (Node::Entities { set, items }, PathSegment::Key { values }) => {
                    match items.into_iter().find(|e| key_matches(e, values)) {
                        Some(item) => Node::Entity { set, item },
                        None => Node::Missing,
                    }
                }
                (Node::Entity { set, item }, PathSegment::Navigation { name, target }) => {
                    let from = self.reference(&set, &item)?;
                    let related = self.related(state, &from, name);
                    let set = self.set_for(&target.type_name)?;
                    if target.collection {
                        Node::Entities {
                            set,
                            items: related,
                        }
                    } else {
                        match related.into_iter().next() {
                            Some(item) => Node::Entity { set, item },
                            None => Node::Missing,
                        }
                    }
                }
                (Node::Entity { item, .. }, PathSegment::Property { name, type_ref, .. }) => {
                    Node::Value(property_value(item.get(name), type_ref))
                }
                (
                    Node::Value(ODataValue::Structured(s)),
                    PathSegment::Property { name, type_ref, .. },
                ) => Node::Value(property_value(s.get(name), type_ref)),
                (Node::Value(ODataValue::Null), PathSegment::Property { .. }) => Node::Missing,
                (Node::Entities { set, items }, PathSegment::TypeCast { type_name }) => {
                    Node::Entities {
                        set,
                        items: items
                            .into_iter()
                            .filter(|e| self.model.is_subtype_of(&e.type_name, type_name))
                            .collect(),
                    }
                }
                (Node::Entity { set, item }, PathSegment::TypeCast { type_name }) => {
                    if self.model.is_subtype_of(&item.type_name, type_name) {
                        Node::Entity { set, item }
                    } else {
                        Node::Missing
                    }
                }
                (node, PathSegment::TypeCast { .. } | PathSegment::Count | PathSegment::Value) => node,
                (_, other) => {
                    return Err(ProcessorError::not_implemented(format!(
                        "the memory store cannot resolve {other:?}"
                    )))
                }
            };
        }
        Ok(node)
    }

    fn call_function(
        &self,
        state: &State,
        operation: &str,
        parameters: &[KeyValue],
    ) -> Result<Node, ProcessorError> {
        match operation {
            "ODataDemo.GetTopCustomers" => {
                let n = parameters
                    .iter()
                    .find(|p| p.name == "n")
                    .and_then(|p| ODataValue::from_literal(&p.value).as_i64())
                    .unwrap_or_default();
                let mut ranked = Vec::new();
                for customer in state.sets.get("Customers").into_iter().flatten() {
                    let from = self.reference("Customers", customer)?;
                    ranked.push((self.related(state, &from, "Orders").len(), customer.clone()));
                }
                // Stable: ties keep insertion order.
                ranked.sort_by(|a, b| b.0.cmp(&a.0));
                Ok(Node::Entities {
                    set: "Customers".to_string(),
                    items: ranked
                        .into_iter()
                        .take(usize::try_from(n).unwrap_or_default())
                        .map(|(_, c)| c)
                        .collect(),
                })
            }
            other => Err(ProcessorError::not_implemented(format!(
                "function {other} is not implemented"
            ))),
        }
    }

    fn select(&self, items: Vec<StructuredValue>, options: &QueryOptions) -> Result<Vec<StructuredValue>, ProcessorError> {
        let mut items = match &options.filter {
            Some(filter) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    if eval::matches(filter, &item)? {
                        kept.push(item);
                    }
                }
                kept
            }
            None => items,
        };
        eval::sort(&mut items, &options.order_by)?;
        Ok(items)
    }

    fn expand(
        &self,
        state: &State,
        set: &str,
        mut entity: StructuredValue,
        options: &QueryOptions,
    ) -> Result<StructuredValue, ProcessorError> {
        if options.expand.is_empty() {
            return Ok(entity);
        }
        let from = self.reference(set, &entity)?;
        for item in &options.expand {
            let target_set = self.set_for(&item.target_type)?;
            let related = self.select(self.related(state, &from, &item.navigation), &item.options)?;
            let related = page(related, &item.options)
                .into_iter()
                .map(|e| self.expand(state, &target_set, e, &item.options).map(ODataValue::from))
                .collect::<Result<Vec<_>, _>>()?;
            let value = if item.collection {
                ODataValue::Collection(related)
            } else {
                related.into_iter().next().unwrap_or(ODataValue::Null)
            };
            entity.set(item.navigation.clone(), value);
        }
        Ok(entity)
    }
}

fn key_matches(entity: &StructuredValue, values: &[KeyValue]) -> bool {
    values.iter().all(|kv| {
        entity
            .get(&kv.name)
            .is_some_and(|v| eval::equals(v, &ODataValue::from_literal(&kv.value)))
    })
}

fn page(items: Vec<StructuredValue>, options: &QueryOptions) -> Vec<StructuredValue> {
    let skip = options.skip.map_or(0, |s| usize::try_from(s).unwrap_or(usize::MAX));
    let top = options.top.map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));
    items.into_iter().skip(skip).take(top).collect()
}

fn parameter<'p>(parameters: &'p [Parameter], name: &str) -> Option<&'p ODataValue> {
    parameters.iter().find(|p| p.name == name).map(|p| &p.value)
}

/// Unset collection properties read as empty collections.
fn property_value(value: Option<&ODataValue>, type_ref: &TypeRef) -> ODataValue {
    match value {
        Some(ODataValue::Null) | None if type_ref.collection => ODataValue::Collection(Vec::new()),
        Some(value) => value.clone(),
        None => ODataValue::Null,
    }
}

// ============================================================================
// QueryProcessor
// ============================================================================

impl QueryProcessor for MemoryStore {
    fn query(&self, uri: &ODataUri) -> Result<QueryResult, ProcessorError> {
        let state = self.read()?;
        let node = self.resolve(&state, &uri.segments)?;
        tracing::debug!(path = %uri.canonical_path(), "memory store query");

        Ok(match (&uri.target, node) {
            (_, Node::Missing) => QueryResult::Empty,
            (Target::Count, Node::Entities { items, .. }) => {
                let n = self.select(items, &uri.options)?.len();
                QueryResult::Single(ODataValue::Int(n as i64))
            }
            (Target::Count, Node::Value(ODataValue::Collection(items))) => {
                QueryResult::Single(ODataValue::Int(items.len() as i64))
            }
            (Target::EntityCollection { .. }, Node::Entities { set, items }) => {
                let items = self.select(items, &uri.options)?;
                let total = items.len() as u64;
                let values = page(items, &uri.options)
                    .into_iter()
                    .map(|e| self.expand(&state, &set, e, &uri.options).map(ODataValue::from))
                    .collect::<Result<Vec<_>, _>>()?;
                QueryResult::Lazy(LazySequence::from_values(values).with_count(total))
            }
            (Target::Entity { .. }, Node::Entity { set, item }) => {
                QueryResult::Single(self.expand(&state, &set, item, &uri.options)?.into())
            }
            (Target::Property { .. } | Target::Value { .. }, Node::Value(value)) => QueryResult::Single(value),
            (target, _) => {
                return Err(ProcessorError::not_implemented(format!(
                    "the memory store cannot answer {target:?}"
                )))
            }
        })
    }

    fn create(&self, uri: &ODataUri, entity: StructuredValue) -> Result<QueryResult, ProcessorError> {
        let set = uri
            .entity_set
            .clone()
            .ok_or_else(|| ProcessorError::bad_request("the target has no entity set"))?;
        let mut state = self.write()?;
        let parent = self.parent(&state, uri)?;
        let stored = self.insert_into(&mut state, &set, entity)?;
        if let Some((from, navigation)) = parent {
            let to = self.reference(&set, &stored)?;
            self.connect(&mut state, &from, &navigation, &to);
        }
        Ok(QueryResult::Single(stored.into()))
    }

    fn update(&self, uri: &ODataUri, entity: StructuredValue, partial: bool) -> Result<(), ProcessorError> {
        self.reject_navigation(&entity)?;
        let mut state = self.write()?;
        let Node::Entity { set, item } = self.resolve(&state, &uri.segments)? else {
            return Err(ProcessorError::not_found(format!(
                "{} does not exist",
                uri.canonical_path()
            )));
        };
        let reference = self.reference(&set, &item)?;
        let keys = self
            .model
            .resolve(&item.type_name)
            .map(|ty| self.model.key_names(ty).to_vec())
            .unwrap_or_default();
        for name in &keys {
            let changed = entity
                .get(name)
                .is_some_and(|v| !item.get(name).is_some_and(|old| eval::equals(old, v)));
            if changed {
                return Err(ProcessorError::bad_request(format!(
                    "key property `{name}` cannot change"
                )));
            }
        }

        let replacement = if partial {
            let mut merged = item;
            merged.merge(entity);
            merged
        } else {
            let mut replaced = entity;
            for name in &keys {
                if replaced.get(name).is_none() {
                    replaced.set(name.clone(), item.get(name).cloned().unwrap_or(ODataValue::Null));
                }
            }
            replaced
        };
        let slot = state
            .sets
            .get_mut(&set)
            .and_then(|items| {
                items
                    .iter_mut()
                    .find(|e| self.key_text(e).as_deref() == Some(reference.key.as_str()))
            })
            .ok_or_else(|| ProcessorError::not_found(format!("{} vanished", uri.canonical_path())))?;
        *slot = replacement;
        Ok(())
    }

    fn delete(&self, uri: &ODataUri) -> Result<(), ProcessorError> {
        let mut state = self.write()?;
        let Node::Entity { set, item } = self.resolve(&state, &uri.segments)? else {
            return Err(ProcessorError::not_found(format!(
                "{} does not exist",
                uri.canonical_path()
            )));
        };
        let reference = self.reference(&set, &item)?;
        if let Some(items) = state.sets.get_mut(&set) {
            items.retain(|e| self.key_text(e).as_deref() != Some(reference.key.as_str()));
        }
        state
            .links
            .retain(|l| l.from != reference && l.to != reference);
        tracing::debug!(set = %set, key = %reference.key, "deleted entity");
        Ok(())
    }

    fn invoke_operation(
        &self,
        uri: &ODataUri,
        parameters: Vec<Parameter>,
    ) -> Result<QueryResult, ProcessorError> {
        let Target::Action { operation, .. } = &uri.target else {
            return Err(ProcessorError::bad_request("not an action"));
        };
        match operation.as_str() {
            "ODataDemo.ODataDemoAction" => {
                let state = self.read()?;
                let binding = &uri.segments[..uri.segments.len().saturating_sub(1)];
                let Node::Entity { item, .. } = self.resolve(&state, binding)? else {
                    return Err(ProcessorError::not_found("the bound customer does not exist"));
                };
                let name = item.get("name").and_then(ODataValue::as_str).unwrap_or("customer");
                let note = parameter(&parameters, "note")
                    .and_then(ODataValue::as_str)
                    .unwrap_or_default();
                Ok(QueryResult::Single(ODataValue::String(format!("{name}: {note}"))))
            }
            "ODataDemo.ODataDemoActionImport" => {
                // Ships up to `count` pending orders and reports how many.
                let count = parameter(&parameters, "count")
                    .and_then(ODataValue::as_i64)
                    .unwrap_or_default();
                let mut state = self.write()?;
                let mut shipped = 0i64;
                if let Some(orders) = state.sets.get_mut("Orders") {
                    for order in orders
                        .iter_mut()
                        .filter(|o| o.get("shipped") == Some(&ODataValue::Boolean(false)))
                        .take(usize::try_from(count).unwrap_or_default())
                    {
                        order.set("shipped", true);
                        shipped += 1;
                    }
                }
                Ok(QueryResult::Single(ODataValue::Int(shipped)))
            }
            other => Err(ProcessorError::not_implemented(format!(
                "action {other} is not implemented"
            ))),
        }
    }
}
