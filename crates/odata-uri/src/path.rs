//! Resource path parsing: `Customers(1)/Orders/$count` and friends.
//!
//! Each segment is resolved against the model as soon as it is read, so the
//! first unknown or misplaced segment stops the parse.

use nom::branch::alt;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{char as pchar, multispace0};
use nom::combinator::{all_consuming, map, recognize};
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, pair, separated_pair};
use nom::IResult;
use odata_edm::{
    split_qualified, EntityDataModel, OperationDescriptor, OperationKind, PrimitiveType,
    TypeDescriptor, TypeRef,
};
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::error::{ParseError, ParseErrorKind, Result};
use crate::literal::{is_ident_continue, is_ident_start, literal, Literal};

const COMPONENT: &str = "path";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub name: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum PathSegment {
    Metadata,
    EntitySet {
        name: String,
        entity_type: String,
    },
    Key {
        values: Vec<KeyValue>,
    },
    Navigation {
        name: String,
        target: TypeRef,
    },
    Property {
        name: String,
        type_ref: TypeRef,
        /// Whether the declared property admits null.
        nullable: bool,
    },
    TypeCast {
        type_name: String,
    },
    /// Bound action or function, addressed by qualified name.
    Operation {
        operation: String,
        kind: OperationKind,
        parameters: Vec<KeyValue>,
        return_type: Option<TypeRef>,
    },
    OperationImport {
        name: String,
        operation: String,
        kind: OperationKind,
        parameters: Vec<KeyValue>,
        return_type: Option<TypeRef>,
    },
    Count,
    Value,
}

/// What a resource path addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    ServiceDocument,
    Metadata,
    EntityCollection {
        entity_type: String,
    },
    Entity {
        entity_type: String,
    },
    /// A structural property or a non-entity function result.
    Property {
        name: String,
        type_ref: TypeRef,
    },
    /// Raw value of a primitive property (`/$value`).
    Value {
        primitive: PrimitiveType,
    },
    Count,
    Action {
        operation: String,
        is_bound: bool,
        return_type: Option<TypeRef>,
    },
}

impl Target {
    pub fn is_collection(&self) -> bool {
        match self {
            Target::EntityCollection { .. } => true,
            Target::Property { type_ref, .. } => type_ref.collection,
            _ => false,
        }
    }
}

/// Result of resolving a resource path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub segments: Vec<PathSegment>,
    pub target: Target,
    /// Entity set the addressed entities belong to, when known.
    pub entity_set: Option<String>,
    /// Structured type that `$filter`, `$select`, ... address.
    pub subject: Option<String>,
    /// Whether the options address a collection.
    pub collection: bool,
}

struct RawSegment {
    name: String,
    args: Option<String>,
    /// Decoded segment text.
    text: String,
    offset: usize,
}

pub fn parse_resource_path(path: &str, model: &EntityDataModel) -> Result<ResolvedPath> {
    let mut resolver = Resolver {
        model,
        resolved: ResolvedPath {
            segments: Vec::new(),
            target: Target::ServiceDocument,
            entity_set: None,
            subject: None,
            collection: false,
        },
    };
    for raw in split_segments(path)? {
        resolver.step(&raw)?;
    }
    Ok(resolver.finish())
}

/// Split on `/` outside single-quoted literals, with each piece's byte
/// offset. A quote may arrive percent-encoded as `%27`; `''` toggles twice.
fn split_raw(path: &str) -> Vec<(usize, &str)> {
    let bytes = path.as_bytes();
    let mut out = Vec::new();
    let mut quoted = false;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => quoted = !quoted,
            b'%' if path.get(i..i + 3).is_some_and(|e| e == "%27") => {
                quoted = !quoted;
                i += 3;
                continue;
            }
            b'/' if !quoted => {
                out.push((start, &path[start..i]));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push((start, &path[start..]));
    out
}

fn split_segments(path: &str) -> Result<Vec<RawSegment>> {
    let mut out = Vec::new();
    for (start, raw) in split_raw(path) {
        if raw.is_empty() {
            continue;
        }
        let text = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| {
                ParseError::new(
                    ParseErrorKind::Syntax,
                    COMPONENT,
                    raw,
                    start,
                    "segment is not valid UTF-8 after percent-decoding",
                )
            })?
            .into_owned();
        let (name, args) = match text.find('(') {
            None => (text.clone(), None),
            Some(open) => {
                let Some(inner) = text[open + 1..].strip_suffix(')') else {
                    return Err(ParseError::new(
                        ParseErrorKind::Syntax,
                        COMPONENT,
                        text.as_str(),
                        start,
                        "unbalanced parenthesis in segment",
                    ));
                };
                (text[..open].to_string(), Some(inner.to_string()))
            }
        };
        out.push(RawSegment {
            name,
            args,
            text,
            offset: start,
        });
    }
    Ok(out)
}

struct Resolver<'m> {
    model: &'m EntityDataModel,
    resolved: ResolvedPath,
}

impl<'m> Resolver<'m> {
    fn finish(self) -> ResolvedPath {
        self.resolved
    }

    fn error(&self, kind: ParseErrorKind, seg: &RawSegment, message: impl Into<String>) -> ParseError {
        ParseError::new(kind, COMPONENT, seg.text.as_str(), seg.offset, message)
    }

    fn push(&mut self, segment: PathSegment, target: Target) {
        self.resolved.segments.push(segment);
        self.resolved.target = target;
    }

    fn set_subject(&mut self, subject: Option<String>, collection: bool) {
        self.resolved.subject = subject;
        self.resolved.collection = collection;
    }

    fn step(&mut self, seg: &RawSegment) -> Result<()> {
        let target = self.resolved.target.clone();
        match (&target, seg.name.as_str()) {
            (Target::ServiceDocument, "$metadata") if seg.args.is_none() => {
                self.push(PathSegment::Metadata, Target::Metadata);
                Ok(())
            }
            (Target::ServiceDocument, _) => self.first(seg),
            (Target::Metadata | Target::Count | Target::Value { .. } | Target::Action { .. }, _) => {
                Err(self.error(
                    ParseErrorKind::InvalidSegment,
                    seg,
                    "no segment may follow this one",
                ))
            }
            (_, "$count") => self.count(seg, &target),
            (_, "$value") => self.value(seg, &target),
            (_, name) if name.starts_with('$') => Err(self.error(
                ParseErrorKind::UnknownSegment,
                seg,
                format!("unsupported path segment `{name}`"),
            )),
            (_, name) if name.contains('.') => self.qualified(seg, &target),
            _ => self.member(seg, &target),
        }
    }

    fn first(&mut self, seg: &RawSegment) -> Result<()> {
        if let Some(set) = self.model.entity_set_descriptor(&seg.name) {
            let entity_type = set.entity_type.clone();
            self.resolved.entity_set = Some(set.name.clone());
            self.push(
                PathSegment::EntitySet {
                    name: set.name.clone(),
                    entity_type: entity_type.clone(),
                },
                Target::EntityCollection {
                    entity_type: entity_type.clone(),
                },
            );
            self.set_subject(Some(entity_type.clone()), true);
            if let Some(args) = &seg.args {
                self.key(seg, &entity_type, args)?;
            }
            return Ok(());
        }

        if let Some((import, op)) = self.model.operation_import(&seg.name) {
            let parameters = self.operation_parameters(seg, op)?;
            let segment = PathSegment::OperationImport {
                name: import.name.clone(),
                operation: op.fully_qualified_name(),
                kind: op.kind,
                parameters,
                return_type: op.return_type.clone(),
            };
            let entity_set = import.entity_set.clone();
            return self.operation_result(seg, segment, op, entity_set);
        }

        Err(self.error(
            ParseErrorKind::UnknownSegment,
            seg,
            format!("`{}` is not an entity set or operation import", seg.name),
        ))
    }

    fn count(&mut self, seg: &RawSegment, target: &Target) -> Result<()> {
        if seg.args.is_some() || !target.is_collection() {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                "$count requires a collection",
            ));
        }
        self.push(PathSegment::Count, Target::Count);
        Ok(())
    }

    fn value(&mut self, seg: &RawSegment, target: &Target) -> Result<()> {
        let primitive = match target {
            Target::Property { type_ref, .. } if !type_ref.collection => type_ref.as_primitive(),
            _ => None,
        };
        let Some(primitive) = primitive.filter(|_| seg.args.is_none()) else {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                "$value requires a single primitive property",
            ));
        };
        self.push(PathSegment::Value, Target::Value { primitive });
        self.set_subject(None, false);
        Ok(())
    }

    /// Structured type and collection-ness of the current target.
    fn current_type(&self, target: &Target) -> Option<(&'m TypeDescriptor, bool)> {
        match target {
            Target::EntityCollection { entity_type } => {
                self.model.resolve(entity_type).map(|t| (t, true))
            }
            Target::Entity { entity_type } => self.model.resolve(entity_type).map(|t| (t, false)),
            Target::Property { type_ref, .. } => self
                .model
                .resolve(&type_ref.type_name)
                .filter(|t| t.is_structured())
                .map(|t| (t, type_ref.collection)),
            _ => None,
        }
    }

    fn qualified(&mut self, seg: &RawSegment, target: &Target) -> Result<()> {
        let current = self.current_type(target);

        if let (Some(cast), Some((ty, collection))) = (self.model.resolve(&seg.name), current) {
            if cast.is_structured() {
                let cast_name = cast.fully_qualified_name();
                if !self.model.is_subtype_of(&cast_name, &ty.fully_qualified_name()) {
                    return Err(self.error(
                        ParseErrorKind::TypeMismatch,
                        seg,
                        format!(
                            "`{cast_name}` does not derive from `{}`",
                            ty.fully_qualified_name()
                        ),
                    ));
                }
                let next = match target {
                    Target::EntityCollection { .. } => Target::EntityCollection {
                        entity_type: cast_name.clone(),
                    },
                    Target::Entity { .. } => Target::Entity {
                        entity_type: cast_name.clone(),
                    },
                    Target::Property { name, .. } => Target::Property {
                        name: name.clone(),
                        type_ref: TypeRef {
                            type_name: cast_name.clone(),
                            collection,
                        },
                    },
                    other => other.clone(),
                };
                self.push(
                    PathSegment::TypeCast {
                        type_name: cast_name.clone(),
                    },
                    next,
                );
                self.set_subject(Some(cast_name.clone()), collection);
                if let Some(args) = &seg.args {
                    if !matches!(target, Target::EntityCollection { .. }) {
                        return Err(self.error(
                            ParseErrorKind::InvalidSegment,
                            seg,
                            "a key predicate requires an entity collection",
                        ));
                    }
                    self.key(seg, &cast_name, args)?;
                }
                return Ok(());
            }
        }

        let bound = split_qualified(&seg.name)
            .and_then(|(ns, name)| self.model.operation(ns, name, true));
        let Some(op) = bound else {
            return Err(self.error(
                ParseErrorKind::UnknownSegment,
                seg,
                format!("`{}` is neither a type nor a bound operation", seg.name),
            ));
        };
        let Some((ty, collection)) = current else {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                format!("`{}` cannot be bound to this resource", seg.name),
            ));
        };
        let binding_ok = op.binding_parameter().is_some_and(|b| {
            b.type_ref.collection == collection
                && self
                    .model
                    .is_subtype_of(&ty.fully_qualified_name(), &b.type_ref.type_name)
        });
        if !binding_ok {
            return Err(self.error(
                ParseErrorKind::TypeMismatch,
                seg,
                format!(
                    "`{}` is not bound to {}{}",
                    seg.name,
                    ty.fully_qualified_name(),
                    if collection { " collections" } else { "" }
                ),
            ));
        }

        let parameters = self.operation_parameters(seg, op)?;
        let segment = PathSegment::Operation {
            operation: op.fully_qualified_name(),
            kind: op.kind,
            parameters,
            return_type: op.return_type.clone(),
        };
        self.operation_result(seg, segment, op, op.entity_set_path.clone())
    }

    fn member(&mut self, seg: &RawSegment, target: &Target) -> Result<()> {
        let Some((ty, collection)) = self.current_type(target) else {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                format!("`{}` cannot follow a primitive value", seg.name),
            ));
        };
        if collection {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                "a key predicate is required before addressing members of a collection",
            ));
        }

        if let Some(property) = self.model.structural_property(ty, &seg.name) {
            if seg.args.is_some() {
                return Err(self.error(
                    ParseErrorKind::InvalidSegment,
                    seg,
                    format!("property `{}` does not take arguments", seg.name),
                ));
            }
            let type_ref = property.type_ref.clone();
            let structured = self
                .model
                .resolve(&type_ref.type_name)
                .filter(|t| t.is_structured())
                .map(|t| t.fully_qualified_name());
            self.set_subject(structured, type_ref.collection);
            self.push(
                PathSegment::Property {
                    name: property.name.clone(),
                    type_ref: type_ref.clone(),
                    nullable: property.nullable,
                },
                Target::Property {
                    name: property.name.clone(),
                    type_ref,
                },
            );
            return Ok(());
        }

        if let Some(nav) = self.model.navigation_property(ty, &seg.name) {
            let target_type = nav.target.type_name.clone();
            let next = if nav.target.collection {
                Target::EntityCollection {
                    entity_type: target_type.clone(),
                }
            } else {
                Target::Entity {
                    entity_type: target_type.clone(),
                }
            };
            self.resolved.entity_set = self
                .model
                .entity_set_for_type(&target_type)
                .map(|s| s.name.clone());
            self.push(
                PathSegment::Navigation {
                    name: nav.name.clone(),
                    target: nav.target.clone(),
                },
                next,
            );
            self.set_subject(Some(target_type.clone()), nav.target.collection);
            if let Some(args) = &seg.args {
                if !nav.target.collection {
                    return Err(self.error(
                        ParseErrorKind::InvalidSegment,
                        seg,
                        format!("`{}` is single-valued and takes no key", seg.name),
                    ));
                }
                self.key(seg, &target_type, args)?;
            }
            return Ok(());
        }

        Err(self.error(
            ParseErrorKind::UnknownProperty,
            seg,
            format!(
                "`{}` has no property `{}`",
                ty.fully_qualified_name(),
                seg.name
            ),
        ))
    }

    /// Apply a key predicate to the current entity collection.
    fn key(&mut self, seg: &RawSegment, entity_type: &str, args: &str) -> Result<()> {
        let ty = self.model.resolve(entity_type).ok_or_else(|| {
            self.error(
                ParseErrorKind::UnknownSegment,
                seg,
                format!("unknown entity type `{entity_type}`"),
            )
        })?;
        let key_props = self.model.key_properties(ty);
        let supplied = parse_arguments(args).ok_or_else(|| {
            self.error(ParseErrorKind::Syntax, seg, "malformed key predicate")
        })?;
        if supplied.is_empty() {
            return Err(self.error(ParseErrorKind::KeyMismatch, seg, "empty key predicate"));
        }

        let mismatch = |message: String| self.error(ParseErrorKind::KeyMismatch, seg, message);
        let mut values = Vec::with_capacity(key_props.len());
        let unnamed = supplied.iter().all(|(name, _)| name.is_none());
        if unnamed {
            if supplied.len() != 1 || key_props.len() != 1 {
                return Err(mismatch(format!(
                    "`{entity_type}` has {} key propert{}; name each key value",
                    key_props.len(),
                    if key_props.len() == 1 { "y" } else { "ies" }
                )));
            }
            let (_, value) = supplied.into_iter().next().ok_or_else(|| {
                mismatch("empty key predicate".to_string())
            })?;
            values.push(KeyValue {
                name: key_props[0].name.clone(),
                value,
            });
        } else {
            if supplied.iter().any(|(name, _)| name.is_none()) {
                return Err(mismatch("mix of named and unnamed key values".to_string()));
            }
            if supplied.len() != key_props.len() {
                return Err(mismatch(format!(
                    "expected {} key value(s), got {}",
                    key_props.len(),
                    supplied.len()
                )));
            }
            for prop in &key_props {
                let value = supplied
                    .iter()
                    .find(|(name, _)| name.as_deref() == Some(prop.name.as_str()))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| mismatch(format!("missing key property `{}`", prop.name)))?;
                values.push(KeyValue {
                    name: prop.name.clone(),
                    value,
                });
            }
        }

        for kv in &values {
            let expected = key_props
                .iter()
                .find(|p| p.name == kv.name)
                .and_then(|p| p.type_ref.as_primitive());
            if let Some(expected) = expected {
                if !kv.value.fits(expected) {
                    return Err(self.error(
                        ParseErrorKind::TypeMismatch,
                        seg,
                        format!("key `{}` must be a {expected} value", kv.name),
                    ));
                }
            }
        }

        self.push(
            PathSegment::Key { values },
            Target::Entity {
                entity_type: entity_type.to_string(),
            },
        );
        self.set_subject(Some(entity_type.to_string()), false);
        Ok(())
    }

    fn operation_parameters(
        &self,
        seg: &RawSegment,
        op: &OperationDescriptor,
    ) -> Result<Vec<KeyValue>> {
        let args = seg.args.as_deref().unwrap_or("");
        if op.kind == OperationKind::Action {
            if !args.trim().is_empty() {
                return Err(self.error(
                    ParseErrorKind::InvalidSegment,
                    seg,
                    "action parameters are passed in the request body",
                ));
            }
            return Ok(Vec::new());
        }

        let supplied = parse_arguments(args)
            .ok_or_else(|| self.error(ParseErrorKind::Syntax, seg, "malformed parameter list"))?;
        let mut out = Vec::new();
        for (name, value) in supplied {
            let Some(name) = name else {
                return Err(self.error(
                    ParseErrorKind::Syntax,
                    seg,
                    "function parameters must be named",
                ));
            };
            let Some(param) = op.call_parameters().iter().find(|p| p.name == name) else {
                return Err(self.error(
                    ParseErrorKind::UnknownProperty,
                    seg,
                    format!("`{}` has no parameter `{name}`", op.fully_qualified_name()),
                ));
            };
            if out.iter().any(|kv: &KeyValue| kv.name == name) {
                return Err(self.error(
                    ParseErrorKind::Syntax,
                    seg,
                    format!("parameter `{name}` given twice"),
                ));
            }
            let ok = match (&value, param.type_ref.as_primitive()) {
                (Literal::Null, _) => param.nullable,
                (v, Some(p)) if !param.type_ref.collection => v.fits(p),
                _ => false,
            };
            if !ok {
                return Err(self.error(
                    ParseErrorKind::TypeMismatch,
                    seg,
                    format!("parameter `{name}` expects {}", param.type_ref),
                ));
            }
            out.push(KeyValue { name, value });
        }
        for param in op.call_parameters() {
            if !param.nullable && !out.iter().any(|kv| kv.name == param.name) {
                return Err(self.error(
                    ParseErrorKind::KeyMismatch,
                    seg,
                    format!("missing parameter `{}`", param.name),
                ));
            }
        }
        Ok(out)
    }

    fn operation_result(
        &mut self,
        seg: &RawSegment,
        segment: PathSegment,
        op: &OperationDescriptor,
        entity_set: Option<String>,
    ) -> Result<()> {
        if op.kind == OperationKind::Action {
            self.push(
                segment,
                Target::Action {
                    operation: op.fully_qualified_name(),
                    is_bound: op.is_bound,
                    return_type: op.return_type.clone(),
                },
            );
            self.set_subject(None, false);
            return Ok(());
        }

        let Some(ret) = op.return_type.clone() else {
            return Err(self.error(
                ParseErrorKind::InvalidSegment,
                seg,
                "function without a return type",
            ));
        };
        let ret_ty = self.model.resolve(&ret.type_name);
        let next = match ret_ty {
            Some(t) if t.is_entity() => {
                self.resolved.entity_set = entity_set.or_else(|| {
                    self.model
                        .entity_set_for_type(&ret.type_name)
                        .map(|s| s.name.clone())
                });
                self.set_subject(Some(ret.type_name.clone()), ret.collection);
                if ret.collection {
                    Target::EntityCollection {
                        entity_type: ret.type_name.clone(),
                    }
                } else {
                    Target::Entity {
                        entity_type: ret.type_name.clone(),
                    }
                }
            }
            Some(t) => {
                let subject = t.is_structured().then(|| t.fully_qualified_name());
                self.set_subject(subject, ret.collection);
                Target::Property {
                    name: op.name.clone(),
                    type_ref: ret,
                }
            }
            None => {
                return Err(self.error(
                    ParseErrorKind::UnknownSegment,
                    seg,
                    format!("unknown return type `{}`", ret.type_name),
                ))
            }
        };
        self.push(segment, next);
        Ok(())
    }
}

// ============================================================================
// Argument lists: `1`, `id=1,line=2`, `n=5`
// ============================================================================

type Argument = (Option<String>, Literal);

fn parse_arguments(text: &str) -> Option<Vec<Argument>> {
    all_consuming(delimited(multispace0, argument_list, multispace0))(text)
        .ok()
        .map(|(_, args)| args)
}

fn argument_list(input: &str) -> IResult<&str, Vec<Argument>> {
    let sep = delimited(multispace0, pchar(','), multispace0);
    if input.trim().is_empty() {
        return separated_list0(sep, argument)(input);
    }
    separated_list1(sep, argument)(input)
}

fn argument(input: &str) -> IResult<&str, Argument> {
    alt((
        map(
            separated_pair(
                name,
                delimited(multispace0, pchar('='), multispace0),
                literal,
            ),
            |(n, v)| (Some(n.to_string()), v),
        ),
        map(literal, |v| (None, v)),
    ))(input)
}

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(input)
}
