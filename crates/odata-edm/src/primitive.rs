//! The `Edm` primitive type catalogue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace that owns every primitive type.
pub const EDM_NAMESPACE: &str = "Edm";

/// Coarse classification of a type in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaType {
    Primitive,
    Complex,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Binary,
    Boolean,
    Byte,
    Date,
    DateTimeOffset,
    Decimal,
    Double,
    Duration,
    Guid,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    Stream,
    String,
    TimeOfDay,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown primitive type `{0}`")]
pub struct UnknownPrimitiveType(pub String);

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 17] = [
        PrimitiveType::Binary,
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::Date,
        PrimitiveType::DateTimeOffset,
        PrimitiveType::Decimal,
        PrimitiveType::Double,
        PrimitiveType::Duration,
        PrimitiveType::Guid,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::SByte,
        PrimitiveType::Single,
        PrimitiveType::Stream,
        PrimitiveType::String,
        PrimitiveType::TimeOfDay,
    ];

    /// Look up a primitive type by its simple name (`"String"`) or its
    /// fully-qualified name (`"Edm.String"`).
    pub fn for_name(name: &str) -> Result<Self, UnknownPrimitiveType> {
        let simple = name
            .strip_prefix(EDM_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name() == simple)
            .ok_or_else(|| UnknownPrimitiveType(name.to_string()))
    }

    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveType::Binary => "Binary",
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Byte => "Byte",
            PrimitiveType::Date => "Date",
            PrimitiveType::DateTimeOffset => "DateTimeOffset",
            PrimitiveType::Decimal => "Decimal",
            PrimitiveType::Double => "Double",
            PrimitiveType::Duration => "Duration",
            PrimitiveType::Guid => "Guid",
            PrimitiveType::Int16 => "Int16",
            PrimitiveType::Int32 => "Int32",
            PrimitiveType::Int64 => "Int64",
            PrimitiveType::SByte => "SByte",
            PrimitiveType::Single => "Single",
            PrimitiveType::Stream => "Stream",
            PrimitiveType::String => "String",
            PrimitiveType::TimeOfDay => "TimeOfDay",
        }
    }

    pub const fn namespace(self) -> &'static str {
        EDM_NAMESPACE
    }

    pub fn fully_qualified_name(self) -> String {
        format!("{EDM_NAMESPACE}.{}", self.name())
    }

    pub const fn meta_type(self) -> MetaType {
        MetaType::Primitive
    }

    pub const fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }

    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveType::Byte
                | PrimitiveType::SByte
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64
        )
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            PrimitiveType::Date
                | PrimitiveType::DateTimeOffset
                | PrimitiveType::TimeOfDay
                | PrimitiveType::Duration
        )
    }

    /// Promotion rank used when two numeric operands meet in an arithmetic
    /// or comparison node. `None` for non-numeric types.
    pub const fn numeric_rank(self) -> Option<u8> {
        match self {
            PrimitiveType::Byte | PrimitiveType::SByte => Some(1),
            PrimitiveType::Int16 => Some(2),
            PrimitiveType::Int32 => Some(3),
            PrimitiveType::Int64 => Some(4),
            PrimitiveType::Single => Some(5),
            PrimitiveType::Double => Some(6),
            PrimitiveType::Decimal => Some(7),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{EDM_NAMESPACE}.{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_name_accepts_simple_and_qualified_names() {
        assert_eq!(PrimitiveType::for_name("String"), Ok(PrimitiveType::String));
        assert_eq!(PrimitiveType::for_name("Edm.Int64"), Ok(PrimitiveType::Int64));
    }

    #[test]
    fn for_name_rejects_unknown_names() {
        assert!(PrimitiveType::for_name("Primitive").is_err());
        assert!(PrimitiveType::for_name("Edm.").is_err());
    }

    #[test]
    fn naming_and_meta_type() {
        assert_eq!(PrimitiveType::Int32.meta_type(), MetaType::Primitive);
        assert_eq!(PrimitiveType::Decimal.name(), "Decimal");
        assert_eq!(PrimitiveType::Double.namespace(), "Edm");
        assert_eq!(PrimitiveType::Boolean.fully_qualified_name(), "Edm.Boolean");
    }

    #[test]
    fn numeric_rank_orders_promotions() {
        assert!(PrimitiveType::Int32.numeric_rank() < PrimitiveType::Int64.numeric_rank());
        assert!(PrimitiveType::Double.numeric_rank() < PrimitiveType::Decimal.numeric_rank());
        assert_eq!(PrimitiveType::String.numeric_rank(), None);
    }
}
