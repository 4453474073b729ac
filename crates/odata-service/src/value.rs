//! Values exchanged with the query processor.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use odata_edm::PrimitiveType;
use odata_uri::Literal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ODataValue {
    Null,
    Boolean(bool),
    /// Byte, SByte, Int16, Int32 and Int64.
    Int(i64),
    /// Single and Double.
    Double(f64),
    /// Decimal digits as text.
    Decimal(String),
    String(String),
    Binary(Vec<u8>),
    Guid(Uuid),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    /// ISO 8601 duration, e.g. `P1DT2H`.
    Duration(String),
    /// An entity or complex value.
    Structured(StructuredValue),
    Collection(Vec<ODataValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: ODataValue,
}

/// Properties of one entity or complex value, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredValue {
    /// Fully-qualified type name.
    pub type_name: String,
    pub properties: Vec<Property>,
}

impl StructuredValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
        }
    }

    /// Builder-style [`StructuredValue::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ODataValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ODataValue>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.properties.push(Property { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ODataValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Overwrite properties with the ones in `patch`.
    pub fn merge(&mut self, patch: StructuredValue) {
        for Property { name, value } in patch.properties {
            self.set(name, value);
        }
    }
}

impl ODataValue {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            ODataValue::Null => "null".to_string(),
            ODataValue::Boolean(_) => "a boolean".to_string(),
            ODataValue::Int(_) => "an integer".to_string(),
            ODataValue::Double(_) => "a floating-point number".to_string(),
            ODataValue::Decimal(_) => "a decimal".to_string(),
            ODataValue::String(_) => "a string".to_string(),
            ODataValue::Binary(_) => "binary data".to_string(),
            ODataValue::Guid(_) => "a guid".to_string(),
            ODataValue::Date(_) => "a date".to_string(),
            ODataValue::DateTimeOffset(_) => "a date-time".to_string(),
            ODataValue::TimeOfDay(_) => "a time of day".to_string(),
            ODataValue::Duration(_) => "a duration".to_string(),
            ODataValue::Structured(s) => format!("a `{}` value", s.type_name),
            ODataValue::Collection(_) => "a collection".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ODataValue::Null)
    }

    pub fn as_structured(&self) -> Option<&StructuredValue> {
        match self {
            ODataValue::Structured(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ODataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ODataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether a primitive value can stand for `ty`.
    pub fn matches_primitive(&self, ty: PrimitiveType) -> bool {
        use PrimitiveType as P;
        match self {
            ODataValue::Boolean(_) => ty == P::Boolean,
            ODataValue::Int(v) => match ty {
                P::Byte => (0..=255).contains(v),
                P::SByte => (-128..=127).contains(v),
                P::Int16 => i16::try_from(*v).is_ok(),
                P::Int32 => i32::try_from(*v).is_ok(),
                P::Int64 | P::Decimal | P::Double | P::Single => true,
                _ => false,
            },
            ODataValue::Double(_) => matches!(ty, P::Double | P::Single),
            ODataValue::Decimal(_) => ty == P::Decimal,
            ODataValue::String(_) => ty == P::String,
            ODataValue::Binary(_) => matches!(ty, P::Binary | P::Stream),
            ODataValue::Guid(_) => ty == P::Guid,
            ODataValue::Date(_) => ty == P::Date,
            ODataValue::DateTimeOffset(_) => ty == P::DateTimeOffset,
            ODataValue::TimeOfDay(_) => ty == P::TimeOfDay,
            ODataValue::Duration(_) => ty == P::Duration,
            ODataValue::Null | ODataValue::Structured(_) | ODataValue::Collection(_) => false,
        }
    }

    /// Lexical form used by Atom, raw `$value` responses and key predicates.
    /// `None` for null, structured and collection values.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            ODataValue::Boolean(b) => b.to_string(),
            ODataValue::Int(v) => v.to_string(),
            ODataValue::Double(v) => format_double(*v),
            ODataValue::Decimal(d) => d.clone(),
            ODataValue::String(s) => s.clone(),
            ODataValue::Binary(bytes) => BASE64.encode(bytes),
            ODataValue::Guid(g) => g.hyphenated().to_string(),
            ODataValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            ODataValue::DateTimeOffset(dt) => dt.to_rfc3339(),
            ODataValue::TimeOfDay(t) => t.format("%H:%M:%S%.f").to_string(),
            ODataValue::Duration(d) => d.clone(),
            ODataValue::Null | ODataValue::Structured(_) | ODataValue::Collection(_) => {
                return None
            }
        })
    }

    /// Parse the lexical form of a primitive of type `ty`.
    pub fn parse_text(ty: PrimitiveType, text: &str) -> Option<Self> {
        use PrimitiveType as P;
        let text = text.trim();
        Some(match ty {
            P::Boolean => match text {
                "true" => ODataValue::Boolean(true),
                "false" => ODataValue::Boolean(false),
                _ => return None,
            },
            P::Byte | P::SByte | P::Int16 | P::Int32 | P::Int64 => {
                let v = ODataValue::Int(text.parse::<i64>().ok()?);
                return v.matches_primitive(ty).then_some(v);
            }
            P::Double | P::Single => ODataValue::Double(parse_double(text)?),
            P::Decimal => {
                let digits = text.strip_prefix('-').unwrap_or(text);
                let valid = !digits.is_empty()
                    && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
                    && digits.matches('.').count() <= 1
                    && digits != ".";
                if !valid {
                    return None;
                }
                ODataValue::Decimal(text.to_string())
            }
            P::String => ODataValue::String(text.to_string()),
            P::Binary | P::Stream => ODataValue::Binary(BASE64.decode(text).ok()?),
            P::Guid => ODataValue::Guid(Uuid::parse_str(text).ok()?),
            P::Date => ODataValue::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?),
            P::DateTimeOffset => ODataValue::DateTimeOffset(DateTime::parse_from_rfc3339(text).ok()?),
            P::TimeOfDay => ODataValue::TimeOfDay(NaiveTime::parse_from_str(text, "%H:%M:%S%.f").ok()?),
            P::Duration => {
                let body = text.strip_prefix('-').unwrap_or(text);
                if !body.starts_with('P') || body.len() < 2 {
                    return None;
                }
                ODataValue::Duration(text.to_string())
            }
        })
    }

    /// Convert a URI literal (key value, function parameter).
    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Null => ODataValue::Null,
            Literal::Boolean(b) => ODataValue::Boolean(*b),
            Literal::Int32(v) => ODataValue::Int(i64::from(*v)),
            Literal::Int64(v) => ODataValue::Int(*v),
            Literal::Decimal(d) => ODataValue::Decimal(d.clone()),
            Literal::Double(v) => ODataValue::Double(*v),
            Literal::String(s) => ODataValue::String(s.clone()),
            Literal::Guid(g) => ODataValue::Guid(*g),
            Literal::Date(d) => ODataValue::Date(*d),
            Literal::DateTimeOffset(dt) => ODataValue::DateTimeOffset(*dt),
            Literal::Duration(d) => ODataValue::Duration(d.clone()),
        }
    }

    /// The value in URI key-predicate syntax, e.g. `42` or `'Smith'`.
    pub fn to_key_literal(&self) -> Option<String> {
        match self {
            ODataValue::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            ODataValue::Duration(d) => Some(format!("duration'{d}'")),
            other => other.to_text(),
        }
    }
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "INF".to_string()
    } else if v == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        v.to_string()
    }
}

fn parse_double(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        _ => text.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

impl From<bool> for ODataValue {
    fn from(v: bool) -> Self {
        ODataValue::Boolean(v)
    }
}

impl From<i32> for ODataValue {
    fn from(v: i32) -> Self {
        ODataValue::Int(i64::from(v))
    }
}

impl From<i64> for ODataValue {
    fn from(v: i64) -> Self {
        ODataValue::Int(v)
    }
}

impl From<f64> for ODataValue {
    fn from(v: f64) -> Self {
        ODataValue::Double(v)
    }
}

impl From<&str> for ODataValue {
    fn from(v: &str) -> Self {
        ODataValue::String(v.to_string())
    }
}

impl From<String> for ODataValue {
    fn from(v: String) -> Self {
        ODataValue::String(v)
    }
}

impl From<StructuredValue> for ODataValue {
    fn from(v: StructuredValue) -> Self {
        ODataValue::Structured(v)
    }
}

impl From<Vec<ODataValue>> for ODataValue {
    fn from(v: Vec<ODataValue>) -> Self {
        ODataValue::Collection(v)
    }
}

impl<T: Into<ODataValue>> From<Option<T>> for ODataValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ODataValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_forms() {
        use PrimitiveType as P;
        assert_eq!(ODataValue::parse_text(P::Int32, "42"), Some(ODataValue::Int(42)));
        assert_eq!(ODataValue::parse_text(P::Byte, "300"), None);
        assert_eq!(ODataValue::parse_text(P::Decimal, "-12.50"), Some(ODataValue::Decimal("-12.50".into())));
        assert_eq!(ODataValue::parse_text(P::Decimal, "1.2.3"), None);
        assert_eq!(ODataValue::parse_text(P::Boolean, "yes"), None);
        assert_eq!(ODataValue::parse_text(P::Duration, "P1DT2H"), Some(ODataValue::Duration("P1DT2H".into())));

        let bin = ODataValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        let text = bin.to_text().expect("binary text");
        assert_eq!(text, "3q2+7w==");
        assert_eq!(ODataValue::parse_text(P::Binary, &text), Some(bin));

        assert_eq!(ODataValue::Double(f64::INFINITY).to_text().as_deref(), Some("INF"));
        let date = ODataValue::parse_text(P::Date, "1990-04-01").expect("date");
        assert_eq!(date.to_text().as_deref(), Some("1990-04-01"));
    }

    #[test]
    fn structured_set_replaces_in_place() {
        let mut customer = StructuredValue::new("ODataDemo.Customer")
            .with("id", 1i64)
            .with("name", "Ann");
        customer.merge(StructuredValue::new("ODataDemo.Customer").with("name", "Bea").with("dateOfBirth", ODataValue::Null));
        let names: Vec<&str> = customer.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "dateOfBirth"]);
        assert_eq!(customer.get("name").and_then(ODataValue::as_str), Some("Bea"));
    }

    #[test]
    fn key_literals() {
        assert_eq!(ODataValue::from("O'Neil").to_key_literal().as_deref(), Some("'O''Neil'"));
        assert_eq!(ODataValue::Int(7).to_key_literal().as_deref(), Some("7"));
        assert_eq!(ODataValue::from_literal(&Literal::Int32(3)), ODataValue::Int(3));
    }
}
