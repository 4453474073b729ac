//! Primitive literals as they appear in key predicates, function parameters
//! and `$filter` expressions.

use chrono::{DateTime, FixedOffset, NaiveDate};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1, take_while_m_n};
use nom::character::complete::{char as pchar, digit1, one_of};
use nom::combinator::{all_consuming, opt, recognize};
use nom::error::{Error, ErrorKind};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use odata_edm::PrimitiveType;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    /// Kept as text; no arbitrary-precision arithmetic happens here.
    Decimal(String),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    /// ISO 8601 duration text, e.g. `P1DT2H`.
    Duration(String),
}

impl Literal {
    /// The primitive type of the literal; `None` for `null`.
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        Some(match self {
            Literal::Null => return None,
            Literal::Boolean(_) => PrimitiveType::Boolean,
            Literal::Int32(_) => PrimitiveType::Int32,
            Literal::Int64(_) => PrimitiveType::Int64,
            Literal::Decimal(_) => PrimitiveType::Decimal,
            Literal::Double(_) => PrimitiveType::Double,
            Literal::String(_) => PrimitiveType::String,
            Literal::Guid(_) => PrimitiveType::Guid,
            Literal::Date(_) => PrimitiveType::Date,
            Literal::DateTimeOffset(_) => PrimitiveType::DateTimeOffset,
            Literal::Duration(_) => PrimitiveType::Duration,
        })
    }

    /// Whether the literal can stand for a value of `target` without loss.
    pub fn fits(&self, target: PrimitiveType) -> bool {
        use PrimitiveType as P;
        let integral = match self {
            Literal::Int32(v) => Some(i64::from(*v)),
            Literal::Int64(v) => Some(*v),
            _ => None,
        };
        if let Some(v) = integral {
            return match target {
                P::Byte => (0..=255).contains(&v),
                P::SByte => (-128..=127).contains(&v),
                P::Int16 => i16::try_from(v).is_ok(),
                P::Int32 => i32::try_from(v).is_ok(),
                P::Int64 | P::Single | P::Double | P::Decimal => true,
                _ => false,
            };
        }
        match self {
            Literal::Decimal(_) | Literal::Double(_) => {
                matches!(target, P::Decimal | P::Double | P::Single)
            }
            other => other.primitive_type() == Some(target),
        }
    }

    /// The literal in URI surface syntax, e.g. `'O''Neil'` or `42`.
    pub fn to_uri_string(&self) -> String {
        match self {
            Literal::Null => "null".to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Int32(v) => v.to_string(),
            Literal::Int64(v) => v.to_string(),
            Literal::Decimal(text) => text.clone(),
            Literal::Double(v) => format!("{v:?}"),
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Guid(g) => g.hyphenated().to_string(),
            Literal::Date(d) => d.format("%Y-%m-%d").to_string(),
            Literal::DateTimeOffset(dt) => dt.to_rfc3339(),
            Literal::Duration(d) => format!("duration'{d}'"),
        }
    }
}

/// Parse a complete literal (surrounding whitespace allowed).
pub fn parse_literal(text: &str) -> Option<Literal> {
    all_consuming(literal)(text.trim()).ok().map(|(_, lit)| lit)
}

pub fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        keyword_literal,
        duration_literal,
        string_literal,
        guid_literal,
        date_time_offset_literal,
        date_literal,
        number_literal,
    ))(input)
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn reject<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(Error::new(input, kind)))
}

fn keyword_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, word) = recognize(pair(
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    ))(input)?;
    let lit = match word {
        "null" => Literal::Null,
        "true" => Literal::Boolean(true),
        "false" => Literal::Boolean(false),
        _ => return reject(input, ErrorKind::Tag),
    };
    Ok((rest, lit))
}

fn duration_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, body) = preceded(
        tag("duration"),
        delimited(pchar('\''), take_while1(|c: char| c != '\''), pchar('\'')),
    )(input)?;
    if !is_iso_duration(body) {
        return reject(input, ErrorKind::Verify);
    }
    Ok((rest, Literal::Duration(body.to_string())))
}

fn is_iso_duration(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    let Some(rest) = body.strip_prefix('P') else {
        return false;
    };
    !rest.is_empty()
        && rest.chars().any(|c| c.is_ascii_digit())
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, 'D' | 'T' | 'H' | 'M' | 'S' | '.'))
}

/// `'...'` with `''` standing for a single quote.
fn string_literal(input: &str) -> IResult<&str, Literal> {
    let (mut rest, _) = pchar('\'')(input)?;
    let mut out = String::new();
    loop {
        let Some(idx) = rest.find('\'') else {
            return reject(input, ErrorKind::Char);
        };
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match after.strip_prefix('\'') {
            Some(next) => {
                out.push('\'');
                rest = next;
            }
            None => return Ok((after, Literal::String(out))),
        }
    }
}

fn not_followed_by_word(rest: &str) -> bool {
    !rest.starts_with(|c: char| is_ident_continue(c) || c == '.' || c == '-')
}

fn guid_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = take_while_m_n(36, 36, |c: char| c.is_ascii_hexdigit() || c == '-')(input)?;
    if !not_followed_by_word(rest) {
        return reject(input, ErrorKind::Verify);
    }
    match Uuid::parse_str(text) {
        Ok(guid) => Ok((rest, Literal::Guid(guid))),
        Err(_) => reject(input, ErrorKind::Verify),
    }
}

fn date_time_offset_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = recognize(pair(
        date_text,
        preceded(
            pchar('T'),
            take_while1(|c: char| c.is_ascii_digit() || matches!(c, ':' | '.' | 'Z' | '+' | '-')),
        ),
    ))(input)?;
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) if not_followed_by_word(rest) => Ok((rest, Literal::DateTimeOffset(dt))),
        _ => reject(input, ErrorKind::Verify),
    }
}

fn digits<'a>(n: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    take_while_m_n(n, n, |c: char| c.is_ascii_digit())
}

fn date_text(input: &str) -> IResult<&str, &str> {
    recognize(tuple((digits(4), pchar('-'), digits(2), pchar('-'), digits(2))))(input)
}

fn date_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = date_text(input)?;
    if !not_followed_by_word(rest) {
        return reject(input, ErrorKind::Verify);
    }
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => Ok((rest, Literal::Date(date))),
        Err(_) => reject(input, ErrorKind::Verify),
    }
}

fn number_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = recognize(tuple((
        opt(pchar('-')),
        digit1,
        opt(pair(pchar('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    let (rest, suffix) = opt(one_of("mMdDfFlL"))(rest)?;
    if rest.starts_with(|c: char| is_ident_continue(c) || c == '.') {
        return reject(input, ErrorKind::Digit);
    }

    let fractional = text.contains(['.', 'e', 'E']);
    let lit = match suffix {
        Some('m' | 'M') => match text.parse::<f64>() {
            Ok(_) => Literal::Decimal(text.to_string()),
            Err(_) => return reject(input, ErrorKind::Float),
        },
        Some('d' | 'D' | 'f' | 'F') => match text.parse::<f64>() {
            Ok(v) => Literal::Double(v),
            Err(_) => return reject(input, ErrorKind::Float),
        },
        Some(_) => match text.parse::<i64>() {
            Ok(v) if !fractional => Literal::Int64(v),
            _ => return reject(input, ErrorKind::Digit),
        },
        None if fractional => match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Literal::Double(v),
            _ => return reject(input, ErrorKind::Float),
        },
        None => {
            if let Ok(v) = text.parse::<i32>() {
                Literal::Int32(v)
            } else if let Ok(v) = text.parse::<i64>() {
                Literal::Int64(v)
            } else {
                Literal::Decimal(text.to_string())
            }
        }
    };
    Ok((rest, lit))
}
