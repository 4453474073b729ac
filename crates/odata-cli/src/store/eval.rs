//! `$filter` and `$orderby` over in-memory entities.
//!
//! Expressions arrive fully typed, so evaluation only has to cope with
//! nulls and with numbers of mixed width. Comparisons involving null are
//! false, except `null eq null`.

use std::cmp::Ordering;

use chrono::{Datelike, Timelike, Utc};
use odata_service::{ODataValue, ProcessorError, StructuredValue};
use odata_uri::{BinaryOp, Expr, ExprNode, Function, LambdaKind, OrderByItem, UnaryOp};

static NULL: ODataValue = ODataValue::Null;

#[derive(Clone, Copy)]
struct Scope<'a> {
    it: &'a StructuredValue,
    vars: &'a [(&'a str, &'a ODataValue)],
}

pub fn matches(filter: &Expr, entity: &StructuredValue) -> Result<bool, ProcessorError> {
    let scope = Scope {
        it: entity,
        vars: &[],
    };
    Ok(truthy(&eval(filter, scope)?))
}

/// Stable sort by the `$orderby` keys. Nulls sort first.
pub fn sort(items: &mut Vec<StructuredValue>, order_by: &[OrderByItem]) -> Result<(), ProcessorError> {
    if order_by.is_empty() {
        return Ok(());
    }
    let mut keyed = std::mem::take(items)
        .into_iter()
        .map(|item| {
            let scope = Scope {
                it: &item,
                vars: &[],
            };
            let keys = order_by
                .iter()
                .map(|o| eval(&o.expr, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, ProcessorError>((keys, item))
        })
        .collect::<Result<Vec<_>, _>>()?;

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, item) in order_by.iter().enumerate() {
            let ord = order_nulls_first(&a[i], &b[i]);
            let ord = if item.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    items.extend(keyed.into_iter().map(|(_, item)| item));
    Ok(())
}

fn order_nulls_first(a: &ODataValue, b: &ODataValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(expr: &Expr, scope: Scope<'_>) -> Result<ODataValue, ProcessorError> {
    match &expr.node {
        ExprNode::Literal { value } => Ok(ODataValue::from_literal(value)),
        ExprNode::Member { variable, path } => member(scope, variable.as_deref(), path),
        ExprNode::Binary { op, left, right } => binary(*op, left, right, scope),
        ExprNode::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            Ok(match (op, value) {
                (_, ODataValue::Null) => ODataValue::Null,
                (UnaryOp::Not, v) => ODataValue::Boolean(!truthy(&v)),
                (UnaryOp::Negate, ODataValue::Int(v)) => ODataValue::Int(v.wrapping_neg()),
                (UnaryOp::Negate, ODataValue::Double(v)) => ODataValue::Double(-v),
                (UnaryOp::Negate, ODataValue::Decimal(d)) => ODataValue::Decimal(match d.strip_prefix('-') {
                    Some(abs) => abs.to_string(),
                    None => format!("-{d}"),
                }),
                (UnaryOp::Negate, other) => {
                    return Err(ProcessorError::bad_request(format!(
                        "cannot negate {}",
                        other.describe()
                    )))
                }
            })
        }
        ExprNode::Call { function, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &args)
        }
        ExprNode::Lambda {
            kind,
            source,
            variable,
            predicate,
        } => {
            let items = match eval(source, scope)? {
                ODataValue::Collection(items) => items,
                _ => Vec::new(),
            };
            let (Some(variable), Some(predicate)) = (variable, predicate) else {
                return Ok(ODataValue::Boolean(*kind == LambdaKind::Any && !items.is_empty()));
            };
            let mut results = Vec::with_capacity(items.len());
            for item in &items {
                let bound: Vec<(&str, &ODataValue)> = scope
                    .vars
                    .iter()
                    .copied()
                    .chain(std::iter::once((variable.as_str(), item)))
                    .collect();
                let inner = Scope {
                    it: scope.it,
                    vars: &bound,
                };
                results.push(truthy(&eval(predicate, inner)?));
            }
            Ok(ODataValue::Boolean(match kind {
                LambdaKind::Any => results.iter().any(|r| *r),
                LambdaKind::All => results.iter().all(|r| *r),
            }))
        }
    }
}

fn member(scope: Scope<'_>, variable: Option<&str>, path: &[String]) -> Result<ODataValue, ProcessorError> {
    let mut current: Option<&ODataValue> = match variable {
        Some(name) if name != "$it" => Some(
            scope
                .vars
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| ProcessorError::bad_request(format!("unknown variable `{name}`")))?,
        ),
        _ => None,
    };
    for name in path {
        let next = match current {
            None => scope.it.get(name),
            Some(ODataValue::Structured(s)) => s.get(name),
            Some(_) => None,
        };
        current = Some(next.unwrap_or(&NULL));
    }
    Ok(match current {
        Some(value) => value.clone(),
        None => ODataValue::Structured(scope.it.clone()),
    })
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, scope: Scope<'_>) -> Result<ODataValue, ProcessorError> {
    match op {
        BinaryOp::And => {
            let l = truthy(&eval(left, scope)?);
            Ok(ODataValue::Boolean(l && truthy(&eval(right, scope)?)))
        }
        BinaryOp::Or => {
            let l = truthy(&eval(left, scope)?);
            Ok(ODataValue::Boolean(l || truthy(&eval(right, scope)?)))
        }
        _ => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            Ok(match op {
                BinaryOp::Eq => ODataValue::Boolean(equals(&l, &r)),
                BinaryOp::Ne => ODataValue::Boolean(!equals(&l, &r)),
                BinaryOp::Lt => ODataValue::Boolean(compare(&l, &r) == Some(Ordering::Less)),
                BinaryOp::Le => ODataValue::Boolean(matches!(
                    compare(&l, &r),
                    Some(Ordering::Less | Ordering::Equal)
                )),
                BinaryOp::Gt => ODataValue::Boolean(compare(&l, &r) == Some(Ordering::Greater)),
                BinaryOp::Ge => ODataValue::Boolean(matches!(
                    compare(&l, &r),
                    Some(Ordering::Greater | Ordering::Equal)
                )),
                _ => arithmetic(op, &l, &r)?,
            })
        }
    }
}

fn arithmetic(op: BinaryOp, l: &ODataValue, r: &ODataValue) -> Result<ODataValue, ProcessorError> {
    if l.is_null() || r.is_null() {
        return Ok(ODataValue::Null);
    }
    if let (ODataValue::Int(a), ODataValue::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let out = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
            _ => None,
        };
        return out
            .map(ODataValue::Int)
            .ok_or_else(|| ProcessorError::bad_request(format!("{a} {} {b} is undefined", op.keyword())));
    }
    let (Some(a), Some(b)) = (number(l), number(r)) else {
        return Err(ProcessorError::bad_request(format!(
            "`{}` needs numbers, got {} and {}",
            op.keyword(),
            l.describe(),
            r.describe()
        )));
    };
    Ok(ODataValue::Double(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn call(function: Function, args: &[ODataValue]) -> Result<ODataValue, ProcessorError> {
    if function == Function::Now {
        return Ok(ODataValue::DateTimeOffset(Utc::now().fixed_offset()));
    }
    if args.iter().any(ODataValue::is_null) {
        return Ok(ODataValue::Null);
    }
    let text = |i: usize| args.get(i).and_then(ODataValue::as_str).unwrap_or_default();
    let int = |i: usize| args.get(i).and_then(ODataValue::as_i64);
    let arg = args.first().unwrap_or(&NULL);

    Ok(match function {
        Function::Contains => ODataValue::Boolean(text(0).contains(text(1))),
        Function::StartsWith => ODataValue::Boolean(text(0).starts_with(text(1))),
        Function::EndsWith => ODataValue::Boolean(text(0).ends_with(text(1))),
        Function::Length => ODataValue::Int(text(0).chars().count() as i64),
        Function::IndexOf => ODataValue::Int(
            text(0)
                .find(text(1))
                .map_or(-1, |pos| text(0)[..pos].chars().count() as i64),
        ),
        Function::Substring => {
            let start = usize::try_from(int(1).unwrap_or_default()).unwrap_or_default();
            let chars = text(0).chars().skip(start);
            ODataValue::String(match int(2) {
                Some(len) => chars.take(usize::try_from(len).unwrap_or_default()).collect(),
                None => chars.collect(),
            })
        }
        Function::ToLower => ODataValue::String(text(0).to_lowercase()),
        Function::ToUpper => ODataValue::String(text(0).to_uppercase()),
        Function::Trim => ODataValue::String(text(0).trim().to_string()),
        Function::Concat => ODataValue::String(format!("{}{}", text(0), text(1))),
        Function::Year | Function::Month | Function::Day => {
            let date = match arg {
                ODataValue::Date(d) => *d,
                ODataValue::DateTimeOffset(dt) => dt.date_naive(),
                other => return Err(not_a(function, "date", other)),
            };
            ODataValue::Int(i64::from(match function {
                Function::Year => date.year(),
                Function::Month => date.month() as i32,
                _ => date.day() as i32,
            }))
        }
        Function::Hour | Function::Minute | Function::Second => {
            let time = match arg {
                ODataValue::TimeOfDay(t) => *t,
                ODataValue::DateTimeOffset(dt) => dt.time(),
                other => return Err(not_a(function, "time", other)),
            };
            ODataValue::Int(i64::from(match function {
                Function::Hour => time.hour(),
                Function::Minute => time.minute(),
                _ => time.second(),
            }))
        }
        Function::Round | Function::Floor | Function::Ceiling => match arg {
            ODataValue::Int(v) => ODataValue::Int(*v),
            other => {
                let v = number(other).ok_or_else(|| not_a(function, "number", other))?;
                ODataValue::Double(match function {
                    Function::Round => v.round(),
                    Function::Floor => v.floor(),
                    _ => v.ceil(),
                })
            }
        },
        Function::Now => ODataValue::Null,
    })
}

fn not_a(function: Function, expected: &str, got: &ODataValue) -> ProcessorError {
    ProcessorError::bad_request(format!(
        "{function:?} expects a {expected}, got {}",
        got.describe()
    ))
}

// ============================================================================
// Comparison
// ============================================================================

fn truthy(value: &ODataValue) -> bool {
    matches!(value, ODataValue::Boolean(true))
}

fn number(value: &ODataValue) -> Option<f64> {
    match value {
        ODataValue::Int(v) => Some(*v as f64),
        ODataValue::Double(v) => Some(*v),
        ODataValue::Decimal(d) => d.parse().ok(),
        _ => None,
    }
}

pub fn equals(a: &ODataValue, b: &ODataValue) -> bool {
    match (a, b) {
        (ODataValue::Null, ODataValue::Null) => true,
        (ODataValue::Null, _) | (_, ODataValue::Null) => false,
        _ => compare(a, b) == Some(Ordering::Equal) || a == b,
    }
}

pub fn compare(a: &ODataValue, b: &ODataValue) -> Option<Ordering> {
    use ODataValue as V;
    match (a, b) {
        (V::Int(x), V::Int(y)) => Some(x.cmp(y)),
        (V::Boolean(x), V::Boolean(y)) => Some(x.cmp(y)),
        (V::String(x), V::String(y)) => Some(x.cmp(y)),
        (V::Guid(x), V::Guid(y)) => Some(x.cmp(y)),
        (V::Date(x), V::Date(y)) => Some(x.cmp(y)),
        (V::DateTimeOffset(x), V::DateTimeOffset(y)) => Some(x.cmp(y)),
        (V::TimeOfDay(x), V::TimeOfDay(y)) => Some(x.cmp(y)),
        (V::Duration(x), V::Duration(y)) => Some(x.cmp(y)),
        _ => number(a)?.partial_cmp(&number(b)?),
    }
}
