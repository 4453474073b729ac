//! Typed expression trees for `$filter` and `$orderby`.

use odata_edm::{EntityDataModel, PrimitiveType, TypeRef};
use serde::Serialize;

use crate::literal::Literal;

/// Static type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprType {
    /// The `null` literal; compatible with every operand type.
    Null,
    Primitive { primitive: PrimitiveType },
    PrimitiveCollection { primitive: PrimitiveType },
    Structured { type_name: String, collection: bool },
}

impl ExprType {
    pub fn primitive(p: PrimitiveType) -> Self {
        ExprType::Primitive { primitive: p }
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveType::Boolean)
    }

    pub fn from_type_ref(model: &EntityDataModel, type_ref: &TypeRef) -> Option<Self> {
        let ty = model.resolve(&type_ref.type_name)?;
        Some(match (ty.primitive_type(), type_ref.collection) {
            (Some(p), false) => ExprType::Primitive { primitive: p },
            (Some(p), true) => ExprType::PrimitiveCollection { primitive: p },
            (None, collection) => ExprType::Structured {
                type_name: ty.fully_qualified_name(),
                collection,
            },
        })
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            ExprType::Primitive { primitive } => Some(*primitive),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ExprType::Null)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ExprType::PrimitiveCollection { .. } | ExprType::Structured { collection: true, .. }
        )
    }

    /// Element type of a collection; `None` for single values.
    pub fn element(&self) -> Option<ExprType> {
        match self {
            ExprType::PrimitiveCollection { primitive } => Some(Self::primitive(*primitive)),
            ExprType::Structured {
                type_name,
                collection: true,
            } => Some(ExprType::Structured {
                type_name: type_name.clone(),
                collection: false,
            }),
            _ => None,
        }
    }

    /// True for `null` or the given primitive.
    pub fn is_or_null(&self, p: PrimitiveType) -> bool {
        self.is_null() || self.as_primitive() == Some(p)
    }
}

impl std::fmt::Display for ExprType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprType::Null => f.write_str("null"),
            ExprType::Primitive { primitive } => write!(f, "{primitive}"),
            ExprType::PrimitiveCollection { primitive } => write!(f, "Collection({primitive})"),
            ExprType::Structured {
                type_name,
                collection: false,
            } => f.write_str(type_name),
            ExprType::Structured {
                type_name,
                collection: true,
            } => write!(f, "Collection({type_name})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        }
    }

    pub(crate) const COMPARISON: [BinaryOp; 6] = [
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
    ];
    pub(crate) const ADDITIVE: [BinaryOp; 2] = [BinaryOp::Add, BinaryOp::Sub];
    pub(crate) const MULTIPLICATIVE: [BinaryOp; 3] = [BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaKind {
    Any,
    All,
}

/// Built-in functions callable from `$filter` / `$orderby`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Round,
    Floor,
    Ceiling,
    Now,
}

impl Function {
    pub const ALL: [Function; 20] = [
        Function::Contains,
        Function::StartsWith,
        Function::EndsWith,
        Function::Length,
        Function::IndexOf,
        Function::Substring,
        Function::ToLower,
        Function::ToUpper,
        Function::Trim,
        Function::Concat,
        Function::Year,
        Function::Month,
        Function::Day,
        Function::Hour,
        Function::Minute,
        Function::Second,
        Function::Round,
        Function::Floor,
        Function::Ceiling,
        Function::Now,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "startswith",
            Function::EndsWith => "endswith",
            Function::Length => "length",
            Function::IndexOf => "indexof",
            Function::Substring => "substring",
            Function::ToLower => "tolower",
            Function::ToUpper => "toupper",
            Function::Trim => "trim",
            Function::Concat => "concat",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
            Function::Hour => "hour",
            Function::Minute => "minute",
            Function::Second => "second",
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceiling => "ceiling",
            Function::Now => "now",
        }
    }

    pub fn for_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Result type for the given argument types, or a message describing
    /// the mismatch.
    pub fn check(self, args: &[ExprType]) -> Result<ExprType, String> {
        use PrimitiveType as P;
        let is_string = |t: &ExprType| t.is_or_null(P::String);
        let is_integral = |t: &ExprType| {
            t.is_null() || t.as_primitive().map(P::is_integral).unwrap_or(false)
        };
        let is_date = |t: &ExprType| t.is_or_null(P::Date) || t.is_or_null(P::DateTimeOffset);
        let is_time = |t: &ExprType| t.is_or_null(P::TimeOfDay) || t.is_or_null(P::DateTimeOffset);

        let (ok, result) = match (self, args) {
            (Function::Contains | Function::StartsWith | Function::EndsWith, [a, b]) => {
                (is_string(a) && is_string(b), ExprType::boolean())
            }
            (Function::Length, [a]) => (is_string(a), ExprType::primitive(P::Int32)),
            (Function::IndexOf, [a, b]) => {
                (is_string(a) && is_string(b), ExprType::primitive(P::Int32))
            }
            (Function::Substring, [a, b]) => {
                (is_string(a) && is_integral(b), ExprType::primitive(P::String))
            }
            (Function::Substring, [a, b, c]) => (
                is_string(a) && is_integral(b) && is_integral(c),
                ExprType::primitive(P::String),
            ),
            (Function::ToLower | Function::ToUpper | Function::Trim, [a]) => {
                (is_string(a), ExprType::primitive(P::String))
            }
            (Function::Concat, [a, b]) => {
                (is_string(a) && is_string(b), ExprType::primitive(P::String))
            }
            (Function::Year | Function::Month | Function::Day, [a]) => {
                (is_date(a), ExprType::primitive(P::Int32))
            }
            (Function::Hour | Function::Minute | Function::Second, [a]) => {
                (is_time(a), ExprType::primitive(P::Int32))
            }
            (Function::Round | Function::Floor | Function::Ceiling, [a]) => match a {
                ExprType::Null => (true, ExprType::primitive(P::Double)),
                other => (
                    other.as_primitive().map(P::is_numeric).unwrap_or(false),
                    other.clone(),
                ),
            },
            (Function::Now, []) => (true, ExprType::primitive(P::DateTimeOffset)),
            _ => {
                return Err(format!(
                    "{}() does not take {} argument(s)",
                    self.name(),
                    args.len()
                ))
            }
        };
        if ok {
            Ok(result)
        } else {
            let shown: Vec<String> = args.iter().map(ToString::to_string).collect();
            Err(format!(
                "{}() cannot be applied to ({})",
                self.name(),
                shown.join(", ")
            ))
        }
    }
}

/// An expression node together with its static type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub node: ExprNode,
    #[serde(rename = "type")]
    pub ty: ExprType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ExprNode {
    Literal {
        value: Literal,
    },
    /// Member path starting at the current instance (`$it`) or, inside a
    /// lambda, at a range variable.
    Member {
        variable: Option<String>,
        path: Vec<String>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    Lambda {
        kind: LambdaKind,
        source: Box<Expr>,
        variable: Option<String>,
        predicate: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn new(node: ExprNode, ty: ExprType) -> Self {
        Self { node, ty }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

/// Type of `left op right`, or a message describing the mismatch.
pub fn binary_result(op: BinaryOp, left: &ExprType, right: &ExprType) -> Result<ExprType, String> {
    use PrimitiveType as P;
    let mismatch = || {
        format!(
            "operator `{}` cannot be applied to {left} and {right}",
            op.keyword()
        )
    };
    if left.is_collection() || right.is_collection() {
        return Err(mismatch());
    }

    match op {
        BinaryOp::And | BinaryOp::Or => {
            if left.is_or_null(P::Boolean) && right.is_or_null(P::Boolean) {
                Ok(ExprType::boolean())
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let ok = match (left, right) {
                (ExprType::Null, _) | (_, ExprType::Null) => true,
                (ExprType::Primitive { primitive: a }, ExprType::Primitive { primitive: b }) => {
                    same_category(*a, *b)
                }
                _ => false,
            };
            if ok {
                Ok(ExprType::boolean())
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ok = match (left, right) {
                (ExprType::Null, ExprType::Primitive { primitive: p })
                | (ExprType::Primitive { primitive: p }, ExprType::Null) => is_ordered(*p),
                (ExprType::Primitive { primitive: a }, ExprType::Primitive { primitive: b }) => {
                    is_ordered(*a) && same_category(*a, *b)
                }
                _ => false,
            };
            if ok {
                Ok(ExprType::boolean())
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic_result(op, left, right).ok_or_else(mismatch)
        }
    }
}

fn arithmetic_result(op: BinaryOp, left: &ExprType, right: &ExprType) -> Option<ExprType> {
    use PrimitiveType as P;
    let additive = matches!(op, BinaryOp::Add | BinaryOp::Sub);
    match (left, right) {
        (ExprType::Null, ExprType::Null) => Some(ExprType::Null),
        (ExprType::Null, ExprType::Primitive { primitive: p })
        | (ExprType::Primitive { primitive: p }, ExprType::Null) => {
            (p.is_numeric() || (additive && p.is_temporal())).then(|| ExprType::primitive(*p))
        }
        (ExprType::Primitive { primitive: a }, ExprType::Primitive { primitive: b }) => {
            if let (Some(ra), Some(rb)) = (a.numeric_rank(), b.numeric_rank()) {
                let wider = if ra >= rb { *a } else { *b };
                return Some(ExprType::primitive(wider));
            }
            if !additive {
                return None;
            }
            match (a, b, op) {
                (P::DateTimeOffset | P::Date, P::Duration, _) => Some(ExprType::primitive(*a)),
                (P::Duration, P::Duration, _) => Some(ExprType::primitive(P::Duration)),
                (P::DateTimeOffset, P::DateTimeOffset, BinaryOp::Sub) => {
                    Some(ExprType::primitive(P::Duration))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Category {
    Numeric,
    Exact(PrimitiveType),
}

fn category(p: PrimitiveType) -> Category {
    if p.is_numeric() {
        Category::Numeric
    } else {
        Category::Exact(p)
    }
}

fn same_category(a: PrimitiveType, b: PrimitiveType) -> bool {
    category(a) == category(b)
}

fn is_ordered(p: PrimitiveType) -> bool {
    p.is_numeric()
        || p.is_temporal()
        || matches!(p, PrimitiveType::String | PrimitiveType::Guid)
}
