//! Recursive-descent parser for `$filter` and `$orderby` expressions.
//!
//! Precedence, loosest first:
//!
//! ```text
//! or  <  and  <  eq ne lt le gt ge  <  add sub  <  mul div mod  <  not -  <  primary
//! ```
//!
//! Every node is typed while it is built, so an ill-typed comparison fails
//! right where it is written instead of after the whole tree exists. Syntax
//! problems are ordinary nom errors (so alternatives can backtrack); semantic
//! problems and anything after a committed token are `nom::Err::Failure`.

use std::cell::Cell;

use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{multispace0, multispace1};
use nom::combinator::{cut, recognize};
use nom::error::{ErrorKind, ParseError as NomParseError};
use nom::sequence::pair;
use nom::IResult;
use odata_edm::{EntityDataModel, PrimitiveType, TypeDescriptor};

use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{
    binary_result, BinaryOp, Expr, ExprNode, ExprType, Function, LambdaKind, OrderByItem, UnaryOp,
};
use crate::literal::{is_ident_continue, is_ident_start, literal};

// ============================================================================
// Error plumbing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExprError<'a> {
    /// Remaining input where the problem starts.
    at: &'a str,
    fragment: &'a str,
    kind: ParseErrorKind,
    message: String,
}

impl<'a> ExprError<'a> {
    fn new(at: &'a str, fragment: &'a str, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            at,
            fragment: fragment.trim(),
            kind,
            message: message.into(),
        }
    }

    fn syntax(at: &'a str, message: impl Into<String>) -> Self {
        let at = at.trim_start();
        let message = if at.is_empty() {
            "unexpected end of input".to_string()
        } else {
            message.into()
        };
        Self::new(at, token(at), ParseErrorKind::Syntax, message)
    }

    fn into_parse_error(self, source: &str, component: &str) -> ParseError {
        let position = source.len().saturating_sub(self.at.len());
        ParseError::new(self.kind, component, self.fragment, position, self.message)
    }
}

impl<'a> NomParseError<&'a str> for ExprError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        Self::syntax(input, format!("unexpected input ({})", kind.description()))
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    /// Keep whichever alternative got further.
    fn or(self, other: Self) -> Self {
        if other.at.len() < self.at.len() {
            other
        } else {
            self
        }
    }
}

type PResult<'a, T> = IResult<&'a str, T, ExprError<'a>>;

fn fail<'a, T>(err: ExprError<'a>) -> PResult<'a, T> {
    Err(nom::Err::Failure(err))
}

fn flatten_err<'a>(err: nom::Err<ExprError<'a>>, source: &'a str, component: &str) -> ParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.into_parse_error(source, component),
        nom::Err::Incomplete(_) => ExprError::syntax("", "incomplete input")
            .into_parse_error(source, component),
    }
}

/// First whitespace-delimited word of `at`.
fn token(at: &str) -> &str {
    let end = at.find(char::is_whitespace).unwrap_or(at.len());
    &at[..end]
}

fn consumed<'a>(start: &'a str, rest: &'a str) -> &'a str {
    &start[..start.len() - rest.len()]
}

fn ws0(i: &str) -> PResult<'_, &str> {
    multispace0(i)
}

fn ws1(i: &str) -> PResult<'_, &str> {
    multispace1(i)
}

fn identifier(i: &str) -> PResult<'_, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(i)
}

// ============================================================================
// Scope
// ============================================================================

/// Deepest nesting of parentheses, `not`, negation, call arguments and
/// lambda bodies an expression may use, counting the top level as 1.
pub const MAX_EXPR_DEPTH: usize = 32;

/// Names visible to an expression: the current instance and any lambda
/// range variables.
pub(crate) struct Scope<'m> {
    model: &'m EntityDataModel,
    it: ExprType,
    ranges: Vec<(String, ExprType)>,
    depth: Cell<usize>,
}

/// Leaves one nesting level when dropped.
struct Nested<'s>(&'s Cell<usize>);

impl Drop for Nested<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl<'m> Scope<'m> {
    pub(crate) fn new(model: &'m EntityDataModel, it: &TypeDescriptor) -> Self {
        Self {
            model,
            it: ExprType::Structured {
                type_name: it.fully_qualified_name(),
                collection: false,
            },
            ranges: Vec::new(),
            depth: Cell::new(0),
        }
    }

    fn enter<'a>(&self, at: &'a str) -> Result<Nested<'_>, nom::Err<ExprError<'a>>> {
        let depth = self.depth.get() + 1;
        if depth > MAX_EXPR_DEPTH {
            return Err(nom::Err::Failure(ExprError::new(
                at,
                token(at.trim_start()),
                ParseErrorKind::Syntax,
                format!("expression nested deeper than {MAX_EXPR_DEPTH} levels"),
            )));
        }
        self.depth.set(depth);
        Ok(Nested(&self.depth))
    }

    fn with_range(&self, name: &str, ty: ExprType) -> Scope<'m> {
        let mut ranges = self.ranges.clone();
        ranges.push((name.to_string(), ty));
        Scope {
            model: self.model,
            it: self.it.clone(),
            ranges,
            depth: Cell::new(self.depth.get()),
        }
    }

    fn range(&self, name: &str) -> Option<&ExprType> {
        self.ranges
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty)
    }

    /// Type of `owner/name`.
    fn member(&self, owner: &ExprType, name: &str) -> Result<ExprType, (ParseErrorKind, String)> {
        let type_name = match owner {
            ExprType::Structured {
                type_name,
                collection: false,
            } => type_name,
            ExprType::Structured { .. } | ExprType::PrimitiveCollection { .. } => {
                return Err((
                    ParseErrorKind::InvalidSegment,
                    format!("cannot access `{name}` on a collection; use any() or all()"),
                ))
            }
            _ => {
                return Err((
                    ParseErrorKind::UnknownProperty,
                    format!("{owner} has no member `{name}`"),
                ))
            }
        };
        let unknown = || {
            (
                ParseErrorKind::UnknownProperty,
                format!("`{type_name}` has no property `{name}`"),
            )
        };
        let ty = self.model.resolve(type_name).ok_or_else(unknown)?;
        if let Some(p) = self.model.structural_property(ty, name) {
            return ExprType::from_type_ref(self.model, &p.type_ref).ok_or_else(unknown);
        }
        if let Some(n) = self.model.navigation_property(ty, name) {
            return Ok(ExprType::Structured {
                type_name: n.target.type_name.clone(),
                collection: n.target.collection,
            });
        }
        Err(unknown())
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a `$filter` value against the type of the addressed collection.
pub fn parse_filter(
    text: &str,
    model: &EntityDataModel,
    it: &TypeDescriptor,
) -> Result<Expr, ParseError> {
    const COMPONENT: &str = "$filter";
    let scope = Scope::new(model, it);
    let (rest, expr) = or_expr(&scope, text).map_err(|e| flatten_err(e, text, COMPONENT))?;
    let rest = rest.trim_start();
    if !rest.is_empty() {
        return Err(trailing(rest).into_parse_error(text, COMPONENT));
    }
    if !expr.ty.is_or_null(PrimitiveType::Boolean) {
        return Err(ParseError::new(
            ParseErrorKind::TypeMismatch,
            COMPONENT,
            text.trim(),
            0,
            format!("filter must be a boolean expression, found {}", expr.ty),
        ));
    }
    Ok(expr)
}

/// Parse a `$orderby` value: comma-separated expressions, each optionally
/// followed by `asc` or `desc`.
pub fn parse_orderby(
    text: &str,
    model: &EntityDataModel,
    it: &TypeDescriptor,
) -> Result<Vec<OrderByItem>, ParseError> {
    const COMPONENT: &str = "$orderby";
    let scope = Scope::new(model, it);
    let mut items = Vec::new();
    let mut rest = text;
    loop {
        let start = rest;
        let (after, expr) = or_expr(&scope, rest).map_err(|e| flatten_err(e, text, COMPONENT))?;
        if expr.ty.as_primitive().is_none() {
            return Err(ExprError::new(
                start,
                consumed(start, after),
                ParseErrorKind::TypeMismatch,
                format!("cannot order by a value of type {}", expr.ty),
            )
            .into_parse_error(text, COMPONENT));
        }
        let (after, descending) = direction(after);
        items.push(OrderByItem { expr, descending });

        let after = after.trim_start();
        if after.is_empty() {
            return Ok(items);
        }
        match after.strip_prefix(',') {
            Some(next) => rest = next,
            None => return Err(trailing(after).into_parse_error(text, COMPONENT)),
        }
    }
}

fn direction(i: &str) -> (&str, bool) {
    let Ok((after_ws, _)) = ws1(i) else {
        return (i, false);
    };
    for (word, descending) in [("asc", false), ("desc", true)] {
        if let Some(rest) = after_ws.strip_prefix(word) {
            if !rest.starts_with(is_ident_continue) {
                return (rest, descending);
            }
        }
    }
    (i, false)
}

fn trailing(rest: &str) -> ExprError<'_> {
    if rest.starts_with(')') {
        ExprError::syntax(rest, "unbalanced parenthesis: unexpected `)`")
    } else {
        ExprError::syntax(rest, "unexpected trailing input")
    }
}

// ============================================================================
// Binary levels
// ============================================================================

pub(crate) fn or_expr<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    binary_chain(s, i, &[BinaryOp::Or], and_expr)
}

fn and_expr<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    binary_chain(s, i, &[BinaryOp::And], comparison)
}

fn comparison<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    binary_chain(s, i, &BinaryOp::COMPARISON, additive)
}

fn additive<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    binary_chain(s, i, &BinaryOp::ADDITIVE, multiplicative)
}

fn multiplicative<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    binary_chain(s, i, &BinaryOp::MULTIPLICATIVE, unary)
}

/// Left-associative chain of `next (op next)*`.
fn binary_chain<'a, F>(s: &Scope<'_>, i: &'a str, ops: &[BinaryOp], next: F) -> PResult<'a, Expr>
where
    F: Fn(&Scope<'_>, &'a str) -> PResult<'a, Expr>,
{
    let (i, _) = ws0(i)?;
    let start = i;
    let (mut rest, mut left) = next(s, i)?;
    while let Ok((after_op, op)) = operator(ops, rest) {
        let (after_right, right) = cut(|i: &'a str| next(s, i))(after_op)?;
        let ty = match binary_result(op, &left.ty, &right.ty) {
            Ok(ty) => ty,
            Err(message) => {
                return fail(ExprError::new(
                    start,
                    consumed(start, after_right),
                    ParseErrorKind::TypeMismatch,
                    message,
                ))
            }
        };
        left = Expr::new(
            ExprNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        );
        rest = after_right;
    }
    Ok((rest, left))
}

/// Keyword operator with mandatory whitespace on both sides.
fn operator<'a>(ops: &[BinaryOp], i: &'a str) -> PResult<'a, BinaryOp> {
    let (rest, _) = ws1(i)?;
    for op in ops {
        if let Some(after) = rest.strip_prefix(op.keyword()) {
            if let Ok((after, _)) = ws1(after) {
                return Ok((after, *op));
            }
        }
    }
    Err(nom::Err::Error(ExprError::syntax(rest, "expected an operator")))
}

// ============================================================================
// Unary and primary
// ============================================================================

fn unary<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    let (i, _) = ws0(i)?;
    let _nested = s.enter(i)?;

    if let Some(after) = i.strip_prefix("not") {
        if after.starts_with(|c: char| c.is_whitespace() || c == '(') {
            let (rest, operand) = cut(|x: &'a str| unary(s, x))(after)?;
            if !operand.ty.is_or_null(PrimitiveType::Boolean) {
                return fail(ExprError::new(
                    i,
                    consumed(i, rest),
                    ParseErrorKind::TypeMismatch,
                    format!("`not` requires a boolean operand, found {}", operand.ty),
                ));
            }
            return Ok((rest, negation(UnaryOp::Not, operand, ExprType::boolean())));
        }
    }

    if let Some(after) = i.strip_prefix('-') {
        if !after.starts_with(|c: char| c.is_ascii_digit()) {
            let (rest, operand) = cut(|x: &'a str| unary(s, x))(after)?;
            let ok = match operand.ty.as_primitive() {
                Some(p) => p.is_numeric() || p == PrimitiveType::Duration,
                None => operand.ty.is_null(),
            };
            if !ok {
                return fail(ExprError::new(
                    i,
                    consumed(i, rest),
                    ParseErrorKind::TypeMismatch,
                    format!("cannot negate a value of type {}", operand.ty),
                ));
            }
            let ty = operand.ty.clone();
            return Ok((rest, negation(UnaryOp::Negate, operand, ty)));
        }
    }

    primary(s, i)
}

fn negation(op: UnaryOp, operand: Expr, ty: ExprType) -> Expr {
    Expr::new(
        ExprNode::Unary {
            op,
            operand: Box::new(operand),
        },
        ty,
    )
}

fn primary<'a>(s: &Scope<'_>, i: &'a str) -> PResult<'a, Expr> {
    if let Some(after) = i.strip_prefix('(') {
        let (rest, inner) = cut(|x: &'a str| or_expr(s, x))(after)?;
        let (rest, _) = ws0(rest)?;
        return match rest.strip_prefix(')') {
            Some(rest) => Ok((rest, inner)),
            None => fail(ExprError::new(
                i,
                i,
                ParseErrorKind::Syntax,
                "unbalanced parenthesis: missing `)`",
            )),
        };
    }

    if let Ok((rest, value)) = literal(i) {
        let ty = value
            .primitive_type()
            .map(ExprType::primitive)
            .unwrap_or(ExprType::Null);
        return Ok((rest, Expr::new(ExprNode::Literal { value }, ty)));
    }

    if i.starts_with("$it") && !i[3..].starts_with(is_ident_continue) {
        return member_path(s, i, &i[3..], None, s.it.clone());
    }

    let Ok((after, name)) = identifier(i) else {
        return Err(nom::Err::Error(ExprError::syntax(i, "expected an operand")));
    };
    if after.starts_with('(') {
        return call(s, i, name, &after[1..]);
    }
    if let Some(ty) = s.range(name) {
        return member_path(s, i, after, Some(name.to_string()), ty.clone());
    }
    match s.member(&s.it, name) {
        Ok(ty) => {
            let head = Expr::new(
                ExprNode::Member {
                    variable: None,
                    path: vec![name.to_string()],
                },
                ty,
            );
            member_tail(s, i, after, head)
        }
        Err((kind, message)) => fail(ExprError::new(i, name, kind, message)),
    }
}

fn member_path<'a>(
    s: &Scope<'_>,
    start: &'a str,
    rest: &'a str,
    variable: Option<String>,
    ty: ExprType,
) -> PResult<'a, Expr> {
    let head = Expr::new(
        ExprNode::Member {
            variable,
            path: Vec::new(),
        },
        ty,
    );
    member_tail(s, start, rest, head)
}

/// `( "/" identifier )*`, ending in an optional `any(...)` / `all(...)`.
fn member_tail<'a>(s: &Scope<'_>, start: &'a str, mut rest: &'a str, mut current: Expr) -> PResult<'a, Expr> {
    while let Some(after_slash) = rest.strip_prefix('/') {
        let (after, name) = match identifier(after_slash) {
            Ok(ok) => ok,
            Err(_) => return fail(ExprError::syntax(after_slash, "expected a member name after `/`")),
        };
        if let (Some(open), Some(kind)) = (after.strip_prefix('('), lambda_kind(name)) {
            return lambda(s, start, current, kind, open);
        }
        let ty = match s.member(&current.ty, name) {
            Ok(ty) => ty,
            Err((kind, message)) => return fail(ExprError::new(after_slash, name, kind, message)),
        };
        let ExprNode::Member { variable, mut path } = current.node else {
            return fail(ExprError::syntax(rest, "unexpected `/`"));
        };
        path.push(name.to_string());
        current = Expr::new(ExprNode::Member { variable, path }, ty);
        rest = after;
    }
    Ok((rest, current))
}

fn lambda_kind(name: &str) -> Option<LambdaKind> {
    match name {
        "any" => Some(LambdaKind::Any),
        "all" => Some(LambdaKind::All),
        _ => None,
    }
}

fn lambda<'a>(
    s: &Scope<'_>,
    start: &'a str,
    source: Expr,
    kind: LambdaKind,
    open: &'a str,
) -> PResult<'a, Expr> {
    let Some(element) = source.ty.element() else {
        return fail(ExprError::new(
            start,
            token(start),
            ParseErrorKind::TypeMismatch,
            format!("any()/all() require a collection, found {}", source.ty),
        ));
    };
    let unbalanced = || {
        ExprError::new(
            start,
            start,
            ParseErrorKind::Syntax,
            "unbalanced parenthesis: missing `)`",
        )
    };

    let (r, _) = ws0(open)?;
    if let Some(rest) = r.strip_prefix(')') {
        if kind == LambdaKind::All {
            return fail(ExprError::syntax(r, "all() requires a predicate"));
        }
        let node = ExprNode::Lambda {
            kind,
            source: Box::new(source),
            variable: None,
            predicate: None,
        };
        return Ok((rest, Expr::new(node, ExprType::boolean())));
    }

    let (r, variable) = match identifier(r) {
        Ok(ok) => ok,
        Err(_) => return fail(ExprError::syntax(r, "expected a range variable")),
    };
    let (r, _) = ws0(r)?;
    let Some(r) = r.strip_prefix(':') else {
        return fail(ExprError::syntax(r, "expected `:` after the range variable"));
    };

    let inner = s.with_range(variable, element);
    let body_start = r;
    let (r, predicate) = cut(|x: &'a str| or_expr(&inner, x))(r)?;
    if !predicate.ty.is_or_null(PrimitiveType::Boolean) {
        return fail(ExprError::new(
            body_start,
            consumed(body_start, r),
            ParseErrorKind::TypeMismatch,
            format!("lambda predicate must be boolean, found {}", predicate.ty),
        ));
    }
    let (r, _) = ws0(r)?;
    let Some(rest) = r.strip_prefix(')') else {
        return fail(unbalanced());
    };

    let node = ExprNode::Lambda {
        kind,
        source: Box::new(source),
        variable: Some(variable.to_string()),
        predicate: Some(Box::new(predicate)),
    };
    Ok((rest, Expr::new(node, ExprType::boolean())))
}

fn call<'a>(s: &Scope<'_>, start: &'a str, name: &'a str, args_start: &'a str) -> PResult<'a, Expr> {
    let Some(function) = Function::for_name(name) else {
        return fail(ExprError::new(
            start,
            name,
            ParseErrorKind::UnknownFunction,
            format!("unknown function `{name}`"),
        ));
    };

    let mut args = Vec::new();
    let (mut rest, _) = ws0(args_start)?;
    if let Some(after) = rest.strip_prefix(')') {
        rest = after;
    } else {
        loop {
            let (after, arg) = cut(|x: &'a str| or_expr(s, x))(rest)?;
            args.push(arg);
            let (after, _) = ws0(after)?;
            if let Some(next) = after.strip_prefix(',') {
                rest = next;
                continue;
            }
            if let Some(next) = after.strip_prefix(')') {
                rest = next;
                break;
            }
            return fail(ExprError::new(
                start,
                start,
                ParseErrorKind::Syntax,
                format!("unbalanced parenthesis in call to {name}()"),
            ));
        }
    }

    let arg_types: Vec<ExprType> = args.iter().map(|a| a.ty.clone()).collect();
    match function.check(&arg_types) {
        Ok(ty) => Ok((rest, Expr::new(ExprNode::Call { function, args }, ty))),
        Err(message) => fail(ExprError::new(
            start,
            consumed(start, rest),
            ParseErrorKind::TypeMismatch,
            message,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;
    use odata_edm::demo_model;

    fn filter(text: &str) -> Result<Expr, ParseError> {
        let model = demo_model().expect("demo model");
        let customer = model.resolve("ODataDemo.Customer").expect("Customer").clone();
        parse_filter(text, &model, &customer)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = filter("id eq 1 or id eq 2 and name eq 'x'").expect("parse");
        let ExprNode::Binary { op, right, .. } = &expr.node else {
            panic!("expected binary node, got {expr:?}");
        };
        assert_eq!(*op, BinaryOp::Or);
        assert!(matches!(
            right.node,
            ExprNode::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn arithmetic_binds_tighter_than_comparison() {
        let expr = filter("id add 1 mul 2 gt 10").expect("parse");
        let ExprNode::Binary { op, left, .. } = &expr.node else {
            panic!("expected binary node");
        };
        assert_eq!(*op, BinaryOp::Gt);
        assert_eq!(left.ty, ExprType::primitive(PrimitiveType::Int64));
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = filter("(id eq 1 or id eq 2) and name ne null").expect("parse");
        assert!(matches!(
            expr.node,
            ExprNode::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn unbalanced_parenthesis_names_the_fragment() {
        let err = filter("(id eq 1 or id eq 2").expect_err("unbalanced");
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert_eq!(err.position, 0);
        assert!(err.fragment.starts_with("(id eq 1"));

        let err = filter("id eq 1)").expect_err("stray paren");
        assert_eq!(err.fragment, ")");
        assert_eq!(err.position, 7);
    }

    #[test]
    fn incompatible_comparison_is_a_type_mismatch() {
        let err = filter("name eq 5").expect_err("mismatch");
        assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
        assert_eq!(err.fragment, "name eq 5");
        assert_eq!(err.component, "$filter");

        let err = filter("id eq 1 and name gt true").expect_err("mismatch");
        assert_eq!(err.fragment, "name gt true");
        assert_eq!(err.position, 12);
    }

    #[test]
    fn unknown_property_is_reported() {
        let err = filter("nickname eq 'x'").expect_err("unknown");
        assert_eq!(err.kind, ParseErrorKind::UnknownProperty);
        assert_eq!(err.fragment, "nickname");
    }

    #[test]
    fn lambda_over_navigation_and_primitive_collections() {
        let expr = filter("Orders/any(o: o/amount gt 100.5m and o/shipped)").expect("any");
        let ExprNode::Lambda {
            kind, variable, ..
        } = &expr.node
        else {
            panic!("expected lambda");
        };
        assert_eq!(*kind, LambdaKind::Any);
        assert_eq!(variable.as_deref(), Some("o"));

        filter("Phone/all(p: startswith(p, '+49'))").expect("all over strings");
        filter("Orders/any()").expect("bare any");
        assert!(filter("Orders/all()").is_err());
        assert!(filter("name/any(x: true)").is_err());
    }

    #[test]
    fn functions_are_type_checked() {
        let expr = filter("contains(tolower(name), 'smith')").expect("contains");
        assert_eq!(expr.ty, ExprType::boolean());
        filter("year(dateOfBirth) ge 1990").expect("year");
        let err = filter("length(id) eq 3").expect_err("length of int");
        assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
        let err = filter("soundex(name) eq 'x'").expect_err("unknown function");
        assert_eq!(err.kind, ParseErrorKind::UnknownFunction);
    }

    #[test]
    fn not_and_literals() {
        let expr = filter("not (name eq 'O''Neil')").expect("not");
        let ExprNode::Unary { operand, .. } = &expr.node else {
            panic!("expected unary");
        };
        let ExprNode::Binary { right, .. } = &operand.node else {
            panic!("expected binary");
        };
        assert_eq!(
            right.node,
            ExprNode::Literal {
                value: Literal::String("O'Neil".to_string())
            }
        );
    }

    fn nested(levels: usize) -> String {
        format!("{}id eq 1{}", "(".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn nesting_is_bounded() {
        filter(&nested(MAX_EXPR_DEPTH - 1)).expect("at the limit");

        let err = filter(&nested(MAX_EXPR_DEPTH)).expect_err("past the limit");
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("nested deeper"), "{}", err.message);

        let err = filter(&nested(10_000)).expect_err("far past the limit");
        assert_eq!(err.kind, ParseErrorKind::Syntax);

        let nots = format!("{}shipped", "not ".repeat(MAX_EXPR_DEPTH + 1));
        let model = demo_model().expect("demo model");
        let order = model.resolve("ODataDemo.Order").expect("Order").clone();
        assert!(parse_filter(&nots, &model, &order).is_err());
        let calls = MAX_EXPR_DEPTH * 2;
        let err = filter(&format!("{}'x'{} eq 'x'", "tolower(".repeat(calls), ")".repeat(calls)))
            .expect_err("nested calls");
        assert!(err.message.contains("nested deeper"), "{}", err.message);
    }

    #[test]
    fn filter_must_be_boolean() {
        let err = filter("id add 1").expect_err("not boolean");
        assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    }

    #[test]
    fn orderby_items_and_directions() {
        let model = demo_model().expect("demo model");
        let customer = model.resolve("ODataDemo.Customer").expect("Customer").clone();
        let items = parse_orderby("name desc, id", &model, &customer).expect("orderby");
        assert_eq!(items.len(), 2);
        assert!(items[0].descending);
        assert!(!items[1].descending);

        let err = parse_orderby("Orders", &model, &customer).expect_err("collection");
        assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
        assert!(parse_orderby("name sideways", &model, &customer).is_err());
    }
}
