//! OData request URI parser.
//!
//! [`parse_uri`] turns a raw request target into an [`ODataUri`]: the
//! resource path resolved segment by segment against an
//! [`odata_edm::EntityDataModel`], plus typed query options. Parsing is
//! all-or-nothing; the first problem is returned as a [`ParseError`] that
//! names the offending fragment and its position.
//!
//! ```text
//! /odata.svc/Customers(1)/Orders?$filter=amount gt 100m&$top=5
//! \________/ \__________________/ \__________________________/
//!   root        resource path              query options
//! ```

pub mod error;
pub mod expr;
pub mod filter;
pub mod literal;
pub mod options;
pub mod path;
pub mod uri;

pub use error::{ParseError, ParseErrorKind};
pub use expr::{BinaryOp, Expr, ExprNode, ExprType, Function, LambdaKind, OrderByItem, UnaryOp};
pub use filter::{parse_filter, parse_orderby, MAX_EXPR_DEPTH};
pub use literal::{parse_literal, Literal};
pub use options::{CustomOption, ExpandItem, Format, QueryOptions, SelectItem, MAX_EXPAND_DEPTH};
pub use path::{parse_resource_path, KeyValue, PathSegment, ResolvedPath, Target};
pub use uri::{parse_uri, ODataUri, UriParser, UriParserConfig};
