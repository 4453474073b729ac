//! System query options: `$filter`, `$select`, `$expand`, `$orderby`,
//! `$top`, `$skip`, `$count`, `$format`, plus pass-through custom options.

use odata_edm::{EntityDataModel, TypeDescriptor};
use serde::Serialize;

use crate::error::{ParseError, ParseErrorKind, Result};
use crate::expr::{Expr, OrderByItem};
use crate::filter::{parse_filter, parse_orderby};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Format {
    Json,
    Atom,
    Xml,
    /// Any other media type, kept as given.
    MediaType(String),
}

impl Format {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "atom" => Some(Format::Atom),
            "xml" => Some(Format::Xml),
            other if other.contains('/') => Some(Format::MediaType(other.to_string())),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            Format::Json => "application/json",
            Format::Atom => "application/atom+xml",
            Format::Xml => "application/xml",
            Format::MediaType(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum SelectItem {
    /// `*`
    All,
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandItem {
    pub navigation: String,
    pub target_type: String,
    pub collection: bool,
    pub options: QueryOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomOption {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    /// Empty means every property.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<SelectItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<ExpandItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    pub count: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<CustomOption>,
}

impl QueryOptions {
    /// Whether `$select` restricts the property set.
    pub fn selects_all(&self) -> bool {
        self.select.is_empty() || self.select.contains(&SelectItem::All)
    }

    /// Whether the top-level property `name` survives `$select`.
    pub fn is_selected(&self, name: &str) -> bool {
        self.selects_all()
            || self
                .select
                .iter()
                .any(|s| matches!(s, SelectItem::Path(p) if p.first().map(String::as_str) == Some(name)))
    }

    pub fn expanded(&self, navigation: &str) -> Option<&ExpandItem> {
        self.expand.iter().find(|e| e.navigation == navigation)
    }
}

/// Deepest `$expand` nesting accepted, counting the top level as 1.
pub const MAX_EXPAND_DEPTH: usize = 8;

/// What the options of one request (or one `$expand` item) apply to.
pub(crate) struct OptionScope<'m> {
    pub model: &'m EntityDataModel,
    pub subject: Option<&'m TypeDescriptor>,
    pub collection: bool,
    pub max_top: Option<u64>,
}

/// One decoded `name=value` option.
///
/// Errors raised while parsing `value` carry positions into `value`;
/// [`RawOption::locate`] moves them to `start` in the enclosing text,
/// undoing percent-decoding when `encoded` holds the undecoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawOption<'q> {
    pub name: String,
    pub value: String,
    pub start: usize,
    pub encoded: Option<&'q str>,
}

impl RawOption<'_> {
    fn locate(&self, position: usize) -> usize {
        self.start
            + match self.encoded {
                Some(encoded) => encoded_offset(encoded, position),
                None => position,
            }
    }
}

/// Offset in `encoded` of the byte at `decoded` in its percent-decoding.
pub(crate) fn encoded_offset(encoded: &str, decoded: usize) -> usize {
    let bytes = encoded.as_bytes();
    let hex = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_hexdigit);
    let (mut raw, mut out) = (0usize, 0usize);
    while raw < bytes.len() && out < decoded {
        raw += if bytes[raw] == b'%' && hex(raw + 1) && hex(raw + 2) {
            3
        } else {
            1
        };
        out += 1;
    }
    raw
}

const SYSTEM_OPTIONS: [&str; 8] = [
    "$filter", "$select", "$expand", "$orderby", "$top", "$skip", "$count", "$format",
];
const NESTED_OPTIONS: [&str; 7] = [
    "$filter", "$select", "$expand", "$orderby", "$top", "$skip", "$count",
];

/// Parse decoded options, in request order.
pub(crate) fn parse_options(pairs: &[RawOption<'_>], scope: &OptionScope<'_>) -> Result<QueryOptions> {
    parse_options_at(pairs, scope, 1)
}

fn parse_options_at(
    pairs: &[RawOption<'_>],
    scope: &OptionScope<'_>,
    depth: usize,
) -> Result<QueryOptions> {
    let nested = depth > 1;
    let mut options = QueryOptions::default();
    let mut seen: Vec<&str> = Vec::new();

    for pair in pairs {
        let (name, value) = (&pair.name, &pair.value);
        let allowed: &[&str] = if nested {
            &NESTED_OPTIONS
        } else {
            &SYSTEM_OPTIONS
        };
        if !allowed.contains(&name.as_str()) {
            if nested {
                return Err(ParseError::in_option(
                    ParseErrorKind::InvalidOption,
                    "$expand",
                    name,
                    format!("`{name}` is not allowed inside $expand"),
                )
                .relocated(|p| pair.locate(p)));
            }
            options.custom.push(CustomOption {
                name: name.clone(),
                value: value.clone(),
            });
            continue;
        }
        if seen.contains(&name.as_str()) {
            return Err(ParseError::in_option(
                ParseErrorKind::InvalidOption,
                name,
                value,
                format!("`{name}` given more than once"),
            )
            .relocated(|p| pair.locate(p)));
        }
        seen.push(name.as_str());

        apply_option(&mut options, name, value, scope, depth)
            .map_err(|e| e.relocated(|p| pair.locate(p)))?;
    }
    Ok(options)
}

fn apply_option(
    options: &mut QueryOptions,
    name: &str,
    value: &str,
    scope: &OptionScope<'_>,
    depth: usize,
) -> Result<()> {
    match name {
        "$filter" => {
            let subject = collection_subject(scope, name, value)?;
            options.filter = Some(parse_filter(value, scope.model, subject)?);
        }
        "$orderby" => {
            let subject = collection_subject(scope, name, value)?;
            options.order_by = parse_orderby(value, scope.model, subject)?;
        }
        "$select" => {
            let subject = structured_subject(scope, name, value)?;
            options.select = parse_select(value, scope.model, subject)?;
        }
        "$expand" => {
            let subject = structured_subject(scope, name, value)?;
            options.expand = parse_expand(value, scope, subject, depth)?;
        }
        "$top" => {
            require_collection(scope, name, value)?;
            let top = non_negative(name, value)?;
            if let Some(max) = scope.max_top.filter(|max| top > *max) {
                return Err(ParseError::in_option(
                    ParseErrorKind::InvalidOption,
                    name,
                    value,
                    format!("$top may not exceed {max}"),
                ));
            }
            options.top = Some(top);
        }
        "$skip" => {
            require_collection(scope, name, value)?;
            options.skip = Some(non_negative(name, value)?);
        }
        "$count" => {
            require_collection(scope, name, value)?;
            options.count = match value.trim() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(ParseError::in_option(
                        ParseErrorKind::InvalidOption,
                        name,
                        value,
                        "$count must be `true` or `false`",
                    ))
                }
            };
        }
        "$format" => {
            options.format = Some(Format::parse(value).ok_or_else(|| {
                ParseError::in_option(
                    ParseErrorKind::InvalidOption,
                    name,
                    value,
                    "$format must be json, xml, atom or a media type",
                )
            })?);
        }
        _ => {}
    }
    Ok(())
}

fn non_negative(name: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        ParseError::in_option(
            ParseErrorKind::InvalidOption,
            name,
            value,
            format!("{name} must be a non-negative integer"),
        )
    })
}

fn require_collection(scope: &OptionScope<'_>, name: &str, value: &str) -> Result<()> {
    if scope.collection {
        Ok(())
    } else {
        Err(ParseError::in_option(
            ParseErrorKind::InvalidOption,
            name,
            value,
            format!("{name} applies only to collections"),
        ))
    }
}

fn structured_subject<'m>(
    scope: &OptionScope<'m>,
    name: &str,
    value: &str,
) -> Result<&'m TypeDescriptor> {
    scope.subject.ok_or_else(|| {
        ParseError::in_option(
            ParseErrorKind::InvalidOption,
            name,
            value,
            format!("{name} applies only to entities and complex values"),
        )
    })
}

fn collection_subject<'m>(
    scope: &OptionScope<'m>,
    name: &str,
    value: &str,
) -> Result<&'m TypeDescriptor> {
    require_collection(scope, name, value)?;
    structured_subject(scope, name, value)
}

fn parse_select(
    value: &str,
    model: &EntityDataModel,
    subject: &TypeDescriptor,
) -> Result<Vec<SelectItem>> {
    let mut items = Vec::new();
    for (offset, raw) in split_top_level(value, ',', "$select")? {
        let item = raw.trim();
        if item == "*" {
            items.push(SelectItem::All);
            continue;
        }
        let unknown = |message: String| {
            ParseError::new(ParseErrorKind::UnknownProperty, "$select", item, offset, message)
        };
        let mut path = Vec::new();
        let mut current = Some(subject);
        for part in item.split('/') {
            let Some(ty) = current else {
                return Err(unknown(format!("`{part}` follows a primitive value")));
            };
            if let Some(p) = model.structural_property(ty, part) {
                current = model
                    .resolve(&p.type_ref.type_name)
                    .filter(|t| t.is_complex());
            } else if model.navigation_property(ty, part).is_some() {
                current = None;
            } else {
                return Err(unknown(format!(
                    "`{}` has no property `{part}`",
                    ty.fully_qualified_name()
                )));
            }
            path.push(part.to_string());
        }
        items.push(SelectItem::Path(path));
    }
    Ok(items)
}

fn parse_expand(
    value: &str,
    scope: &OptionScope<'_>,
    subject: &TypeDescriptor,
    depth: usize,
) -> Result<Vec<ExpandItem>> {
    let mut items = Vec::new();
    for (raw_offset, raw) in split_top_level(value, ',', "$expand")? {
        let item = raw.trim_start();
        let offset = raw_offset + (raw.len() - item.len());
        let item = item.trim_end();
        let (nav_name, nested) = match item.find('(') {
            None => (item, None),
            Some(open) => match item[open + 1..].strip_suffix(')') {
                Some(inner) => (&item[..open], Some(inner)),
                None => {
                    return Err(ParseError::new(
                        ParseErrorKind::Syntax,
                        "$expand",
                        item,
                        offset,
                        "unbalanced parenthesis in $expand item",
                    ))
                }
            },
        };
        let nav_name = nav_name.trim();
        let Some(nav) = scope.model.navigation_property(subject, nav_name) else {
            return Err(ParseError::new(
                ParseErrorKind::UnknownProperty,
                "$expand",
                nav_name,
                offset,
                format!(
                    "`{}` has no navigation property `{nav_name}`",
                    subject.fully_qualified_name()
                ),
            ));
        };
        if items.iter().any(|e: &ExpandItem| e.navigation == nav.name) {
            return Err(ParseError::new(
                ParseErrorKind::InvalidOption,
                "$expand",
                nav_name,
                offset,
                format!("`{nav_name}` expanded more than once"),
            ));
        }

        let target = scope.model.resolve(&nav.target.type_name);
        let nested_scope = OptionScope {
            model: scope.model,
            subject: target,
            collection: nav.target.collection,
            max_top: scope.max_top,
        };
        let options = match nested {
            None => QueryOptions::default(),
            Some(inner) => {
                if depth >= MAX_EXPAND_DEPTH {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidOption,
                        "$expand",
                        nav_name,
                        offset,
                        format!("$expand nested deeper than {MAX_EXPAND_DEPTH} levels"),
                    ));
                }
                // `inner` starts right after the `(` that follows the name.
                let inner_start = offset + item.len() - inner.len() - 1;
                let mut pairs = Vec::new();
                for (part_offset, part) in split_top_level(inner, ';', "$expand")? {
                    let part_start = inner_start + part_offset;
                    let trimmed = part.trim_start();
                    let part_start = part_start + (part.len() - trimmed.len());
                    let part = trimmed.trim_end();
                    if part.is_empty() {
                        continue;
                    }
                    let Some((k, v)) = part.split_once('=') else {
                        return Err(ParseError::new(
                            ParseErrorKind::Syntax,
                            "$expand",
                            part,
                            part_start,
                            "expected `$option=value` inside $expand",
                        ));
                    };
                    pairs.push(RawOption {
                        name: k.trim().to_string(),
                        value: v.to_string(),
                        start: part_start + k.len() + 1,
                        encoded: None,
                    });
                }
                parse_options_at(&pairs, &nested_scope, depth + 1)?
            }
        };
        items.push(ExpandItem {
            navigation: nav.name.clone(),
            target_type: nav.target.type_name.clone(),
            collection: nav.target.collection,
            options,
        });
    }
    Ok(items)
}

/// Split on `sep` outside parentheses and string literals, returning each
/// piece with its byte offset.
pub(crate) fn split_top_level<'a>(
    text: &'a str,
    sep: char,
    component: &str,
) -> Result<Vec<(usize, &'a str)>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::Syntax,
                        component,
                        &text[i..],
                        i,
                        "unbalanced parenthesis: unexpected `)`",
                    )
                })?;
            }
            c if c == sep && !quoted && depth == 0 => {
                out.push((start, &text[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || quoted {
        return Err(ParseError::new(
            ParseErrorKind::Syntax,
            component,
            &text[start..],
            start,
            if quoted {
                "unterminated string literal"
            } else {
                "unbalanced parenthesis: missing `)`"
            },
        ));
    }
    out.push((start, &text[start..]));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_parentheses_and_quotes() {
        let parts = split_top_level("a,b($top=1;$select=x,y),'c,d'", ',', "$expand").expect("split");
        let texts: Vec<&str> = parts.iter().map(|(_, t)| *t).collect();
        assert_eq!(texts, vec!["a", "b($top=1;$select=x,y)", "'c,d'"]);
        assert_eq!(parts[1].0, 2);

        assert!(split_top_level("a(b", ',', "$expand").is_err());
        assert!(split_top_level("a)b", ',', "$expand").is_err());
    }

    #[test]
    fn format_aliases() {
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("ATOM"), Some(Format::Atom));
        assert_eq!(
            Format::parse("application/json").map(|f| f.media_type().to_string()),
            Some("application/json".to_string())
        );
        assert_eq!(Format::parse("yaml"), None);
    }
}
