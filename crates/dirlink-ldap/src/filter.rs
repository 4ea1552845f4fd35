//! Search filter compiler
//!
//! Turns structured filter expressions into RFC 4515 filter strings.
//!
//! The operator of a group is inherited by everything nested inside it until
//! another tagged group overrides it. Multi-valued fields therefore combine
//! with AND unless an enclosing `or` says otherwise.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use dirlink_connector::error::{DirectoryError, DirectoryResult};

/// Logical operator of a filter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl LogicalOp {
    fn symbol(self) -> char {
        match self {
            LogicalOp::And => '&',
            LogicalOp::Or => '|',
            LogicalOp::Not => '!',
        }
    }

    /// Operator that children of this group combine with.
    fn inner(self) -> LogicalOp {
        match self {
            LogicalOp::Not => LogicalOp::And,
            op => op,
        }
    }
}

impl FromStr for LogicalOp {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "and" | "&" => Ok(LogicalOp::And),
            "or" | "|" => Ok(LogicalOp::Or),
            "not" | "!" => Ok(LogicalOp::Not),
            other => Err(DirectoryError::invalid_filter(format!(
                "unknown logical operator '{other}'"
            ))),
        }
    }
}

/// Comparison operator of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonOp {
    #[default]
    Equal,
    Approx,
    LessOrEqual,
    GreaterOrEqual,
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::Approx => "~=",
            ComparisonOp::LessOrEqual => "<=",
            ComparisonOp::GreaterOrEqual => ">=",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(ComparisonOp::Equal),
            "~=" => Some(ComparisonOp::Approx),
            "<=" => Some(ComparisonOp::LessOrEqual),
            ">=" => Some(ComparisonOp::GreaterOrEqual),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value side of a field component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// A single value, compared with `=` unless wrapped in `Compare`.
    One(String),
    /// Several values, one leaf each, combined with `op` or the ambient operator.
    Many {
        op: Option<LogicalOp>,
        values: Vec<FilterValue>,
    },
    /// Explicit comparison operator for the wrapped value(s).
    Compare(ComparisonOp, Box<FilterValue>),
}

impl FilterValue {
    pub fn one(value: impl Into<String>) -> Self {
        FilterValue::One(value.into())
    }

    /// Several values combined with the ambient operator.
    pub fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Many {
            op: None,
            values: values.into_iter().map(|v| FilterValue::One(v.into())).collect(),
        }
    }

    /// Several values, any of which may match.
    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Self::many(values) {
            FilterValue::Many { values, .. } => FilterValue::Many {
                op: Some(LogicalOp::Or),
                values,
            },
            other => other,
        }
    }

    pub fn compare(op: ComparisonOp, value: impl Into<String>) -> Self {
        FilterValue::Compare(op, Box::new(FilterValue::One(value.into())))
    }

    fn from_json(value: &Value) -> DirectoryResult<Self> {
        match value {
            Value::String(s) => Ok(FilterValue::One(s.clone())),
            Value::Number(n) => Ok(FilterValue::One(n.to_string())),
            Value::Bool(b) => Ok(FilterValue::One(b.to_string())),
            Value::Array(items) => {
                if let [Value::String(marker), inner] = items.as_slice() {
                    if let Some(op) = ComparisonOp::parse(marker) {
                        return Ok(FilterValue::Compare(op, Box::new(Self::from_json(inner)?)));
                    }
                }

                let (op, rest) = match items.split_first() {
                    Some((Value::String(tag), rest)) => match tag.parse::<LogicalOp>() {
                        Ok(op) => (Some(op), rest),
                        Err(_) => (None, items.as_slice()),
                    },
                    _ => (None, items.as_slice()),
                };

                Ok(FilterValue::Many {
                    op,
                    values: rest.iter().map(Self::from_json).collect::<DirectoryResult<_>>()?,
                })
            }
            Value::Null | Value::Object(_) => Err(DirectoryError::invalid_filter(format!(
                "unsupported filter value: {value}"
            ))),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::One(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::One(value)
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Preformatted filter text. Blank means no filter.
    Raw(String),
    /// Field/value pairs; sorted by field name when compiled.
    Fields(Vec<(String, FilterValue)>),
    /// One field component.
    Field(String, FilterValue),
    /// Nested group. Untagged groups use the ambient operator.
    Group {
        op: Option<LogicalOp>,
        items: Vec<Filter>,
    },
}

impl Filter {
    pub fn raw(filter: impl Into<String>) -> Self {
        Filter::Raw(filter.into())
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Field(attribute.into(), FilterValue::One(value.into()))
    }

    pub fn field(attribute: impl Into<String>, value: FilterValue) -> Self {
        Filter::Field(attribute.into(), value)
    }

    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FilterValue>,
    {
        Filter::Fields(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn and(items: Vec<Filter>) -> Self {
        Filter::Group {
            op: Some(LogicalOp::And),
            items,
        }
    }

    pub fn or(items: Vec<Filter>) -> Self {
        Filter::Group {
            op: Some(LogicalOp::Or),
            items,
        }
    }

    pub fn negate(items: Vec<Filter>) -> Self {
        Filter::Group {
            op: Some(LogicalOp::Not),
            items,
        }
    }

    /// Parse the dynamic JSON form.
    ///
    /// A string is raw filter text and an object maps fields to values. An
    /// array is a group whose optional first element is a logical tag, except
    /// that `["attr", value]` is a single field component. Inside
    /// field values, `["~=", "v"]` selects a comparison operator and
    /// `["or", "a", "b"]` tags a multi-value.
    pub fn from_json(value: &Value) -> DirectoryResult<Self> {
        match value {
            Value::Null => Ok(Filter::Raw(String::new())),
            Value::String(s) => Ok(Filter::Raw(s.clone())),
            Value::Object(map) => Ok(Filter::Fields(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), FilterValue::from_json(v)?)))
                    .collect::<DirectoryResult<_>>()?,
            )),
            Value::Array(items) => {
                let (op, rest) = match items.split_first() {
                    Some((Value::String(tag), rest)) if looks_like_tag(tag) => {
                        match (tag.parse::<LogicalOp>(), rest) {
                            (Ok(op), _) => (Some(op), rest),
                            (Err(_), [value]) if !value.is_object() => {
                                return Ok(Filter::Field(
                                    tag.trim().to_string(),
                                    FilterValue::from_json(value)?,
                                ));
                            }
                            (Err(e), _) => return Err(e),
                        }
                    }
                    _ => (None, items.as_slice()),
                };
                Ok(Filter::Group {
                    op,
                    items: rest.iter().map(Self::from_json).collect::<DirectoryResult<_>>()?,
                })
            }
            Value::Number(_) | Value::Bool(_) => Err(DirectoryError::invalid_filter(format!(
                "unsupported filter expression: {value}"
            ))),
        }
    }

    /// Compile to filter text; `None` means the filter matches everything.
    pub fn compile(&self) -> Option<String> {
        compile_with(self, LogicalOp::And)
    }
}

/// A string in tag position is a tag unless it looks like filter text.
fn looks_like_tag(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && !s.contains('=') && !s.starts_with('(')
}

fn compile_with(filter: &Filter, ambient: LogicalOp) -> Option<String> {
    match filter {
        Filter::Raw(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else if text.starts_with('(') {
                Some(text.to_string())
            } else {
                Some(format!("({text})"))
            }
        }
        Filter::Fields(pairs) => {
            let mut sorted: Vec<&(String, FilterValue)> = pairs.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let parts = sorted
                .into_iter()
                .filter_map(|(name, value)| {
                    compile_field(name, value, ambient, ComparisonOp::Equal)
                })
                .collect();
            combine(ambient, parts)
        }
        Filter::Field(name, value) => compile_field(name, value, ambient, ComparisonOp::Equal),
        Filter::Group { op, items } => {
            let op = op.unwrap_or(ambient);
            let parts = items
                .iter()
                .filter_map(|item| compile_with(item, op.inner()))
                .collect();
            combine(op, parts)
        }
    }
}

fn compile_field(
    name: &str,
    value: &FilterValue,
    ambient: LogicalOp,
    comparison: ComparisonOp,
) -> Option<String> {
    match value {
        FilterValue::One(v) => Some(format!("({}{}{})", escape(name), comparison, escape(v))),
        FilterValue::Compare(op, inner) => compile_field(name, inner, ambient, *op),
        FilterValue::Many { op, values } => {
            let op = op.unwrap_or(ambient);
            let parts = values
                .iter()
                .filter_map(|v| compile_field(name, v, op.inner(), comparison))
                .collect();
            combine(op, parts)
        }
    }
}

fn combine(op: LogicalOp, parts: Vec<String>) -> Option<String> {
    match op {
        LogicalOp::Not => {
            let inner = combine(LogicalOp::And, parts)?;
            Some(format!("(!{inner})"))
        }
        LogicalOp::And | LogicalOp::Or => match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(format!("({}{})", op.symbol(), parts.concat())),
        },
    }
}

/// Escape filter text per RFC 4515.
///
/// A single `*` stays a wildcard; `**` stands for one literal asterisk.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("\\2A");
            }
            '(' | ')' | '\\' | '\0' => {
                out.push_str(&format!("\\{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}
