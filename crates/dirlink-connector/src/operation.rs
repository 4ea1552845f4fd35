//! Operation types
//!
//! Entries, modifications and search requests exchanged with a session.

use std::collections::BTreeMap;

use crate::config::SearchScope;

/// A directory entry returned by a search.
///
/// Attribute values are raw bytes; use the `*_str` helpers for text values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Create an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style text attribute.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.insert(
            name.into(),
            values.into_iter().map(|v| v.into().into_bytes()).collect(),
        );
        self
    }

    /// Builder-style binary attribute.
    pub fn with_binary(mut self, name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    /// Raw values for `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> Option<&Vec<Vec<u8>>> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }

    /// Text values for `name` (lossy UTF-8).
    pub fn values_str(&self, name: &str) -> Vec<String> {
        self.values(name)
            .map(|values| {
                values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First text value for `name`.
    pub fn first_str(&self, name: &str) -> Option<String> {
        self.values_str(name).into_iter().next()
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
    Increment,
}

/// One attribute change within a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    fn text<I, S>(op: ModOp, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            attribute: attribute.into(),
            values: values.into_iter().map(|v| v.into().into_bytes()).collect(),
        }
    }

    pub fn add<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::text(ModOp::Add, attribute, values)
    }

    pub fn replace<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::text(ModOp::Replace, attribute, values)
    }

    /// Delete the given values, or the whole attribute when `values` is empty.
    pub fn delete<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::text(ModOp::Delete, attribute, values)
    }

    pub fn increment(attribute: impl Into<String>, by: i64) -> Self {
        Self::text(ModOp::Increment, attribute, [by.to_string()])
    }
}

/// A search as handed to a session: the filter is already compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
    pub size_limit: Option<u32>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            size_limit: None,
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_size_limit(mut self, limit: u32) -> Self {
        self.size_limit = Some(limit);
        self
    }
}
