//! Cache key derivation.
//!
//! Keys have the shape `{entity}:{identifier}:{attribute}` with identifier and
//! attribute optional, followed by a single `name=value&...` segment when the
//! request carries parameters. Identifiers and parameters are form-encoded, so
//! they never contain the `:`, `=` or `&` separators.

use std::borrow::Borrow;
use std::fmt;

use url::form_urlencoded;

use crate::application::query::QueryParams;

pub(crate) const SEGMENT_SEPARATOR: char = ':';

/// Canonical key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap text already in canonical form, e.g. an expanded invalidation pattern.
    pub(crate) fn from_raw(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The namespace this key belongs to.
    pub fn entity(&self) -> &str {
        self.0
            .split_once(SEGMENT_SEPARATOR)
            .map_or(self.0.as_str(), |(entity, _)| entity)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A logical read: which resource, for which identifier, with which filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub resource: String,
    pub identifier: Option<String>,
    pub params: QueryParams,
}

impl ResourceRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            identifier: None,
            params: QueryParams::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl ToString) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }
}

/// Form-encode a dynamic key segment.
pub fn encode_segment(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Prefix shared by every key of `entity`.
pub fn entity_prefix(entity: &str) -> String {
    format!("{entity}{SEGMENT_SEPARATOR}")
}

/// Derive the canonical key for a logical request.
///
/// `entity` and `attribute` are static policy text and are used verbatim;
/// `identifier` and `params` are encoded. Parameter order never matters.
pub fn derive_key(
    entity: &str,
    identifier: Option<&str>,
    attribute: Option<&str>,
    params: &QueryParams,
) -> CacheKey {
    let mut key = String::from(entity);

    if let Some(identifier) = identifier {
        key.push(SEGMENT_SEPARATOR);
        key.push_str(&encode_segment(identifier));
    }

    if let Some(attribute) = attribute {
        key.push(SEGMENT_SEPARATOR);
        key.push_str(attribute);
    }

    if !params.is_empty() {
        key.push(SEGMENT_SEPARATOR);
        let encoded: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", encode_segment(name), encode_segment(value)))
            .collect();
        key.push_str(&encoded.join("&"));
    }

    CacheKey(key)
}
