//! Cache policy registry.
//!
//! Static table of cacheable resources, the TTL class of each entity and the
//! key patterns a mutation of an entity must purge. Built once at startup from
//! the built-in table merged with `[cache.entities]` and validated before the
//! server accepts traffic.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::query::QueryParams;
use crate::config::{CacheSettings, PatternSettings};
use crate::domain::queries::QueryName;

use super::events::MutationEvent;
use super::keys::{CacheKey, ResourceRequest, SEGMENT_SEPARATOR, derive_key, encode_segment};

const DEFAULT_SHORT_TTL_SECS: u64 = 60;
const DEFAULT_MEDIUM_TTL_SECS: u64 = 120;
const DEFAULT_LONG_TTL_SECS: u64 = 300;

/// Freshness class of an entity's cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
    Short,
    Medium,
    Long,
}

impl TtlClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TtlClass::Short => "short",
            TtlClass::Medium => "medium",
            TtlClass::Long => "long",
        }
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration of each TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTable {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(DEFAULT_SHORT_TTL_SECS),
            medium: Duration::from_secs(DEFAULT_MEDIUM_TTL_SECS),
            long: Duration::from_secs(DEFAULT_LONG_TTL_SECS),
        }
    }
}

impl TtlTable {
    pub fn duration(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short,
            TtlClass::Medium => self.medium,
            TtlClass::Long => self.long,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown cache entity `{0}`")]
    UnknownEntity(String),
    #[error("unknown cache resource `{0}`")]
    UnknownResource(String),
    #[error("entity `{entity}` is invalid: {reason}")]
    InvalidEntity { entity: String, reason: String },
    #[error("invalidation pattern `{pattern}` is invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("resource `{resource}` is invalid: {reason}")]
    InvalidResource {
        resource: &'static str,
        reason: String,
    },
    #[error("entity `{entity}` has no TTL class")]
    MissingTtl { entity: String },
    #[error("resources `{first}` and `{second}` derive the same keys")]
    DuplicateKeyTemplate {
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid request for `{resource}`: {reason}")]
    InvalidRequest { resource: String, reason: String },
}

impl PolicyError {
    fn invalid_request(resource: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }
}

/// A cacheable logical read, 1:1 with an API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub name: &'static str,
    pub entity: &'static str,
    pub attribute: Option<&'static str>,
    /// Executor parameter that receives the request identifier. `None` means
    /// the resource takes no identifier.
    pub identifier_param: Option<&'static str>,
    /// Filter parameters callers may pass.
    pub allowed_params: &'static [&'static str],
    pub query: QueryName,
    /// An empty result means the identified instance does not exist. Such a
    /// result is never cached.
    pub required_row: bool,
}

impl ResourcePolicy {
    /// Parameters handed to the query executor for `request`.
    pub fn query_params(&self, request: &ResourceRequest) -> QueryParams {
        let mut params = request.params.clone();
        if let (Some(name), Some(identifier)) = (self.identifier_param, &request.identifier) {
            params.insert(name, identifier.clone());
        }
        params
    }

    fn check_request(&self, request: &ResourceRequest) -> Result<(), PolicyError> {
        match (self.identifier_param, request.identifier.as_deref()) {
            (Some(_), None) => {
                return Err(PolicyError::invalid_request(
                    self.name,
                    "an identifier is required",
                ));
            }
            (Some(_), Some(identifier)) if identifier.trim().is_empty() => {
                return Err(PolicyError::invalid_request(
                    self.name,
                    "identifier must not be empty",
                ));
            }
            (None, Some(_)) => {
                return Err(PolicyError::invalid_request(
                    self.name,
                    "resource does not take an identifier",
                ));
            }
            _ => {}
        }

        if let Some((name, _)) = request
            .params
            .iter()
            .find(|(name, _)| !self.allowed_params.iter().any(|allowed| allowed == name))
        {
            return Err(PolicyError::invalid_request(
                self.name,
                format!("unsupported parameter `{name}`"),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternPart {
    Literal(String),
    Placeholder(String),
}

/// Key pattern of an invalidation rule.
///
/// Literal text, `{name}` placeholders and an optional trailing `*`. `{id}`
/// takes the event identifier and any other name takes the event parameter of
/// that name. A trailing `:*` covers the key before it and every key below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    source: String,
    parts: Vec<PatternPart>,
    prefix: bool,
}

/// Concrete keys a pattern resolves to for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyTarget {
    Exact(CacheKey),
    Prefix(String),
}

impl KeyPattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    /// Resolve the pattern against `event`.
    ///
    /// A placeholder without a value widens the pattern to a prefix ending
    /// just before the placeholder.
    pub fn expand(&self, event: &MutationEvent) -> KeyTarget {
        let mut key = String::new();
        for part in &self.parts {
            match part {
                PatternPart::Literal(text) => key.push_str(text),
                PatternPart::Placeholder(name) => {
                    let value = if name == "id" {
                        event.identifier.as_deref()
                    } else {
                        event.params.get(name)
                    };
                    match value.filter(|value| !value.is_empty()) {
                        Some(value) => key.push_str(&encode_segment(value)),
                        None => return KeyTarget::Prefix(key),
                    }
                }
            }
        }

        if self.prefix {
            KeyTarget::Prefix(key)
        } else {
            KeyTarget::Exact(CacheKey::from_raw(key))
        }
    }
}

impl FromStr for KeyPattern {
    type Err = ConfigurationError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigurationError::InvalidPattern {
            pattern: source.to_string(),
            reason: reason.to_string(),
        };

        let (body, prefix) = match source.strip_suffix('*') {
            Some(body) => (body, true),
            None => (source, false),
        };
        if body.is_empty() {
            return Err(invalid("pattern must start with an entity namespace"));
        }

        let mut parts = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            match rest.find('{') {
                Some(0) => {
                    let close = rest
                        .find('}')
                        .ok_or_else(|| invalid("unterminated placeholder"))?;
                    let name = &rest[1..close];
                    if !is_placeholder_name(name) {
                        return Err(invalid("placeholder names use [a-z0-9_]"));
                    }
                    parts.push(PatternPart::Placeholder(name.to_string()));
                    rest = &rest[close + 1..];
                }
                Some(open) => {
                    parts.push(literal(&rest[..open]).map_err(invalid)?);
                    rest = &rest[open..];
                }
                None => {
                    parts.push(literal(rest).map_err(invalid)?);
                    rest = "";
                }
            }
        }

        match parts.first() {
            Some(PatternPart::Literal(text))
                if text
                    .split_once(SEGMENT_SEPARATOR)
                    .is_some_and(|(entity, _)| is_entity_name(entity)) => {}
            _ => return Err(invalid("pattern must start with an entity namespace")),
        }

        Ok(Self {
            source: source.to_string(),
            parts,
            prefix,
        })
    }
}

fn literal(text: &str) -> Result<PatternPart, &'static str> {
    if text.contains('}') {
        return Err("unbalanced `}`");
    }
    if !text.chars().all(|c| is_policy_char(c) || c == SEGMENT_SEPARATOR) {
        return Err("literal text uses [a-z0-9_.-] and `:`");
    }
    Ok(PatternPart::Literal(text.to_string()))
}

fn is_policy_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_entity_name(entity: &str) -> bool {
    !entity.is_empty() && entity.chars().all(is_policy_char)
}

fn is_attribute(attribute: &str) -> bool {
    attribute
        .split(SEGMENT_SEPARATOR)
        .all(|segment| !segment.is_empty() && segment.chars().all(is_policy_char))
}

/// One entry of an entity's invalidation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRule {
    pub pattern: KeyPattern,
    /// Attributes this rule is limited to; empty applies to every mutation.
    pub attributes: BTreeSet<String>,
}

impl InvalidationRule {
    pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            pattern: pattern.parse()?,
            attributes: BTreeSet::new(),
        })
    }

    pub fn for_attributes<I, S>(pattern: &str, attributes: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            pattern: pattern.parse()?,
            attributes: attributes.into_iter().map(Into::into).collect(),
        })
    }

    /// Whether a mutation touching `changed` must apply this rule. A mutation
    /// that names no attributes may have changed anything.
    pub fn applies_to(&self, changed: &BTreeSet<String>) -> bool {
        self.attributes.is_empty()
            || changed.is_empty()
            || !self.attributes.is_disjoint(changed)
    }
}

impl TryFrom<&PatternSettings> for InvalidationRule {
    type Error = ConfigurationError;

    fn try_from(settings: &PatternSettings) -> Result<Self, Self::Error> {
        Self::for_attributes(&settings.pattern, settings.attributes.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPolicy {
    pub ttl_class: Option<TtlClass>,
    pub rules: Vec<InvalidationRule>,
}

const BUILTIN_RESOURCES: &[ResourcePolicy] = &[
    ResourcePolicy {
        name: "trips.total",
        entity: "trips",
        attribute: Some("total"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::TripsTotal,
        required_row: false,
    },
    ResourcePolicy {
        name: "trips.by_locality",
        entity: "trips",
        attribute: Some("localities"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::TripsByLocality,
        required_row: false,
    },
    ResourcePolicy {
        name: "card.trips",
        entity: "card",
        attribute: Some("trips"),
        identifier_param: Some("card_id"),
        allowed_params: &[],
        query: QueryName::TripsByCard,
        required_row: false,
    },
    ResourcePolicy {
        name: "card.balance",
        entity: "card",
        attribute: Some("balance"),
        identifier_param: Some("card_id"),
        allowed_params: &[],
        query: QueryName::CardBalance,
        required_row: true,
    },
    ResourcePolicy {
        name: "card.history",
        entity: "card",
        attribute: Some("history"),
        identifier_param: Some("card_id"),
        allowed_params: &[],
        query: QueryName::CardHistory,
        required_row: false,
    },
    ResourcePolicy {
        name: "finance.revenue",
        entity: "finance",
        attribute: Some("revenue"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::FinanceRevenue,
        required_row: false,
    },
    ResourcePolicy {
        name: "finance.revenue.by_locality",
        entity: "finance",
        attribute: Some("revenue:by_localities"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::FinanceRevenueByLocality,
        required_row: false,
    },
    ResourcePolicy {
        name: "users.count",
        entity: "users",
        attribute: Some("count"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::UsersCount,
        required_row: false,
    },
    ResourcePolicy {
        name: "users.active.count",
        entity: "users",
        attribute: Some("active:count"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::UsersActiveCount,
        required_row: false,
    },
    ResourcePolicy {
        name: "stations.list",
        entity: "stations",
        attribute: Some("list"),
        identifier_param: None,
        allowed_params: &["locality", "status"],
        query: QueryName::StationsList,
        required_row: false,
    },
    ResourcePolicy {
        name: "routes.codes",
        entity: "routes",
        attribute: Some("codes"),
        identifier_param: None,
        allowed_params: &[],
        query: QueryName::RouteCodes,
        required_row: false,
    },
    ResourcePolicy {
        name: "station.arrivals",
        entity: "station",
        attribute: Some("arrivals"),
        identifier_param: Some("station_id"),
        allowed_params: &[],
        query: QueryName::StationArrivals,
        required_row: false,
    },
    ResourcePolicy {
        name: "station.alerts",
        entity: "station",
        attribute: Some("alerts"),
        identifier_param: Some("station_id"),
        allowed_params: &["active_only"],
        query: QueryName::StationAlerts,
        required_row: false,
    },
    ResourcePolicy {
        name: "route.details",
        entity: "route",
        attribute: Some("details"),
        identifier_param: Some("route_code"),
        allowed_params: &[],
        query: QueryName::RouteDetails,
        required_row: true,
    },
];

fn builtin_entities() -> Result<BTreeMap<String, EntityPolicy>, ConfigurationError> {
    let trips = vec![
        InvalidationRule::new("trips:total")?,
        InvalidationRule::new("trips:localities")?,
        InvalidationRule::new("finance:revenue")?,
        InvalidationRule::new("finance:revenue:by_localities")?,
        InvalidationRule::new("card:{card_id}:trips")?,
        InvalidationRule::for_attributes("card:{card_id}:balance", ["fare"])?,
    ];
    let card = vec![
        InvalidationRule::new("card:{id}:balance")?,
        InvalidationRule::new("card:{id}:history")?,
        InvalidationRule::new("card:{id}:trips")?,
    ];

    let entities = [
        ("trips", TtlClass::Long, trips),
        ("card", TtlClass::Long, card),
        ("finance", TtlClass::Short, Vec::new()),
        ("users", TtlClass::Medium, vec![InvalidationRule::new("users:*")?]),
        (
            "stations",
            TtlClass::Short,
            vec![
                InvalidationRule::new("stations:list:*")?,
                InvalidationRule::new("station:{id}:*")?,
            ],
        ),
        (
            "station",
            TtlClass::Short,
            vec![InvalidationRule::new("station:{id}:*")?],
        ),
        (
            "routes",
            TtlClass::Long,
            vec![
                InvalidationRule::new("routes:*")?,
                InvalidationRule::new("route:{id}:details")?,
            ],
        ),
        (
            "route",
            TtlClass::Long,
            vec![InvalidationRule::new("route:{id}:details")?],
        ),
    ];

    Ok(entities
        .into_iter()
        .map(|(name, ttl_class, rules)| {
            (
                name.to_string(),
                EntityPolicy {
                    ttl_class: Some(ttl_class),
                    rules,
                },
            )
        })
        .collect())
}

/// Validated, immutable cache policy.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    ttl: TtlTable,
    entities: BTreeMap<String, EntityPolicy>,
    resources: BTreeMap<&'static str, ResourcePolicy>,
}

impl PolicyRegistry {
    /// Registry with the built-in tables and default TTLs.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::build(TtlTable::default(), builtin_entities()?, BUILTIN_RESOURCES)
    }

    /// Built-in tables merged with `[cache]` overrides.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, ConfigurationError> {
        let mut entities = builtin_entities()?;

        for (name, overrides) in &settings.entities {
            if !is_entity_name(name) {
                return Err(ConfigurationError::InvalidEntity {
                    entity: name.clone(),
                    reason: "entity names use [a-z0-9_.-]".to_string(),
                });
            }
            let entry = entities.entry(name.clone()).or_insert(EntityPolicy {
                ttl_class: None,
                rules: Vec::new(),
            });
            if let Some(class) = overrides.ttl_class {
                entry.ttl_class = Some(class);
            }
            if let Some(patterns) = overrides.invalidation_patterns.as_ref() {
                entry.rules = patterns
                    .iter()
                    .map(InvalidationRule::try_from)
                    .collect::<Result<_, _>>()?;
            }
        }

        Self::build(settings.ttl, entities, BUILTIN_RESOURCES)
    }

    fn build(
        ttl: TtlTable,
        entities: BTreeMap<String, EntityPolicy>,
        resources: &[ResourcePolicy],
    ) -> Result<Self, ConfigurationError> {
        for (name, entity) in &entities {
            if entity.ttl_class.is_none() {
                return Err(ConfigurationError::MissingTtl {
                    entity: name.clone(),
                });
            }
        }

        let mut by_name = BTreeMap::new();
        let mut signatures: BTreeMap<(&str, bool, Option<&str>), &'static str> = BTreeMap::new();
        let mut identified: BTreeMap<&str, bool> = BTreeMap::new();

        for resource in resources {
            validate_resource(resource)?;

            if !entities.contains_key(resource.entity) {
                return Err(ConfigurationError::MissingTtl {
                    entity: resource.entity.to_string(),
                });
            }

            let takes_identifier = resource.identifier_param.is_some();
            if *identified
                .entry(resource.entity)
                .or_insert(takes_identifier)
                != takes_identifier
            {
                return Err(ConfigurationError::InvalidResource {
                    resource: resource.name,
                    reason: format!(
                        "entity `{}` mixes identified and unidentified resources",
                        resource.entity
                    ),
                });
            }

            let signature = (resource.entity, takes_identifier, resource.attribute);
            if let Some(first) = signatures.insert(signature, resource.name) {
                return Err(ConfigurationError::DuplicateKeyTemplate {
                    first,
                    second: resource.name,
                });
            }

            if by_name.insert(resource.name, resource.clone()).is_some() {
                return Err(ConfigurationError::InvalidResource {
                    resource: resource.name,
                    reason: "resource is declared twice".to_string(),
                });
            }
        }

        Ok(Self {
            ttl,
            entities,
            resources: by_name,
        })
    }

    pub fn ttl_for(&self, entity: &str) -> Result<TtlClass, ConfigurationError> {
        self.entities
            .get(entity)
            .and_then(|policy| policy.ttl_class)
            .ok_or_else(|| ConfigurationError::UnknownEntity(entity.to_string()))
    }

    pub fn ttl_duration(&self, entity: &str) -> Result<Duration, ConfigurationError> {
        self.ttl_for(entity).map(|class| self.ttl.duration(class))
    }

    pub fn ttl_table(&self) -> &TtlTable {
        &self.ttl
    }

    pub fn resource(&self, name: &str) -> Result<&ResourcePolicy, ConfigurationError> {
        self.resources
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourcePolicy> {
        self.resources.values()
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Canonical key of `request` together with the policy that produced it.
    pub fn key_for(
        &self,
        request: &ResourceRequest,
    ) -> Result<(CacheKey, &ResourcePolicy), PolicyError> {
        let resource = self.resource(&request.resource)?;
        resource.check_request(request)?;

        let key = derive_key(
            resource.entity,
            request.identifier.as_deref(),
            resource.attribute,
            &request.params,
        );
        Ok((key, resource))
    }

    pub fn rules_for(&self, entity: &str) -> Result<&[InvalidationRule], ConfigurationError> {
        self.entities
            .get(entity)
            .map(|policy| policy.rules.as_slice())
            .ok_or_else(|| ConfigurationError::UnknownEntity(entity.to_string()))
    }
}

fn validate_resource(resource: &ResourcePolicy) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidResource {
        resource: resource.name,
        reason: reason.to_string(),
    };

    if !is_entity_name(resource.entity) {
        return Err(invalid("entity names use [a-z0-9_.-]"));
    }
    if let Some(attribute) = resource.attribute
        && !is_attribute(attribute)
    {
        return Err(invalid("attribute segments use [a-z0-9_.-]"));
    }
    if resource.attribute.is_none() && resource.identifier_param.is_none() {
        return Err(invalid("resource needs an attribute or an identifier"));
    }

    let mut seen = HashSet::new();
    if resource
        .allowed_params
        .iter()
        .chain(resource.identifier_param.iter())
        .any(|name| !seen.insert(*name))
    {
        return Err(invalid("parameter names must be unique"));
    }

    Ok(())
}
