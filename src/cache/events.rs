//! Mutation events.
//!
//! A write that changed cacheable data describes itself as a [`MutationEvent`];
//! the invalidation coordinator turns it into keys to purge.

use std::collections::BTreeSet;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::query::QueryParams;

/// A committed change to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// Unique identifier for log correlation (UUIDv4).
    pub id: Uuid,
    /// Entity namespace that changed, e.g. `trips` or `card`.
    pub entity: String,
    /// Identifier of the changed instance, substituted for `{id}` in patterns.
    pub identifier: Option<String>,
    /// Attributes the write touched. Empty means "anything may have changed".
    pub attributes: BTreeSet<String>,
    /// Named values substituted for other `{name}` placeholders.
    pub params: QueryParams,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: entity.into(),
            identifier: None,
            attributes: BTreeSet::new(),
            params: QueryParams::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl ToString) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.insert(attribute.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// A trip was opened with `card_id` at a station in `locality`.
    pub fn trip_started(card_id: i64, locality: &str) -> Self {
        Self::new("trips")
            .with_attribute("status")
            .with_param("card_id", card_id.to_string())
            .with_param("locality", locality)
    }

    /// A trip of `card_id` was closed and its fare charged to the card.
    pub fn trip_ended(card_id: i64) -> Self {
        Self::new("trips")
            .with_attribute("status")
            .with_attribute("fare")
            .with_param("card_id", card_id.to_string())
    }

    /// `card_id` was recharged.
    pub fn card_recharged(card_id: i64) -> Self {
        Self::new("card")
            .with_identifier(card_id)
            .with_attribute("balance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_creation() {
        let event = MutationEvent::new("stations").with_identifier(3);

        assert_eq!(event.entity, "stations");
        assert_eq!(event.identifier.as_deref(), Some("3"));
        assert!(event.attributes.is_empty());
        assert!(!event.id.is_nil());
    }

    #[test]
    fn events_get_distinct_ids() {
        let a = MutationEvent::card_recharged(1);
        let b = MutationEvent::card_recharged(1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn trip_end_touches_fare() {
        let event = MutationEvent::trip_ended(12);
        assert!(event.attributes.contains("fare"));
        assert_eq!(event.params.get("card_id"), Some("12"));
        assert!(event.identifier.is_none());
    }
}
