//! Invalidation plan generation.
//!
//! Turns a mutation event into the deduplicated set of keys and prefixes the
//! coordinator must purge.

use std::collections::BTreeSet;
use std::fmt;

use super::events::MutationEvent;
use super::keys::{CacheKey, SEGMENT_SEPARATOR};
use super::policy::{ConfigurationError, KeyTarget, PolicyRegistry};

/// Keys to delete for one mutation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Keys deleted directly.
    pub exact: BTreeSet<CacheKey>,
    /// Prefixes enumerated, then deleted key by key.
    pub prefixes: BTreeSet<String>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ exact: {}, prefixes: {} }}",
            self.exact.len(),
            self.prefixes.len(),
        )
    }
}

impl InvalidationPlan {
    /// Build the plan for `event` from the entity's invalidation rules.
    ///
    /// - Applies only rules whose attribute filter matches the event
    /// - A prefix ending in `:` also covers the key before it
    /// - Drops keys and prefixes already covered by a shorter prefix
    pub fn from_event(
        registry: &PolicyRegistry,
        event: &MutationEvent,
    ) -> Result<Self, ConfigurationError> {
        let mut plan = Self::default();

        for rule in registry.rules_for(&event.entity)? {
            if !rule.applies_to(&event.attributes) {
                continue;
            }
            match rule.pattern.expand(event) {
                KeyTarget::Exact(key) => {
                    plan.exact.insert(key);
                }
                KeyTarget::Prefix(prefix) => {
                    if let Some(parent) = prefix.strip_suffix(SEGMENT_SEPARATOR)
                        && !parent.is_empty()
                    {
                        plan.exact.insert(CacheKey::from_raw(parent.to_string()));
                    }
                    plan.prefixes.insert(prefix);
                }
            }
        }

        plan.collapse();
        Ok(plan)
    }

    fn collapse(&mut self) {
        let roots: Vec<String> = self
            .prefixes
            .iter()
            .filter(|prefix| {
                !self
                    .prefixes
                    .iter()
                    .any(|other| other != *prefix && prefix.starts_with(other.as_str()))
            })
            .cloned()
            .collect();

        self.exact
            .retain(|key| !roots.iter().any(|root| key.as_str().starts_with(root.as_str())));
        self.prefixes = roots.into_iter().collect();
    }

    /// Check if the plan has any actions to execute.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PolicyRegistry {
        PolicyRegistry::builtin().expect("builtin registry")
    }

    fn exact(plan: &InvalidationPlan) -> Vec<&str> {
        plan.exact.iter().map(CacheKey::as_str).collect()
    }

    #[test]
    fn trip_start_purges_aggregates_and_card_trips() {
        let event = MutationEvent::trip_started(7, "Chapinero");
        let plan = InvalidationPlan::from_event(&registry(), &event).expect("plan");

        assert_eq!(
            exact(&plan),
            [
                "card:7:trips",
                "finance:revenue",
                "finance:revenue:by_localities",
                "trips:localities",
                "trips:total",
            ]
        );
        assert!(plan.prefixes.is_empty());
    }

    #[test]
    fn fare_change_also_purges_balance() {
        let event = MutationEvent::trip_ended(7);
        let plan = InvalidationPlan::from_event(&registry(), &event).expect("plan");

        assert!(exact(&plan).contains(&"card:7:balance"));
        assert!(exact(&plan).contains(&"card:7:trips"));
    }

    #[test]
    fn missing_identifier_widens_to_entity_prefix() {
        let event = MutationEvent::new("card").with_attribute("status");
        let plan = InvalidationPlan::from_event(&registry(), &event).expect("plan");

        assert!(plan.prefixes.contains("card:"));
        assert_eq!(plan.prefixes.len(), 1);
        assert_eq!(exact(&plan), ["card"]);
    }

    #[test]
    fn prefix_rule_covers_parameterless_key() {
        let plan = InvalidationPlan::from_event(&registry(), &MutationEvent::new("stations"))
            .expect("plan");

        assert_eq!(exact(&plan), ["stations:list"]);
        assert!(plan.prefixes.contains("stations:list:"));
    }

    #[test]
    fn finance_has_nothing_to_purge() {
        let plan = InvalidationPlan::from_event(&registry(), &MutationEvent::new("finance"))
            .expect("plan");
        assert!(plan.is_empty());
    }

    #[test]
    fn unknown_entity_is_a_configuration_error() {
        let err = InvalidationPlan::from_event(&registry(), &MutationEvent::new("parking"))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownEntity("parking".to_string()));
    }

    #[test]
    fn display_format() {
        let plan = InvalidationPlan::default();
        let display = format!("{}", plan);
        assert!(display.contains("InvalidationPlan"));
        assert!(display.contains("exact: 0"));
    }
}
