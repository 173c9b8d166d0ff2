//! Invalidation planning.
//!
//! Turns one entity change into the tags that must be invalidated: always the
//! entity's own tag, plus the family umbrella when the umbrella policy says the
//! change can show up in listings or aggregates.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::config::CacheConfig;
use super::events::{InvalidationEvent, SaveKind};
use super::tags::Tag;

type Predicate = dyn Fn(&InvalidationEvent) -> bool + Send + Sync;

/// Decides whether a change also invalidates the family umbrella tag.
#[derive(Clone)]
pub struct UmbrellaPolicy {
    name: &'static str,
    predicate: Arc<Predicate>,
}

impl UmbrellaPolicy {
    /// Umbrella on create/delete, or when any of `attributes` changed.
    ///
    /// An update without a change list is treated as touching everything.
    pub fn from_attributes(attributes: HashSet<String>) -> Self {
        Self::custom("attributes", move |event| match event.kind {
            SaveKind::Created | SaveKind::Deleted => true,
            SaveKind::Updated => {
                event.changed.is_empty()
                    || event.changed.iter().any(|attr| attributes.contains(attr))
            }
        })
    }

    pub fn always() -> Self {
        Self::custom("always", |_| true)
    }

    pub fn never() -> Self {
        Self::custom("never", |_| false)
    }

    pub fn custom<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&InvalidationEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    pub fn applies(&self, event: &InvalidationEvent) -> bool {
        (self.predicate)(event)
    }
}

impl From<&CacheConfig> for UmbrellaPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self::from_attributes(config.umbrella_attribute_set())
    }
}

impl fmt::Debug for UmbrellaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UmbrellaPolicy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Tags to invalidate for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub tags: Vec<Tag>,
    /// The entity tag could not be built and the umbrella stands in for it.
    pub fallback: bool,
}

impl InvalidationPlan {
    pub fn for_event(event: &InvalidationEvent, policy: &UmbrellaPolicy) -> Self {
        let umbrella = Tag::umbrella(event.family());

        match Tag::for_entity(&event.entity) {
            Ok(tag) => {
                let mut tags = vec![tag];
                if policy.applies(event) {
                    tags.push(umbrella);
                }
                Self {
                    tags,
                    fallback: false,
                }
            }
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    entity = %event.entity,
                    error = %err,
                    "Cannot tag saved entity, invalidating its whole family"
                );
                Self {
                    tags: vec![umbrella],
                    fallback: true,
                }
            }
        }
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(Tag::as_str).collect();
        write!(
            f,
            "InvalidationPlan {{ tags: [{}], fallback: {} }}",
            tags.join(","),
            self.fallback
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::EntityRef;

    fn default_policy() -> UmbrellaPolicy {
        UmbrellaPolicy::from(&CacheConfig::default())
    }

    fn names(plan: &InvalidationPlan) -> Vec<&str> {
        plan.tags.iter().map(Tag::as_str).collect()
    }

    #[test]
    fn price_change_invalidates_entity_only() {
        let event = InvalidationEvent::updated(EntityRef::product(101), ["price"]);
        let plan = InvalidationPlan::for_event(&event, &default_policy());
        assert_eq!(names(&plan), ["cat_p_101"]);
        assert!(!plan.fallback);
    }

    #[test]
    fn membership_change_also_invalidates_umbrella() {
        let event = InvalidationEvent::updated(EntityRef::product(101), ["price", "category_ids"]);
        let plan = InvalidationPlan::for_event(&event, &default_policy());
        assert_eq!(names(&plan), ["cat_p_101", "cat_p"]);
    }

    #[test]
    fn create_and_delete_invalidate_umbrella() {
        for kind in [SaveKind::Created, SaveKind::Deleted] {
            let event = InvalidationEvent::new(EntityRef::category(10), kind);
            let plan = InvalidationPlan::for_event(&event, &default_policy());
            assert_eq!(names(&plan), ["cat_c_10", "cat_c"]);
        }
    }

    #[test]
    fn update_without_change_list_is_conservative() {
        let event = InvalidationEvent::new(EntityRef::product(5), SaveKind::Updated);
        let plan = InvalidationPlan::for_event(&event, &default_policy());
        assert_eq!(names(&plan), ["cat_p_5", "cat_p"]);
    }

    #[test]
    fn untaggable_entity_falls_back_to_umbrella() {
        let event = InvalidationEvent::updated(EntityRef::product("bad id"), ["price"]);
        let plan = InvalidationPlan::for_event(&event, &UmbrellaPolicy::never());
        assert_eq!(names(&plan), ["cat_p"]);
        assert!(plan.fallback);
    }

    #[test]
    fn custom_policies() {
        let event = InvalidationEvent::updated(EntityRef::product(1), ["name"]);
        assert_eq!(
            names(&InvalidationPlan::for_event(&event, &UmbrellaPolicy::always())),
            ["cat_p_1", "cat_p"]
        );
        assert_eq!(
            names(&InvalidationPlan::for_event(&event, &UmbrellaPolicy::never())),
            ["cat_p_1"]
        );

        let names_only = UmbrellaPolicy::custom("names", |e| e.changed.iter().any(|a| a == "name"));
        assert!(names_only.applies(&event));
        assert_eq!(format!("{names_only:?}"), "UmbrellaPolicy { name: \"names\", .. }");
    }
}
