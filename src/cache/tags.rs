//! Cache tags and their derivation from a resolution.
//!
//! Tag order is part of the observable contract (`X-Magento-Tags`): families
//! appear in the order they were first touched, each as its umbrella tag
//! followed by its entity tags in first-touched order, and the global
//! full-page-cache tag closes the sequence.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::application::engine::{Resolution, Touched};
use crate::domain::entities::{EntityFamily, EntityRef};

/// Marker carried by every cacheable entry.
pub const GLOBAL_TAG: &str = "FPC";

/// Separator used when tags are serialized into a header.
pub const TAG_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    pub fn global() -> Self {
        Self(GLOBAL_TAG.to_string())
    }

    pub fn umbrella(family: EntityFamily) -> Self {
        Self(family.tag_prefix().to_string())
    }

    /// Entity-scoped tag, rejecting ids that would corrupt the header form.
    pub fn for_entity(entity: &EntityRef) -> Result<Self, ExtractError> {
        validate_id(entity)?;
        Ok(Self(format!("{}_{}", entity.family.tag_prefix(), entity.id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_TAG
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("{family} entity has an empty id")]
    EmptyId { family: EntityFamily },
    #[error("{family} id `{id}` contains characters not allowed in a tag")]
    InvalidId { family: EntityFamily, id: String },
}

fn validate_id(entity: &EntityRef) -> Result<(), ExtractError> {
    if entity.id.is_empty() {
        return Err(ExtractError::EmptyId {
            family: entity.family,
        });
    }
    if entity
        .id
        .chars()
        .any(|c| c == TAG_SEPARATOR || c.is_whitespace() || c.is_control())
    {
        return Err(ExtractError::InvalidId {
            family: entity.family,
            id: entity.id.clone(),
        });
    }
    Ok(())
}

/// Serialize tags into the `X-Magento-Tags` header form.
pub fn header_value(tags: &[Tag]) -> String {
    let mut value = String::new();
    for (index, tag) in tags.iter().enumerate() {
        if index > 0 {
            value.push(TAG_SEPARATOR);
        }
        value.push_str(tag.as_str());
    }
    value
}

/// Parse a header value back into tags, trimming a trailing carriage return.
pub fn parse_header_value(value: &str) -> Vec<Tag> {
    value
        .trim_end_matches('\r')
        .split(TAG_SEPARATOR)
        .filter(|tag| !tag.is_empty())
        .map(Tag::from)
        .collect()
}

/// Derives the ordered tag sequence for a resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagExtractor;

impl TagExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, resolution: &Resolution) -> Result<Vec<Tag>, ExtractError> {
        let mut families: Vec<(EntityFamily, Vec<Tag>)> = Vec::new();
        let mut seen: HashSet<Tag> = HashSet::new();

        for touched in &resolution.touched {
            let (family, entity_tag) = match touched {
                Touched::Entity(entity) => (entity.family, Some(Tag::for_entity(entity)?)),
                Touched::Family(family) => (*family, None),
            };

            let slot = match families.iter().position(|(f, _)| *f == family) {
                Some(position) => position,
                None => {
                    families.push((family, Vec::new()));
                    families.len() - 1
                }
            };

            if let Some(tag) = entity_tag
                && seen.insert(tag.clone())
            {
                families[slot].1.push(tag);
            }
        }

        let mut tags = Vec::with_capacity(seen.len() + families.len() + 1);
        for (family, entity_tags) in families {
            tags.push(Tag::umbrella(family));
            tags.extend(entity_tags);
        }
        tags.push(Tag::global());
        Ok(tags)
    }

    /// Like [`extract`](Self::extract), but degrades to the global tag alone.
    pub fn extract_or_degraded(&self, resolution: &Resolution) -> Vec<Tag> {
        self.extract(resolution).unwrap_or_else(|err| {
            warn!(
                error = %err,
                touched = resolution.touched.len(),
                "Tag extraction failed, caching with global tag only"
            );
            vec![Tag::global()]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_resolution() -> Resolution {
        let mut resolution = Resolution::new("{}");
        resolution
            .touch(EntityRef::category(10))
            .touch(EntityRef::product(101))
            .touch(EntityRef::product(102));
        resolution
    }

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(Tag::as_str).collect()
    }

    #[test]
    fn category_with_products() {
        let tags = TagExtractor::new()
            .extract(&category_resolution())
            .expect("tags");
        assert_eq!(
            names(&tags),
            ["cat_c", "cat_c_10", "cat_p", "cat_p_101", "cat_p_102", "FPC"]
        );
    }

    #[test]
    fn single_product() {
        let mut resolution = Resolution::new("{}");
        resolution.touch(EntityRef::product(7));
        let tags = TagExtractor::new().extract(&resolution).expect("tags");
        assert_eq!(names(&tags), ["cat_p", "cat_p_7", "FPC"]);
    }

    #[test]
    fn repeated_entities_contribute_once() {
        let mut resolution = category_resolution();
        resolution
            .touch(EntityRef::product(101))
            .touch(EntityRef::category(10));
        let tags = TagExtractor::new().extract(&resolution).expect("tags");
        assert_eq!(
            names(&tags),
            ["cat_c", "cat_c_10", "cat_p", "cat_p_101", "cat_p_102", "FPC"]
        );
    }

    #[test]
    fn family_order_follows_first_touch() {
        let mut resolution = Resolution::new("{}");
        resolution
            .touch(EntityRef::product(5))
            .touch(EntityRef::category(2))
            .touch(EntityRef::product(6));
        let tags = TagExtractor::new().extract(&resolution).expect("tags");
        assert_eq!(
            names(&tags),
            ["cat_p", "cat_p_5", "cat_p_6", "cat_c", "cat_c_2", "FPC"]
        );
    }

    #[test]
    fn bare_family_contributes_umbrella_only() {
        let mut resolution = Resolution::new("{}");
        resolution.touch_family(EntityFamily::Product);
        let tags = TagExtractor::new().extract(&resolution).expect("tags");
        assert_eq!(names(&tags), ["cat_p", "FPC"]);
    }

    #[test]
    fn nothing_touched_yields_global_only() {
        let tags = TagExtractor::new()
            .extract(&Resolution::new("{}"))
            .expect("tags");
        assert_eq!(names(&tags), ["FPC"]);
    }

    #[test]
    fn extraction_is_reproducible() {
        let extractor = TagExtractor::new();
        let resolution = category_resolution();
        let first = extractor.extract(&resolution).expect("tags");
        for _ in 0..10 {
            assert_eq!(extractor.extract(&resolution).expect("tags"), first);
        }
    }

    #[test]
    fn unsafe_ids_degrade_to_global_tag() {
        let mut resolution = Resolution::new("{}");
        resolution
            .touch(EntityRef::product(1))
            .touch(EntityRef::product("a,b"));
        let extractor = TagExtractor::new();

        assert_eq!(
            extractor.extract(&resolution),
            Err(ExtractError::InvalidId {
                family: EntityFamily::Product,
                id: "a,b".to_string(),
            })
        );
        assert_eq!(names(&extractor.extract_or_degraded(&resolution)), ["FPC"]);
    }

    #[test]
    fn empty_id_is_rejected() {
        assert_eq!(
            Tag::for_entity(&EntityRef::category("")),
            Err(ExtractError::EmptyId {
                family: EntityFamily::Category
            })
        );
    }

    #[test]
    fn header_round_trip_trims_carriage_return() {
        let tags = TagExtractor::new()
            .extract(&category_resolution())
            .expect("tags");
        let header = header_value(&tags);
        assert_eq!(header, "cat_c,cat_c_10,cat_p,cat_p_101,cat_p_102,FPC");
        assert_eq!(parse_header_value(&format!("{header}\r")), tags);
    }

    #[test]
    fn header_value_separates_tags_without_padding() {
        assert_eq!(header_value(&[]), "");
        assert_eq!(header_value(&[Tag::global()]), "FPC");
        assert_eq!(
            header_value(&[Tag::from("cat_p"), Tag::global()]).matches(TAG_SEPARATOR).count(),
            1
        );
    }
}
