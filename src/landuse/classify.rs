//! Category derivation from raw OSM-style tags.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::UNCLASSIFIED;

/// Pick the first present key of `tag_priority` and format it as
/// `key:value`, or just `key` for boolean-style values.
pub fn classify_tags(
    raw_attributes: &BTreeMap<String, String>,
    tag_priority: &[String],
) -> Option<String> {
    tag_priority.iter().find_map(|key| {
        let value = raw_attributes.get(key)?.trim();
        match value {
            "" | "no" | "false" => None,
            "yes" | "true" => Some(key.clone()),
            _ => Some(format!("{key}:{value}")),
        }
    })
}

/// Maps feature tags onto the category ledger.
#[derive(Debug, Clone, Default)]
pub struct CategoryPolicy {
    recognized: Option<BTreeSet<String>>,
}

impl CategoryPolicy {
    pub fn new(recognized: Option<BTreeSet<String>>) -> Self {
        Self { recognized }
    }

    /// Missing, blank or unrecognized tags resolve to [`UNCLASSIFIED`].
    pub fn resolve(&self, category: Option<&str>) -> String {
        let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) else {
            return UNCLASSIFIED.to_string();
        };
        match &self.recognized {
            Some(known) if !known.contains(category) => UNCLASSIFIED.to_string(),
            _ => category.to_string(),
        }
    }
}
