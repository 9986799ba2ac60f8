use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Response body of the `/manga/tag` endpoint. Only `data` is read.
#[derive(Debug, Clone, Deserialize)]
pub struct TagTaxonomy {
    pub data: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    /// Opaque; written back to `ids` exactly as received.
    pub id: Value,
    pub attributes: TagAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagAttributes {
    pub name: HashMap<String, String>,
    pub group: String,
}

impl Tag {
    pub fn display_name(&self, locale: &str) -> SyncResult<&str> {
        self.attributes
            .name
            .get(locale)
            .map(String::as_str)
            .ok_or_else(|| {
                SyncError::schema(format!("tag {} has no '{}' name", self.id, locale))
            })
    }
}

/// An option entry ready to be written into a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOption {
    pub name: String,
    pub id: Value,
}

/// Tags of `group`, sorted by lowercased display name. Ties keep upstream order.
pub fn options_for_group(tags: &[Tag], group: &str, locale: &str) -> SyncResult<Vec<TagOption>> {
    let mut options = tags
        .iter()
        .filter(|tag| tag.attributes.group == group)
        .map(|tag| {
            Ok(TagOption {
                name: tag.display_name(locale)?.to_string(),
                id: tag.id.clone(),
            })
        })
        .collect::<SyncResult<Vec<_>>>()?;
    options.sort_by_cached_key(|option| option.name.to_lowercase());
    Ok(options)
}

impl TagTaxonomy {
    pub fn from_value(value: Value) -> SyncResult<Self> {
        serde_json::from_value(value).map_err(|e| SyncError::schema(format!("tag response: {}", e)))
    }
}

#[cfg(test)]
pub(crate) fn tag(id: &str, name: &str, group: &str) -> Tag {
    Tag {
        id: Value::String(id.to_string()),
        attributes: TagAttributes {
            name: HashMap::from([("en".to_string(), name.to_string())]),
            group: group.to_string(),
        },
    }
}
