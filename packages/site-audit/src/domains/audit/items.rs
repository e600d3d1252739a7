//! Item pagination and conversion.
//!
//! [`ItemPager`] is a lazy, forward-only walk over a list's item pages.
//! [`parse_item`] converts one raw item and pulls its sensitivity label out
//! of the same payload.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::client::{ItemQuery, SharePointClient};
use super::error::CollectionError;
use super::models::{Item, ItemKind, SensitivityLabel};

pub struct ItemPager<'a> {
    client: &'a dyn SharePointClient,
    query: ItemQuery,
    next_link: Option<String>,
    exhausted: bool,
    pages_fetched: usize,
}

impl<'a> ItemPager<'a> {
    pub fn new(client: &'a dyn SharePointClient, query: ItemQuery) -> Self {
        Self {
            client,
            query,
            next_link: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the service reports no more.
    ///
    /// Checks cancellation before every fetch.
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Value>>, CollectionError> {
        if self.exhausted {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let page = self
            .client
            .fetch_item_page(cancel, &self.query, self.next_link.as_deref())
            .await
            .map_err(|e| {
                CollectionError::from_call(
                    cancel,
                    "item pagination",
                    format!("list {} page {}", self.query.list_id, self.pages_fetched + 1),
                    e,
                )
            })?;
        self.pages_fetched += 1;

        match page.next_link {
            Some(next) if self.next_link.as_deref() == Some(next.as_str()) => {
                // A repeated link would loop forever.
                warn!(list_id = %self.query.list_id, next_link = %next, "Item pagination returned the same next link twice, stopping");
                self.exhausted = true;
            }
            Some(next) => self.next_link = Some(next),
            None => self.exhausted = true,
        }

        Ok(Some(page.items))
    }
}

/// Item plus the label extracted from the same payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub item: Item,
    pub sensitivity_label: Option<SensitivityLabel>,
}

#[derive(Debug, Deserialize)]
struct RawListItem {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "GUID", default)]
    guid: Option<Uuid>,
    #[serde(rename = "UniqueId", default)]
    unique_id: Option<Uuid>,
    #[serde(rename = "FileSystemObjectType", default)]
    file_system_object_type: Option<i64>,
    #[serde(rename = "FileRef", default)]
    file_ref: Option<String>,
    #[serde(rename = "FileLeafRef", default)]
    file_leaf_ref: Option<String>,
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "_IpLabelId", default)]
    label_id: Option<String>,
    #[serde(rename = "_DisplayName", default)]
    label_display_name: Option<String>,
}

/// Convert a raw list-item payload.
///
/// `has_unique_permissions` starts false; the pipeline asks the service.
pub fn parse_item(list_id: Uuid, raw: &Value) -> anyhow::Result<ParsedItem> {
    let raw: RawListItem = serde_json::from_value(raw.clone())
        .with_context(|| format!("Malformed item in list {}", list_id))?;

    let kind = raw
        .file_system_object_type
        .map(ItemKind::from_discriminant)
        .unwrap_or(ItemKind::ListItem);

    let name = raw
        .file_leaf_ref
        .filter(|s| !s.is_empty())
        .or(raw.title.filter(|s| !s.is_empty()))
        .unwrap_or_else(|| format!("Item {}", raw.id));

    let sensitivity_label = raw
        .label_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| SensitivityLabel {
            id,
            display_name: raw.label_display_name.filter(|s| !s.is_empty()),
        });

    Ok(ParsedItem {
        item: Item {
            list_id,
            id: raw.id,
            list_item_guid: raw.guid,
            unique_id: raw.unique_id,
            kind,
            name,
            server_relative_url: raw.file_ref,
            has_unique_permissions: false,
        },
        sensitivity_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_file_with_label() {
        let list_id = Uuid::new_v4();
        let unique = Uuid::new_v4();
        let raw = json!({
            "Id": 12,
            "GUID": Uuid::new_v4().to_string(),
            "UniqueId": unique.to_string(),
            "FileSystemObjectType": 0,
            "FileRef": "/sites/hr/Shared Documents/salaries.xlsx",
            "FileLeafRef": "salaries.xlsx",
            "_IpLabelId": "b7a3c0de-0000-4000-8000-000000000001",
            "_DisplayName": "Confidential"
        });

        let parsed = parse_item(list_id, &raw).unwrap();

        assert_eq!(parsed.item.kind, ItemKind::File);
        assert_eq!(parsed.item.name, "salaries.xlsx");
        assert_eq!(parsed.item.unique_id, Some(unique));
        assert!(!parsed.item.has_unique_permissions);
        let label = parsed.sensitivity_label.unwrap();
        assert_eq!(label.display_name.as_deref(), Some("Confidential"));
    }

    #[test]
    fn folder_without_label() {
        let raw = json!({"Id": 3, "FileSystemObjectType": 1, "FileLeafRef": "Contracts"});
        let parsed = parse_item(Uuid::nil(), &raw).unwrap();

        assert_eq!(parsed.item.kind, ItemKind::Folder);
        assert!(parsed.sensitivity_label.is_none());
    }

    #[test]
    fn plain_list_item_falls_back_to_title() {
        let raw = json!({"Id": 9, "Title": "Quarterly review", "_IpLabelId": ""});
        let parsed = parse_item(Uuid::nil(), &raw).unwrap();

        assert_eq!(parsed.item.kind, ItemKind::ListItem);
        assert_eq!(parsed.item.name, "Quarterly review");
        assert!(parsed.sensitivity_label.is_none());
    }

    #[test]
    fn missing_id_is_an_error() {
        let raw = json!({"Title": "orphan"});
        assert!(parse_item(Uuid::nil(), &raw).is_err());
    }
}
