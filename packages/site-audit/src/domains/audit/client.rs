use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::models::{
    Item, List, PermissionTarget, RemoteRoleAssignment, RoleDefinition, SharingInfo, Web,
};

/// Fields requested for every item page. `_IpLabelId`/`_DisplayName` carry
/// the sensitivity label so a single parse covers both.
pub const ITEM_SELECT_FIELDS: &[&str] = &[
    "Id",
    "GUID",
    "UniqueId",
    "FileSystemObjectType",
    "FileRef",
    "FileLeafRef",
    "Title",
    "_IpLabelId",
    "_DisplayName",
];

/// Query describing one list's item pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    pub list_id: Uuid,
    /// First-page URL; subsequent pages follow the service's next link.
    pub url: String,
    pub page_size: usize,
}

/// One page of raw items plus the link to the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
}

// ============================================================================
// REMOTE SERVICE: everything the pipeline asks of the content service
// ============================================================================

/// Remote content-service capabilities used by the audit pipeline.
///
/// Every call takes the job's cancellation token first. Implementations are
/// expected to abort in-flight requests once it fires.
#[async_trait]
pub trait SharePointClient: Send + Sync {
    async fn get_web(&self, cancel: &CancellationToken, site_url: &str) -> anyhow::Result<Web>;

    async fn get_role_definitions(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
    ) -> anyhow::Result<Vec<RoleDefinition>>;

    async fn get_role_assignments(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        target: &PermissionTarget,
    ) -> anyhow::Result<Vec<RemoteRoleAssignment>>;

    async fn get_lists(&self, cancel: &CancellationToken, site_url: &str)
        -> anyhow::Result<Vec<List>>;

    /// Whether the target breaks inheritance.
    async fn has_unique_permissions(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        target: &PermissionTarget,
    ) -> anyhow::Result<bool>;

    /// Build the pagination query for a list's items.
    fn item_query(&self, site_url: &str, list: &List, page_size: usize) -> ItemQuery {
        ItemQuery {
            list_id: list.id,
            url: format!(
                "{}/_api/web/lists(guid'{}')/items?$select={}&$top={}",
                site_url.trim_end_matches('/'),
                list.id,
                ITEM_SELECT_FIELDS.join(","),
                page_size
            ),
            page_size,
        }
    }

    /// Fetch one page. `next_link` is `None` for the first page.
    async fn fetch_item_page(
        &self,
        cancel: &CancellationToken,
        query: &ItemQuery,
        next_link: Option<&str>,
    ) -> anyhow::Result<ItemPage>;

    async fn get_file_by_unique_id(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        unique_id: Uuid,
    ) -> anyhow::Result<Item>;

    async fn get_folder_by_unique_id(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        unique_id: Uuid,
    ) -> anyhow::Result<Item>;

    /// Sharing links, members and governance data for one item.
    async fn get_sharing_info(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        item: &Item,
    ) -> anyhow::Result<SharingInfo>;

    /// Whether the list is excluded from normal browsing.
    fn is_hidden_list(&self, list: &List) -> bool {
        list.hidden
    }
}
