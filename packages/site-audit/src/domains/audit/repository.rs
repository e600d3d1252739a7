use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    AuditScope, Item, List, Principal, RecipientLimits, RoleAssignment, RoleDefinition,
    SensitivityLabel, SharingAbilities, SharingLink, Site, Web,
};

/// Persistence for discovered facts.
///
/// Every write is scoped by site and audit run. Runs are additive: nothing
/// here deletes facts from an earlier run.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    // Site structure
    async fn save_site(&self, scope: &AuditScope, site: &Site) -> anyhow::Result<()>;
    async fn save_web(&self, scope: &AuditScope, web: &Web) -> anyhow::Result<()>;
    async fn save_role_definitions(
        &self,
        scope: &AuditScope,
        definitions: &[RoleDefinition],
    ) -> anyhow::Result<()>;
    async fn save_list(&self, scope: &AuditScope, list: &List) -> anyhow::Result<()>;
    async fn save_item(&self, scope: &AuditScope, item: &Item) -> anyhow::Result<()>;

    // Permissions
    async fn save_principal(&self, scope: &AuditScope, principal: &Principal)
        -> anyhow::Result<()>;
    async fn save_role_assignment(
        &self,
        scope: &AuditScope,
        assignment: &RoleAssignment,
    ) -> anyhow::Result<()>;
    async fn list_principals(&self, scope: &AuditScope) -> anyhow::Result<Vec<Principal>>;

    // Item lookups used to avoid duplicate rows
    async fn find_item_by_unique_id(
        &self,
        scope: &AuditScope,
        unique_id: Uuid,
    ) -> anyhow::Result<Option<Item>>;
    async fn find_item_by_list_item_guid(
        &self,
        scope: &AuditScope,
        list_item_guid: Uuid,
    ) -> anyhow::Result<Option<Item>>;
    async fn find_item_by_list_and_id(
        &self,
        scope: &AuditScope,
        list_id: Uuid,
        item_id: i64,
    ) -> anyhow::Result<Option<Item>>;

    // Sharing facets
    async fn save_sharing_link(
        &self,
        scope: &AuditScope,
        item: &Item,
        link: &SharingLink,
    ) -> anyhow::Result<()>;
    async fn save_sharing_abilities(
        &self,
        scope: &AuditScope,
        item: &Item,
        abilities: &SharingAbilities,
    ) -> anyhow::Result<()>;
    async fn save_recipient_limits(
        &self,
        scope: &AuditScope,
        item: &Item,
        limits: &RecipientLimits,
    ) -> anyhow::Result<()>;
    async fn save_sensitivity_label(
        &self,
        scope: &AuditScope,
        item: &Item,
        label: &SensitivityLabel,
    ) -> anyhow::Result<()>;
}
