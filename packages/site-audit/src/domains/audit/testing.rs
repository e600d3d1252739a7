//! Audit testing utilities.
//!
//! [`InMemoryAuditRepository`] keeps every fact in memory, keyed by scope.
//! [`FakeSharePointClient`] serves canned site content, records every call
//! and can be told to fail, stall or fire a cancellation token.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::client::{ItemPage, ItemQuery, SharePointClient};
use super::models::{
    AuditScope, Item, List, PermissionTarget, Principal, RecipientLimits, RemoteRoleAssignment,
    RoleAssignment, RoleDefinition, SensitivityLabel, SharingAbilities, SharingInfo, SharingLink,
    Site, Web,
};
use super::repository::AuditRepository;

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// InMemoryAuditRepository
// ============================================================================

#[derive(Default)]
pub struct InMemoryAuditRepository {
    sites: RwLock<Vec<(AuditScope, Site)>>,
    webs: RwLock<Vec<(AuditScope, Web)>>,
    role_definitions: RwLock<Vec<(AuditScope, RoleDefinition)>>,
    lists: RwLock<Vec<(AuditScope, List)>>,
    items: RwLock<Vec<(AuditScope, Item)>>,
    principals: RwLock<Vec<(AuditScope, Principal)>>,
    role_assignments: RwLock<Vec<(AuditScope, RoleAssignment)>>,
    sharing_links: RwLock<Vec<(AuditScope, String, SharingLink)>>,
    sharing_abilities: RwLock<Vec<(AuditScope, String, SharingAbilities)>>,
    recipient_limits: RwLock<Vec<(AuditScope, String, RecipientLimits)>>,
    sensitivity_labels: RwLock<Vec<(AuditScope, String, SensitivityLabel)>>,

    principal_saves: AtomicUsize,
    item_saves: AtomicUsize,

    failing_principals: RwLock<HashSet<i64>>,
    failing_lists: RwLock<HashSet<Uuid>>,
    fail_sharing_links: RwLock<bool>,
    fail_labels: RwLock<bool>,
    cancel_on_principal_save: RwLock<Option<CancellationToken>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // Failure injection

    pub fn fail_principal(&self, principal_id: i64) {
        write(&self.failing_principals).insert(principal_id);
    }

    pub fn fail_list(&self, list_id: Uuid) {
        write(&self.failing_lists).insert(list_id);
    }

    pub fn fail_sharing_links(&self) {
        *write(&self.fail_sharing_links) = true;
    }

    pub fn fail_sensitivity_labels(&self) {
        *write(&self.fail_labels) = true;
    }

    /// Fire `token` and fail on the next principal save.
    pub fn cancel_on_principal_save(&self, token: CancellationToken) {
        *write(&self.cancel_on_principal_save) = Some(token);
    }

    /// Seed a principal without counting it as a save.
    pub fn insert_principal(&self, scope: &AuditScope, principal: Principal) {
        write(&self.principals).push((scope.clone(), principal));
    }

    /// Seed an item without counting it as a save.
    pub fn insert_item(&self, scope: &AuditScope, item: Item) {
        write(&self.items).push((scope.clone(), item));
    }

    // Inspection

    pub fn principal_save_count(&self) -> usize {
        self.principal_saves.load(Ordering::SeqCst)
    }

    pub fn item_save_count(&self) -> usize {
        self.item_saves.load(Ordering::SeqCst)
    }

    pub fn sites(&self) -> Vec<(AuditScope, Site)> {
        read(&self.sites).clone()
    }

    pub fn webs(&self) -> Vec<(AuditScope, Web)> {
        read(&self.webs).clone()
    }

    pub fn role_definitions(&self) -> Vec<(AuditScope, RoleDefinition)> {
        read(&self.role_definitions).clone()
    }

    pub fn lists(&self) -> Vec<(AuditScope, List)> {
        read(&self.lists).clone()
    }

    pub fn items(&self) -> Vec<(AuditScope, Item)> {
        read(&self.items).clone()
    }

    pub fn principals(&self) -> Vec<(AuditScope, Principal)> {
        read(&self.principals).clone()
    }

    pub fn role_assignments(&self) -> Vec<(AuditScope, RoleAssignment)> {
        read(&self.role_assignments).clone()
    }

    /// `(scope, item object key, link)`
    pub fn sharing_links(&self) -> Vec<(AuditScope, String, SharingLink)> {
        read(&self.sharing_links).clone()
    }

    pub fn sharing_abilities(&self) -> Vec<(AuditScope, String, SharingAbilities)> {
        read(&self.sharing_abilities).clone()
    }

    pub fn recipient_limits(&self) -> Vec<(AuditScope, String, RecipientLimits)> {
        read(&self.recipient_limits).clone()
    }

    pub fn sensitivity_labels(&self) -> Vec<(AuditScope, String, SensitivityLabel)> {
        read(&self.sensitivity_labels).clone()
    }

    fn find_item(&self, scope: &AuditScope, matches: impl Fn(&Item) -> bool) -> Option<Item> {
        read(&self.items)
            .iter()
            .find(|(s, item)| s == scope && matches(item))
            .map(|(_, item)| item.clone())
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn save_site(&self, scope: &AuditScope, site: &Site) -> Result<()> {
        let mut sites = write(&self.sites);
        sites.retain(|(s, existing)| !(s == scope && existing.url == site.url));
        sites.push((scope.clone(), site.clone()));
        Ok(())
    }

    async fn save_web(&self, scope: &AuditScope, web: &Web) -> Result<()> {
        write(&self.webs).push((scope.clone(), web.clone()));
        Ok(())
    }

    async fn save_role_definitions(
        &self,
        scope: &AuditScope,
        definitions: &[RoleDefinition],
    ) -> Result<()> {
        let mut stored = write(&self.role_definitions);
        stored.extend(definitions.iter().map(|d| (scope.clone(), d.clone())));
        Ok(())
    }

    async fn save_list(&self, scope: &AuditScope, list: &List) -> Result<()> {
        if read(&self.failing_lists).contains(&list.id) {
            bail!("list {} rejected", list.id);
        }
        write(&self.lists).push((scope.clone(), list.clone()));
        Ok(())
    }

    async fn save_item(&self, scope: &AuditScope, item: &Item) -> Result<()> {
        let mut items = write(&self.items);
        items.retain(|(s, existing)| {
            !(s == scope && existing.list_id == item.list_id && existing.id == item.id)
        });
        items.push((scope.clone(), item.clone()));
        self.item_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_principal(&self, scope: &AuditScope, principal: &Principal) -> Result<()> {
        if let Some(token) = read(&self.cancel_on_principal_save).as_ref() {
            token.cancel();
            bail!("connection closed");
        }
        if read(&self.failing_principals).contains(&principal.id) {
            bail!("principal {} rejected", principal.id);
        }

        let mut principals = write(&self.principals);
        principals.retain(|(s, existing)| !(s == scope && existing.id == principal.id));
        principals.push((scope.clone(), principal.clone()));
        self.principal_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_role_assignment(
        &self,
        scope: &AuditScope,
        assignment: &RoleAssignment,
    ) -> Result<()> {
        write(&self.role_assignments).push((scope.clone(), assignment.clone()));
        Ok(())
    }

    async fn list_principals(&self, scope: &AuditScope) -> Result<Vec<Principal>> {
        Ok(read(&self.principals)
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn find_item_by_unique_id(
        &self,
        scope: &AuditScope,
        unique_id: Uuid,
    ) -> Result<Option<Item>> {
        Ok(self.find_item(scope, |i| i.unique_id == Some(unique_id)))
    }

    async fn find_item_by_list_item_guid(
        &self,
        scope: &AuditScope,
        list_item_guid: Uuid,
    ) -> Result<Option<Item>> {
        Ok(self.find_item(scope, |i| i.list_item_guid == Some(list_item_guid)))
    }

    async fn find_item_by_list_and_id(
        &self,
        scope: &AuditScope,
        list_id: Uuid,
        item_id: i64,
    ) -> Result<Option<Item>> {
        Ok(self.find_item(scope, |i| i.list_id == list_id && i.id == item_id))
    }

    async fn save_sharing_link(
        &self,
        scope: &AuditScope,
        item: &Item,
        link: &SharingLink,
    ) -> Result<()> {
        if *read(&self.fail_sharing_links) {
            bail!("sharing link table unavailable");
        }
        write(&self.sharing_links).push((scope.clone(), item.object_key(), link.clone()));
        Ok(())
    }

    async fn save_sharing_abilities(
        &self,
        scope: &AuditScope,
        item: &Item,
        abilities: &SharingAbilities,
    ) -> Result<()> {
        write(&self.sharing_abilities).push((scope.clone(), item.object_key(), *abilities));
        Ok(())
    }

    async fn save_recipient_limits(
        &self,
        scope: &AuditScope,
        item: &Item,
        limits: &RecipientLimits,
    ) -> Result<()> {
        write(&self.recipient_limits).push((scope.clone(), item.object_key(), *limits));
        Ok(())
    }

    async fn save_sensitivity_label(
        &self,
        scope: &AuditScope,
        item: &Item,
        label: &SensitivityLabel,
    ) -> Result<()> {
        if *read(&self.fail_labels) {
            bail!("label table unavailable");
        }
        write(&self.sensitivity_labels).push((scope.clone(), item.object_key(), label.clone()));
        Ok(())
    }
}

// ============================================================================
// FakeSharePointClient
// ============================================================================

const NEXT_LINK_PREFIX: &str = "fake://next";

/// Canned content service.
///
/// Item pages are served in order; the next link encodes the list and page
/// index. Every call fails once the passed token is cancelled, the way an
/// aborted HTTP request would.
pub struct FakeSharePointClient {
    web: Web,
    role_definitions: Vec<RoleDefinition>,
    role_assignments: HashMap<PermissionTarget, Vec<RemoteRoleAssignment>>,
    lists: Vec<List>,
    pages: HashMap<Uuid, Vec<Vec<Value>>>,
    looping_lists: HashSet<Uuid>,
    unique_permissions: HashSet<PermissionTarget>,
    files: HashMap<Uuid, Item>,
    folders: HashMap<Uuid, Item>,
    sharing: HashMap<Uuid, SharingInfo>,
    failing_calls: HashSet<&'static str>,
    failing_targets: HashSet<PermissionTarget>,
    failing_pages: HashSet<(Uuid, usize)>,
    cancel_on: Option<(&'static str, CancellationToken)>,
    page_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeSharePointClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSharePointClient {
    pub fn new() -> Self {
        Self {
            web: Web {
                id: Uuid::new_v4(),
                title: "Team Site".to_string(),
                url: "https://contoso.sharepoint.com/sites/team".to_string(),
                description: None,
            },
            role_definitions: vec![
                RoleDefinition {
                    id: 1073741829,
                    name: "Full Control".to_string(),
                    description: Some("Has full control.".to_string()),
                    hidden: false,
                },
                RoleDefinition {
                    id: 1073741826,
                    name: "Read".to_string(),
                    description: Some("Can view pages and list items.".to_string()),
                    hidden: false,
                },
            ],
            role_assignments: HashMap::new(),
            lists: Vec::new(),
            pages: HashMap::new(),
            looping_lists: HashSet::new(),
            unique_permissions: HashSet::new(),
            files: HashMap::new(),
            folders: HashMap::new(),
            sharing: HashMap::new(),
            failing_calls: HashSet::new(),
            failing_targets: HashSet::new(),
            failing_pages: HashSet::new(),
            cancel_on: None,
            page_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    // Content

    pub fn with_web(mut self, web: Web) -> Self {
        self.web = web;
        self
    }

    pub fn web(&self) -> &Web {
        &self.web
    }

    pub fn with_role_assignments(
        mut self,
        target: PermissionTarget,
        assignments: Vec<RemoteRoleAssignment>,
    ) -> Self {
        self.role_assignments.insert(target, assignments);
        self
    }

    pub fn with_list(mut self, list: List) -> Self {
        self.lists.push(list);
        self
    }

    /// Raw item pages for a list, served in order.
    pub fn with_item_pages(mut self, list_id: Uuid, pages: Vec<Vec<Value>>) -> Self {
        self.pages.insert(list_id, pages);
        self
    }

    /// Every page of this list repeats the first page's next link.
    pub fn with_looping_next_link(mut self, list_id: Uuid) -> Self {
        self.looping_lists.insert(list_id);
        self
    }

    pub fn with_unique_permissions(mut self, target: PermissionTarget) -> Self {
        self.unique_permissions.insert(target);
        self
    }

    pub fn with_file(mut self, unique_id: Uuid, item: Item) -> Self {
        self.files.insert(unique_id, item);
        self
    }

    pub fn with_folder(mut self, unique_id: Uuid, item: Item) -> Self {
        self.folders.insert(unique_id, item);
        self
    }

    /// Sharing info keyed by the item's content id.
    pub fn with_sharing_info(mut self, unique_id: Uuid, info: SharingInfo) -> Self {
        self.sharing.insert(unique_id, info);
        self
    }

    // Failure injection

    /// Fail every call with this name (e.g. `"get_web"`).
    pub fn failing(mut self, call: &'static str) -> Self {
        self.failing_calls.insert(call);
        self
    }

    pub fn failing_role_assignments(mut self, target: PermissionTarget) -> Self {
        self.failing_targets.insert(target);
        self
    }

    /// Fail fetching page `index` (zero-based) of the list.
    pub fn failing_page(mut self, list_id: Uuid, index: usize) -> Self {
        self.failing_pages.insert((list_id, index));
        self
    }

    /// Fire `token` when `call` is made, then serve the call normally.
    pub fn cancel_on(mut self, call: &'static str, token: CancellationToken) -> Self {
        self.cancel_on = Some((call, token));
        self
    }

    /// Sleep before serving each item page; wakes early on cancellation.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    // Inspection

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    fn enter(&self, cancel: &CancellationToken, call: &'static str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.to_string());

        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == call {
                token.cancel();
                return Ok(());
            }
        }
        if cancel.is_cancelled() {
            bail!("{} aborted: request cancelled", call);
        }
        if self.failing_calls.contains(call) {
            bail!("{} failed: 503 Service Unavailable", call);
        }
        Ok(())
    }
}

fn page_link(list_id: Uuid, index: usize) -> String {
    format!("{}/{}/{}", NEXT_LINK_PREFIX, list_id, index)
}

fn page_index(link: Option<&str>) -> Result<usize> {
    match link {
        None => Ok(0),
        Some(link) => link
            .rsplit('/')
            .next()
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| anyhow!("unrecognized next link {}", link)),
    }
}

#[async_trait]
impl SharePointClient for FakeSharePointClient {
    async fn get_web(&self, cancel: &CancellationToken, _site_url: &str) -> Result<Web> {
        self.enter(cancel, "get_web")?;
        Ok(self.web.clone())
    }

    async fn get_role_definitions(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
    ) -> Result<Vec<RoleDefinition>> {
        self.enter(cancel, "get_role_definitions")?;
        Ok(self.role_definitions.clone())
    }

    async fn get_role_assignments(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
        target: &PermissionTarget,
    ) -> Result<Vec<RemoteRoleAssignment>> {
        self.enter(cancel, "get_role_assignments")?;
        if self.failing_targets.contains(target) {
            bail!("role assignments for {} unavailable", target);
        }
        Ok(self.role_assignments.get(target).cloned().unwrap_or_default())
    }

    async fn get_lists(&self, cancel: &CancellationToken, _site_url: &str) -> Result<Vec<List>> {
        self.enter(cancel, "get_lists")?;
        Ok(self.lists.clone())
    }

    async fn has_unique_permissions(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
        target: &PermissionTarget,
    ) -> Result<bool> {
        self.enter(cancel, "has_unique_permissions")?;
        Ok(self.unique_permissions.contains(target))
    }

    async fn fetch_item_page(
        &self,
        cancel: &CancellationToken,
        query: &ItemQuery,
        next: Option<&str>,
    ) -> Result<ItemPage> {
        self.enter(cancel, "fetch_item_page")?;

        if let Some(delay) = self.page_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => bail!("fetch_item_page aborted: request cancelled"),
            }
        }

        let index = page_index(next)?;
        if self.failing_pages.contains(&(query.list_id, index)) {
            bail!("page {} of list {} timed out", index, query.list_id);
        }

        let pages = self.pages.get(&query.list_id);
        let items = pages
            .and_then(|p| p.get(index))
            .cloned()
            .unwrap_or_default();
        let page_count = pages.map(Vec::len).unwrap_or(0);

        let next_link = if self.looping_lists.contains(&query.list_id) {
            Some(page_link(query.list_id, 1))
        } else if index + 1 < page_count {
            Some(page_link(query.list_id, index + 1))
        } else {
            None
        };

        Ok(ItemPage { items, next_link })
    }

    async fn get_file_by_unique_id(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
        unique_id: Uuid,
    ) -> Result<Item> {
        self.enter(cancel, "get_file_by_unique_id")?;
        self.files
            .get(&unique_id)
            .cloned()
            .ok_or_else(|| anyhow!("file {} not found", unique_id))
    }

    async fn get_folder_by_unique_id(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
        unique_id: Uuid,
    ) -> Result<Item> {
        self.enter(cancel, "get_folder_by_unique_id")?;
        self.folders
            .get(&unique_id)
            .cloned()
            .ok_or_else(|| anyhow!("folder {} not found", unique_id))
    }

    async fn get_sharing_info(
        &self,
        cancel: &CancellationToken,
        _site_url: &str,
        item: &Item,
    ) -> Result<SharingInfo> {
        self.enter(cancel, "get_sharing_info")?;
        let unique_id = item
            .unique_id
            .ok_or_else(|| anyhow!("item {} has no content id", item.object_key()))?;
        Ok(self.sharing.get(&unique_id).cloned().unwrap_or_default())
    }
}
