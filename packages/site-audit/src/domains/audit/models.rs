//! Facts discovered while walking a site.
//!
//! These are the shapes handed to the [`AuditRepository`](super::AuditRepository).
//! Everything is scoped by site and audit run through [`AuditScope`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one pipeline execution against one site.
pub type AuditRunId = i64;

/// Site and run every persisted fact is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditScope {
    pub site_url: String,
    pub audit_run_id: AuditRunId,
}

impl AuditScope {
    pub fn new(site_url: impl Into<String>, audit_run_id: AuditRunId) -> Self {
        Self {
            site_url: site_url.into(),
            audit_run_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub url: String,
    pub title: Option<String>,
}

/// Root web of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Web {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: Uuid,
    pub title: String,
    pub hidden: bool,
    pub base_template: i32,
    pub item_count: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
    ListItem,
}

impl ItemKind {
    /// Classify by the remote `FileSystemObjectType` discriminant.
    pub fn from_discriminant(value: i64) -> Self {
        match value {
            0 => ItemKind::File,
            1 => ItemKind::Folder,
            _ => ItemKind::ListItem,
        }
    }
}

/// A list item, file or folder.
///
/// `unique_id` identifies the content object itself; `list_item_guid`
/// identifies the row in its containing list. Sharing links reference the
/// former, list scanning sees both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub list_id: Uuid,
    pub id: i64,
    pub list_item_guid: Option<Uuid>,
    pub unique_id: Option<Uuid>,
    pub kind: ItemKind,
    pub name: String,
    pub server_relative_url: Option<String>,
    pub has_unique_permissions: bool,
}

impl Item {
    pub fn object_key(&self) -> String {
        item_object_key(self.list_id, self.id)
    }
}

pub fn item_object_key(list_id: Uuid, item_id: i64) -> String {
    format!("{}:{}", list_id, item_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Web,
    List,
    Item,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Web => "web",
            ObjectType::List => "list",
            ObjectType::Item => "item",
        }
    }
}

/// Object whose role assignments are being collected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionTarget {
    Web { web_id: Uuid },
    List { list_id: Uuid },
    Item { list_id: Uuid, item_id: i64 },
}

impl PermissionTarget {
    pub fn object_type(&self) -> ObjectType {
        match self {
            PermissionTarget::Web { .. } => ObjectType::Web,
            PermissionTarget::List { .. } => ObjectType::List,
            PermissionTarget::Item { .. } => ObjectType::Item,
        }
    }

    pub fn object_key(&self) -> String {
        match self {
            PermissionTarget::Web { web_id } => web_id.to_string(),
            PermissionTarget::List { list_id } => list_id.to_string(),
            PermissionTarget::Item { list_id, item_id } => item_object_key(*list_id, *item_id),
        }
    }
}

impl std::fmt::Display for PermissionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.object_type().as_str(), self.object_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    DistributionList,
    SecurityGroup,
    SharePointGroup,
    SharingLink,
}

/// User, group or sharing-link pseudo-identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub kind: PrincipalKind,
    pub title: String,
    pub login_name: String,
    pub email: Option<String>,
}

/// Permission level from the web's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub hidden: bool,
}

/// Principal × role × object, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub object_type: ObjectType,
    pub object_key: String,
    pub principal_id: i64,
    pub role_definition_id: i64,
    pub role_name: String,
}

/// Role assignment as returned by the remote service: one principal with
/// every role it holds on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRoleAssignment {
    pub principal: Principal,
    pub role_definitions: Vec<RoleDefinition>,
}

/// Classification encoded in a sharing-link principal name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharingLinkKind {
    OrganizationView,
    OrganizationEdit,
    AnonymousView,
    AnonymousEdit,
    Flexible,
    Other(String),
}

impl SharingLinkKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "OrganizationView" => SharingLinkKind::OrganizationView,
            "OrganizationEdit" => SharingLinkKind::OrganizationEdit,
            "AnonymousView" => SharingLinkKind::AnonymousView,
            "AnonymousEdit" => SharingLinkKind::AnonymousEdit,
            "Flexible" => SharingLinkKind::Flexible,
            other => SharingLinkKind::Other(other.to_string()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(
            self,
            SharingLinkKind::AnonymousView | SharingLinkKind::AnonymousEdit
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingMember {
    pub principal_id: Option<i64>,
    pub login_name: String,
    pub email: Option<String>,
}

/// An active sharing link on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingLink {
    pub share_id: Uuid,
    pub kind: SharingLinkKind,
    pub url: Option<String>,
    pub is_active: bool,
    pub expiration: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub members: Vec<SharingMember>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAbility {
    pub can_view: bool,
    pub can_edit: bool,
}

/// Which sharing mechanisms the current policy allows on an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingAbilities {
    pub anyone_link: LinkAbility,
    pub organization_link: LinkAbility,
    pub people_link: LinkAbility,
    pub direct_sharing: LinkAbility,
    pub can_stop_sharing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientLimits {
    pub max_recipients: Option<i64>,
    pub max_external_recipients: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityLabel {
    pub id: String,
    pub display_name: Option<String>,
}

/// Everything the remote service reports about sharing on one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingInfo {
    pub links: Vec<SharingLink>,
    pub abilities: Option<SharingAbilities>,
    pub recipient_limits: Option<RecipientLimits>,
    pub sensitivity_label: Option<SensitivityLabel>,
}
