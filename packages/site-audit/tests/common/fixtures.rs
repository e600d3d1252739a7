//! Test fixtures for building remote site content.

use serde_json::{json, Value};
use site_audit::domains::audit::{
    Item, ItemKind, List, Principal, PrincipalKind, RemoteRoleAssignment, RoleDefinition,
    SharingLink, SharingLinkKind,
};
use uuid::Uuid;

pub const SITE_URL: &str = "https://contoso.sharepoint.com/sites/hr";

pub fn list(title: &str) -> List {
    List {
        id: Uuid::new_v4(),
        title: title.to_string(),
        hidden: false,
        base_template: 101,
        item_count: 0,
        url: Some(format!("/sites/hr/{}", title)),
    }
}

pub fn hidden_list(title: &str) -> List {
    List {
        hidden: true,
        ..list(title)
    }
}

/// Raw file payload as returned by an item page.
pub fn raw_file(id: i64, name: &str, unique_id: Uuid) -> Value {
    json!({
        "Id": id,
        "GUID": Uuid::new_v4().to_string(),
        "UniqueId": unique_id.to_string(),
        "FileSystemObjectType": 0,
        "FileRef": format!("/sites/hr/Shared Documents/{}", name),
        "FileLeafRef": name,
    })
}

pub fn raw_labelled_file(id: i64, name: &str, label: &str) -> Value {
    let mut raw = raw_file(id, name, Uuid::new_v4());
    raw["_IpLabelId"] = json!(Uuid::new_v4().to_string());
    raw["_DisplayName"] = json!(label);
    raw
}

/// `count` files with ids starting at `first_id`.
pub fn raw_files(first_id: i64, count: usize) -> Vec<Value> {
    (0..count as i64)
        .map(|i| raw_file(first_id + i, &format!("doc-{}.docx", first_id + i), Uuid::new_v4()))
        .collect()
}

pub fn file_item(list_id: Uuid, id: i64, unique_id: Uuid) -> Item {
    Item {
        list_id,
        id,
        list_item_guid: Some(Uuid::new_v4()),
        unique_id: Some(unique_id),
        kind: ItemKind::File,
        name: format!("file-{}.xlsx", id),
        server_relative_url: Some(format!("/sites/hr/Shared Documents/file-{}.xlsx", id)),
        has_unique_permissions: true,
    }
}

pub fn user(id: i64) -> Principal {
    Principal {
        id,
        kind: PrincipalKind::User,
        title: format!("User {}", id),
        login_name: format!("i:0#.f|membership|user{}@contoso.com", id),
        email: Some(format!("user{}@contoso.com", id)),
    }
}

pub fn sharing_principal(id: i64, item: Uuid, kind: &str, share: Uuid) -> Principal {
    Principal {
        id,
        kind: PrincipalKind::SharingLink,
        title: format!("SharingLinks.{}.{}.{}", item, kind, share),
        login_name: format!("SharingLinks.{}.{}.{}", item, kind, share),
        email: None,
    }
}

pub fn read_role() -> RoleDefinition {
    RoleDefinition {
        id: 1073741826,
        name: "Read".to_string(),
        description: None,
        hidden: false,
    }
}

pub fn assignment(principal: Principal, roles: Vec<RoleDefinition>) -> RemoteRoleAssignment {
    RemoteRoleAssignment {
        principal,
        role_definitions: roles,
    }
}

pub fn active_link(share_id: Uuid, kind: SharingLinkKind) -> SharingLink {
    SharingLink {
        share_id,
        kind,
        url: Some(format!("https://contoso.sharepoint.com/:x:/s/hr/{}", share_id.simple())),
        is_active: true,
        expiration: None,
        created_by: Some("user1@contoso.com".to_string()),
        members: Vec::new(),
    }
}
