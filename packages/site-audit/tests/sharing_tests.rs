//! Integration tests for sharing-link reverse resolution.

mod common;

use std::sync::Arc;

use crate::common::{
    active_link, assignment, file_item, list, raw_file, read_role, sharing_principal, user,
    RecordingProgress, SITE_URL,
};
use site_audit::domains::audit::testing::{FakeSharePointClient, InMemoryAuditRepository};
use site_audit::domains::audit::{
    AuditCollector, AuditParameters, AuditScope, ItemKind, PermissionTarget, RecipientLimits,
    SensitivityLabel, SharingAbilities, SharingInfo, SharingLinkCollector, SharingLinkKind,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn scope() -> AuditScope {
    AuditScope::new(SITE_URL, 1)
}

fn collector(
    client: FakeSharePointClient,
) -> (SharingLinkCollector, Arc<FakeSharePointClient>, Arc<InMemoryAuditRepository>) {
    let client = Arc::new(client);
    let repo = Arc::new(InMemoryAuditRepository::new());
    (
        SharingLinkCollector::new(client.clone(), repo.clone()),
        client,
        repo,
    )
}

#[tokio::test]
async fn unresolvable_links_do_not_fail_the_run() {
    let list_id = Uuid::new_v4();
    let mut client = FakeSharePointClient::new();
    let mut principals = Vec::new();

    // Five links on five items; the last two items are gone.
    for i in 0..5 {
        let unique = Uuid::new_v4();
        let share = Uuid::new_v4();
        principals.push(sharing_principal(100 + i, unique, "OrganizationView", share));
        if i < 3 {
            client = client
                .with_file(unique, file_item(list_id, i + 1, unique))
                .with_sharing_info(
                    unique,
                    SharingInfo {
                        links: vec![active_link(share, SharingLinkKind::OrganizationView)],
                        ..Default::default()
                    },
                );
        }
    }
    let (collector, _client, repo) = collector(client);
    for principal in principals {
        repo.insert_principal(&scope(), principal);
    }

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert_eq!(summary.links_found, 5);
    assert_eq!(summary.links_resolved, 3);
    assert_eq!(summary.links_failed, 2);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(repo.sharing_links().len(), 3);
    assert_eq!(summary.items_created, 3);
}

#[tokio::test]
async fn links_on_one_item_fetch_sharing_info_once() {
    let unique = Uuid::new_v4();
    let (view, edit) = (Uuid::new_v4(), Uuid::new_v4());
    let client = FakeSharePointClient::new()
        .with_file(unique, file_item(Uuid::new_v4(), 4, unique))
        .with_sharing_info(
            unique,
            SharingInfo {
                links: vec![
                    active_link(view, SharingLinkKind::AnonymousView),
                    active_link(edit, SharingLinkKind::OrganizationEdit),
                ],
                ..Default::default()
            },
        );
    let (collector, client, repo) = collector(client);
    repo.insert_principal(&scope(), sharing_principal(20, unique, "AnonymousView", view));
    repo.insert_principal(&scope(), sharing_principal(21, unique, "OrganizationEdit", edit));

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert_eq!(summary.links_found, 2);
    assert_eq!(summary.links_resolved, 2);
    assert_eq!(client.call_count("get_sharing_info"), 1);
    assert_eq!(client.call_count("get_file_by_unique_id"), 1);
    assert_eq!(repo.sharing_links().len(), 2);
    assert!(repo
        .sharing_links()
        .iter()
        .any(|(_, _, link)| link.kind.is_anonymous()));
}

#[tokio::test]
async fn folders_resolve_after_file_lookup_fails() {
    let unique = Uuid::new_v4();
    let mut folder = file_item(Uuid::new_v4(), 9, unique);
    folder.kind = ItemKind::Folder;
    folder.unique_id = None;
    let client = FakeSharePointClient::new().with_folder(unique, folder);
    let (collector, client, repo) = collector(client);
    repo.insert_principal(
        &scope(),
        sharing_principal(30, unique, "Flexible", Uuid::new_v4()),
    );

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert_eq!(summary.links_resolved, 1);
    assert_eq!(client.call_count("get_folder_by_unique_id"), 1);
    let items = repo.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.kind, ItemKind::Folder);
    assert_eq!(items[0].1.unique_id, Some(unique));
}

#[tokio::test]
async fn ordinary_and_malformed_principals_are_ignored() {
    let (collector, client, repo) = collector(FakeSharePointClient::new());
    repo.insert_principal(&scope(), user(1));
    let mut broken = user(2);
    broken.login_name = "SharingLinks.not-a-guid.AnonymousView.nope".to_string();
    repo.insert_principal(&scope(), broken);

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert_eq!(summary.links_found, 0);
    assert_eq!(summary.unparseable, 1);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn link_save_failure_is_recorded_not_raised() {
    let unique = Uuid::new_v4();
    let share = Uuid::new_v4();
    let client = FakeSharePointClient::new()
        .with_file(unique, file_item(Uuid::new_v4(), 1, unique))
        .with_sharing_info(
            unique,
            SharingInfo {
                links: vec![active_link(share, SharingLinkKind::OrganizationView)],
                ..Default::default()
            },
        );
    let (collector, _client, repo) = collector(client);
    repo.insert_principal(&scope(), sharing_principal(40, unique, "OrganizationView", share));
    repo.fail_sharing_links();

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains(&share.to_string()));
}

#[tokio::test]
async fn governance_facets_are_saved_and_only_warn_on_failure() {
    let unique = Uuid::new_v4();
    let share = Uuid::new_v4();
    let info = SharingInfo {
        links: vec![active_link(share, SharingLinkKind::OrganizationEdit)],
        abilities: Some(SharingAbilities {
            can_stop_sharing: true,
            ..Default::default()
        }),
        recipient_limits: Some(RecipientLimits {
            max_recipients: Some(50),
            max_external_recipients: Some(5),
        }),
        sensitivity_label: Some(SensitivityLabel {
            id: Uuid::new_v4().to_string(),
            display_name: Some("Highly Confidential".to_string()),
        }),
    };
    let client = FakeSharePointClient::new()
        .with_file(unique, file_item(Uuid::new_v4(), 1, unique))
        .with_sharing_info(unique, info);
    let (collector, _client, repo) = collector(client);
    repo.insert_principal(&scope(), sharing_principal(50, unique, "OrganizationEdit", share));
    repo.fail_sensitivity_labels();

    let summary = collector
        .audit_site_sharing(&CancellationToken::new(), &scope())
        .await
        .unwrap();

    assert!(summary.errors.is_empty());
    assert_eq!(repo.sharing_abilities().len(), 1);
    assert_eq!(repo.recipient_limits()[0].2.max_recipients, Some(50));
    assert!(repo.sensitivity_labels().is_empty());
}

#[tokio::test]
async fn cancellation_propagates() {
    let unique = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let client = FakeSharePointClient::new()
        .with_file(unique, file_item(Uuid::new_v4(), 1, unique))
        .cancel_on("get_file_by_unique_id", cancel.clone());
    let (collector, _client, repo) = collector(client);
    repo.insert_principal(
        &scope(),
        sharing_principal(60, unique, "OrganizationView", Uuid::new_v4()),
    );

    let err = collector
        .audit_site_sharing(&cancel, &scope())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

// =============================================================================
// ensure_item_exists
// =============================================================================

#[tokio::test]
async fn ensure_item_matches_any_identity() {
    let (collector, _client, repo) = collector(FakeSharePointClient::new());
    let list_id = Uuid::new_v4();
    let stored = file_item(list_id, 7, Uuid::new_v4());
    repo.insert_item(&scope(), stored.clone());

    // Same content id
    let outcome = collector
        .ensure_item_exists(&scope(), stored.clone())
        .await
        .unwrap();
    assert!(!outcome.was_created());

    // Same list-item guid, content id unknown
    let mut by_guid = stored.clone();
    by_guid.unique_id = None;
    by_guid.id = 99;
    let outcome = collector.ensure_item_exists(&scope(), by_guid).await.unwrap();
    assert!(!outcome.was_created());
    assert_eq!(outcome.item().id, 7);

    // Same list and integer id only
    let mut by_id = stored.clone();
    by_id.unique_id = None;
    by_id.list_item_guid = None;
    let outcome = collector.ensure_item_exists(&scope(), by_id).await.unwrap();
    assert!(!outcome.was_created());

    assert_eq!(repo.item_save_count(), 0);
}

#[tokio::test]
async fn ensure_item_is_scoped_to_the_run() {
    let (collector, _client, repo) = collector(FakeSharePointClient::new());
    let item = file_item(Uuid::new_v4(), 7, Uuid::new_v4());
    repo.insert_item(&AuditScope::new(SITE_URL, 1), item.clone());

    let outcome = collector
        .ensure_item_exists(&AuditScope::new(SITE_URL, 2), item)
        .await
        .unwrap();

    assert!(outcome.was_created());
    assert_eq!(repo.item_save_count(), 1);
}

// =============================================================================
// Through the pipeline
// =============================================================================

#[tokio::test]
async fn scanned_item_is_not_duplicated_by_sharing() {
    let documents = list("Documents");
    let list_id = documents.id;
    let unique = Uuid::new_v4();
    let share = Uuid::new_v4();
    let item_target = PermissionTarget::Item { list_id, item_id: 1 };

    let client = Arc::new(
        FakeSharePointClient::new()
            .with_item_pages(list_id, vec![vec![raw_file(1, "salaries.xlsx", unique)]])
            .with_unique_permissions(item_target.clone())
            .with_role_assignments(
                item_target,
                vec![
                    assignment(user(3), vec![read_role()]),
                    assignment(
                        sharing_principal(70, unique, "AnonymousView", share),
                        vec![read_role()],
                    ),
                ],
            )
            // The file API reports a different list-item guid than the scan.
            .with_file(unique, file_item(list_id, 1, unique))
            .with_sharing_info(
                unique,
                SharingInfo {
                    links: vec![active_link(share, SharingLinkKind::AnonymousView)],
                    ..Default::default()
                },
            )
            .with_list(documents),
    );
    let repo = Arc::new(InMemoryAuditRepository::new());
    let progress = RecordingProgress::new();

    let stats = AuditCollector::new(client.clone(), repo.clone(), AuditParameters::default())
        .collect_site_data(&CancellationToken::new(), 1, SITE_URL, &progress)
        .await
        .unwrap();

    assert_eq!(stats.sharing_links_found, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(repo.items().len(), 1);
    assert_eq!(repo.item_save_count(), 1);

    let links = repo.sharing_links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].1, format!("{}:1", list_id));
}

#[tokio::test]
async fn sharing_analysis_can_be_disabled() {
    let unique = Uuid::new_v4();
    let client = FakeSharePointClient::new();
    let web_id = client.web().id;
    let client = Arc::new(client.with_role_assignments(
        PermissionTarget::Web { web_id },
        vec![assignment(
            sharing_principal(80, unique, "OrganizationView", Uuid::new_v4()),
            vec![read_role()],
        )],
    ));
    let repo = Arc::new(InMemoryAuditRepository::new());
    let progress = RecordingProgress::new();

    let stats = AuditCollector::new(
        client.clone(),
        repo,
        AuditParameters {
            sharing_analysis: false,
            ..Default::default()
        },
    )
    .collect_site_data(&CancellationToken::new(), 1, SITE_URL, &progress)
    .await
    .unwrap();

    assert_eq!(stats.sharing_links_found, 0);
    assert_eq!(client.call_count("get_file_by_unique_id"), 0);
    assert!(!progress.stages().contains(&"sharing".to_string()));
}
