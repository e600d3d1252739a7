//! Role-assignment collection for webs, lists and items.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

use super::client::SharePointClient;
use super::error::CollectionError;
use super::models::{AuditScope, Item, PermissionTarget, RoleAssignment};
use super::repository::AuditRepository;

/// What one collection call persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSummary {
    pub principals: usize,
    pub assignments: usize,
    pub failures: usize,
}

/// Fetches role assignments for one object and persists principals and
/// assignments under the audit run. Never deletes earlier rows.
pub struct PermissionCollector {
    client: Arc<dyn SharePointClient>,
    repo: Arc<dyn AuditRepository>,
    span: Span,
}

impl PermissionCollector {
    pub fn new(client: Arc<dyn SharePointClient>, repo: Arc<dyn AuditRepository>) -> Self {
        Self {
            client,
            repo,
            span: tracing::info_span!("permission_collector"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn collect_web(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        web_id: Uuid,
    ) -> Result<PermissionSummary, CollectionError> {
        self.collect(cancel, scope, PermissionTarget::Web { web_id })
            .await
    }

    pub async fn collect_list(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        list_id: Uuid,
    ) -> Result<PermissionSummary, CollectionError> {
        self.collect(cancel, scope, PermissionTarget::List { list_id })
            .await
    }

    pub async fn collect_item(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        item: &Item,
    ) -> Result<PermissionSummary, CollectionError> {
        let target = PermissionTarget::Item {
            list_id: item.list_id,
            item_id: item.id,
        };
        self.collect(cancel, scope, target).await
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        target: PermissionTarget,
    ) -> Result<PermissionSummary, CollectionError> {
        self.collect_inner(cancel, scope, &target)
            .instrument(self.span.clone())
            .await
    }

    async fn collect_inner(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        target: &PermissionTarget,
    ) -> Result<PermissionSummary, CollectionError> {
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let remote = self
            .client
            .get_role_assignments(cancel, &scope.site_url, target)
            .await
            .map_err(|e| {
                CollectionError::from_call(cancel, "role assignment retrieval", target.to_string(), e)
            })?;

        let object_type = target.object_type();
        let object_key = target.object_key();
        let mut saved = HashSet::new();
        let mut failed = HashSet::new();
        let mut summary = PermissionSummary::default();

        for assignment in remote {
            let principal = &assignment.principal;

            if failed.contains(&principal.id) {
                continue;
            }
            if !saved.contains(&principal.id) {
                match self.repo.save_principal(scope, principal).await {
                    Ok(()) => {
                        saved.insert(principal.id);
                        summary.principals += 1;
                    }
                    Err(_) if cancel.is_cancelled() => return Err(CollectionError::Cancelled),
                    Err(e) => {
                        warn!(object = %target, principal_id = principal.id, error = %e, "Failed to save principal, skipping");
                        failed.insert(principal.id);
                        summary.failures += 1;
                        continue;
                    }
                }
            }

            for definition in &assignment.role_definitions {
                let row = RoleAssignment {
                    object_type,
                    object_key: object_key.clone(),
                    principal_id: principal.id,
                    role_definition_id: definition.id,
                    role_name: definition.name.clone(),
                };
                match self.repo.save_role_assignment(scope, &row).await {
                    Ok(()) => summary.assignments += 1,
                    Err(_) if cancel.is_cancelled() => return Err(CollectionError::Cancelled),
                    Err(e) => {
                        warn!(object = %target, principal_id = principal.id, role = %definition.name, error = %e, "Failed to save role assignment, skipping");
                        summary.failures += 1;
                    }
                }
            }
        }

        debug!(
            object = %target,
            principals = summary.principals,
            assignments = summary.assignments,
            failures = summary.failures,
            "Collected permissions"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::audit::models::{Principal, PrincipalKind, RemoteRoleAssignment, RoleDefinition};
    use crate::domains::audit::testing::{FakeSharePointClient, InMemoryAuditRepository};

    fn principal(id: i64) -> Principal {
        Principal {
            id,
            kind: PrincipalKind::User,
            title: format!("User {}", id),
            login_name: format!("i:0#.f|membership|user{}@contoso.com", id),
            email: None,
        }
    }

    fn role(id: i64, name: &str) -> RoleDefinition {
        RoleDefinition {
            id,
            name: name.to_string(),
            description: None,
            hidden: false,
        }
    }

    fn scope() -> AuditScope {
        AuditScope::new("https://contoso.sharepoint.com/sites/hr", 1)
    }

    #[tokio::test]
    async fn test_principals_are_deduplicated_within_a_call() {
        let list_id = Uuid::new_v4();
        let target = PermissionTarget::List { list_id };
        let client = FakeSharePointClient::new().with_role_assignments(
            target,
            vec![
                RemoteRoleAssignment {
                    principal: principal(1),
                    role_definitions: vec![role(1073741827, "Contribute")],
                },
                RemoteRoleAssignment {
                    principal: principal(1),
                    role_definitions: vec![role(1073741826, "Read")],
                },
                RemoteRoleAssignment {
                    principal: principal(2),
                    role_definitions: vec![role(1073741826, "Read")],
                },
            ],
        );
        let repo = Arc::new(InMemoryAuditRepository::new());
        let collector = PermissionCollector::new(Arc::new(client), repo.clone());

        let summary = collector
            .collect_list(&CancellationToken::new(), &scope(), list_id)
            .await
            .unwrap();

        assert_eq!(summary.principals, 2);
        assert_eq!(summary.assignments, 3);
        assert_eq!(repo.principal_save_count(), 2);
        assert!(repo
            .role_assignments()
            .iter()
            .all(|(_, a)| a.object_key == list_id.to_string()));
    }

    #[tokio::test]
    async fn test_principal_save_failure_is_skipped() {
        let web_id = Uuid::new_v4();
        let client = FakeSharePointClient::new().with_role_assignments(
            PermissionTarget::Web { web_id },
            vec![
                RemoteRoleAssignment {
                    principal: principal(1),
                    role_definitions: vec![role(5, "Full Control")],
                },
                RemoteRoleAssignment {
                    principal: principal(2),
                    role_definitions: vec![role(6, "Read")],
                },
            ],
        );
        let repo = Arc::new(InMemoryAuditRepository::new());
        repo.fail_principal(1);
        let collector = PermissionCollector::new(Arc::new(client), repo.clone());

        let summary = collector
            .collect_web(&CancellationToken::new(), &scope(), web_id)
            .await
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.principals, 1);
        assert_eq!(summary.assignments, 1);
    }

    #[tokio::test]
    async fn test_save_failure_after_cancellation_propagates() {
        let web_id = Uuid::new_v4();
        let client = FakeSharePointClient::new().with_role_assignments(
            PermissionTarget::Web { web_id },
            vec![RemoteRoleAssignment {
                principal: principal(1),
                role_definitions: vec![role(5, "Full Control")],
            }],
        );
        let cancel = CancellationToken::new();
        let repo = Arc::new(InMemoryAuditRepository::new());
        repo.cancel_on_principal_save(cancel.clone());
        let collector = PermissionCollector::new(Arc::new(client), repo);

        let err = collector
            .collect_web(&cancel, &scope(), web_id)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_previous_runs_are_kept() {
        let list_id = Uuid::new_v4();
        let client = FakeSharePointClient::new().with_role_assignments(
            PermissionTarget::List { list_id },
            vec![RemoteRoleAssignment {
                principal: principal(1),
                role_definitions: vec![role(6, "Read")],
            }],
        );
        let repo = Arc::new(InMemoryAuditRepository::new());
        let collector = PermissionCollector::new(Arc::new(client), repo.clone());
        let cancel = CancellationToken::new();

        collector
            .collect_list(&cancel, &AuditScope::new("https://contoso.sharepoint.com/sites/hr", 1), list_id)
            .await
            .unwrap();
        collector
            .collect_list(&cancel, &AuditScope::new("https://contoso.sharepoint.com/sites/hr", 2), list_id)
            .await
            .unwrap();

        let runs: Vec<i64> = repo
            .role_assignments()
            .iter()
            .map(|(scope, _)| scope.audit_run_id)
            .collect();
        assert_eq!(runs, vec![1, 2]);
    }
}
