//! Site collection pipeline.
//!
//! Walks site → web → lists → items, delegating role assignments to the
//! [`PermissionCollector`] and sharing links to the
//! [`SharingLinkCollector`]. Phase boundaries without a "continue" meaning
//! (web, role definitions, web permissions, list enumeration) are fatal.
//! Everything below a list is best effort: failures are logged, counted in
//! `JobStats::errors`, and skipped.
//!
//! Progress milestones: web discovery 10-20%, permissions 20-30%, lists
//! 30-80% by list index, sharing 80-90%, finalization 100%.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use super::client::SharePointClient;
use super::error::CollectionError;
use super::items::{parse_item, ItemPager, ParsedItem};
use super::models::{AuditRunId, AuditScope, List, PermissionTarget, Site};
use super::parameters::{validate_site_url, AuditParameters};
use super::permissions::PermissionCollector;
use super::repository::AuditRepository;
use super::sharing::SharingLinkCollector;
use crate::kernel::jobs::{JobStats, ProgressReporter, ProgressUpdate};

pub const STAGE_WEB: &str = "web_discovery";
pub const STAGE_PERMISSIONS: &str = "permissions";
pub const STAGE_LISTS: &str = "lists";
pub const STAGE_SHARING: &str = "sharing";
pub const STAGE_FINALIZING: &str = "finalizing";

pub struct AuditCollector {
    client: Arc<dyn SharePointClient>,
    repo: Arc<dyn AuditRepository>,
    permissions: PermissionCollector,
    sharing: SharingLinkCollector,
    params: AuditParameters,
    span: Span,
}

impl AuditCollector {
    pub fn new(
        client: Arc<dyn SharePointClient>,
        repo: Arc<dyn AuditRepository>,
        params: AuditParameters,
    ) -> Self {
        Self::with_span(client, repo, params, tracing::info_span!("audit_collector"))
    }

    /// Collectors log under child spans of `span`.
    pub fn with_span(
        client: Arc<dyn SharePointClient>,
        repo: Arc<dyn AuditRepository>,
        params: AuditParameters,
        span: Span,
    ) -> Self {
        let permissions = PermissionCollector::new(client.clone(), repo.clone())
            .with_span(tracing::info_span!(parent: &span, "permission_collector"));
        let sharing = SharingLinkCollector::new(client.clone(), repo.clone())
            .with_span(tracing::info_span!(parent: &span, "sharing_link_collector"));

        Self {
            client,
            repo,
            permissions,
            sharing,
            params,
            span,
        }
    }

    /// Collect everything for one site under `audit_run_id`.
    pub async fn collect_site_data(
        &self,
        cancel: &CancellationToken,
        audit_run_id: AuditRunId,
        site_url: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<JobStats, CollectionError> {
        let span = tracing::info_span!(parent: &self.span, "collect_site", site_url = %site_url, audit_run_id);
        self.collect(cancel, audit_run_id, site_url, progress)
            .instrument(span)
            .await
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        audit_run_id: AuditRunId,
        site_url: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<JobStats, CollectionError> {
        let params = self.params.validate()?;
        let site_url = validate_site_url(site_url)?;
        let scope = AuditScope::new(site_url.clone(), audit_run_id);
        let mut stats = JobStats::default();

        check_cancel(cancel)?;

        // Web discovery
        self.repo
            .save_site(
                &scope,
                &Site {
                    url: site_url.clone(),
                    title: None,
                },
            )
            .await
            .map_err(|e| CollectionError::from_call(cancel, "site registration", &site_url, e))?;

        progress
            .report(
                ProgressUpdate::new(STAGE_WEB, "Discovering site", 10.0)
                    .with_operation("Fetching web metadata")
                    .with_current_item(site_url.clone()),
            )
            .await;

        let web = self
            .client
            .get_web(cancel, &site_url)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "web discovery", &site_url, e))?;
        self.repo
            .save_web(&scope, &web)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "web discovery", &site_url, e))?;
        self.repo
            .save_site(
                &scope,
                &Site {
                    url: site_url.clone(),
                    title: Some(web.title.clone()),
                },
            )
            .await
            .map_err(|e| CollectionError::from_call(cancel, "web discovery", &site_url, e))?;

        progress
            .report(
                ProgressUpdate::new(STAGE_WEB, format!("Found web '{}'", web.title), 20.0)
                    .with_message(format!("Discovered web '{}'", web.title)),
            )
            .await;

        // Permissions
        check_cancel(cancel)?;
        progress
            .report(
                ProgressUpdate::new(STAGE_PERMISSIONS, "Loading permission levels", 20.0)
                    .with_operation("Fetching role definitions"),
            )
            .await;

        let definitions = self
            .client
            .get_role_definitions(cancel, &site_url)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "role definition retrieval", &site_url, e))?;
        self.repo
            .save_role_definitions(&scope, &definitions)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "role definition retrieval", &site_url, e))?;

        let web_permissions = self.permissions.collect_web(cancel, &scope, web.id).await?;
        stats.permissions_analyzed += web_permissions.assignments as u64;
        stats.errors += web_permissions.failures as u64;

        progress
            .report(
                ProgressUpdate::new(STAGE_PERMISSIONS, "Web permissions collected", 30.0)
                    .with_stats(stats)
                    .with_message(format!(
                        "Collected {} permission levels and {} web role assignments",
                        definitions.len(),
                        web_permissions.assignments
                    )),
            )
            .await;

        // Lists
        check_cancel(cancel)?;
        let lists = self
            .client
            .get_lists(cancel, &site_url)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "list enumeration", &site_url, e))?;
        stats.lists_found = lists.len() as u64;
        let total = lists.len();

        for (index, list) in lists.iter().enumerate() {
            check_cancel(cancel)?;
            let percentage = 30.0 + 50.0 * index as f64 / total as f64;

            if params.skip_hidden && self.client.is_hidden_list(list) {
                debug!(list = %list.title, "Skipping hidden list");
                stats.lists_skipped += 1;
                continue;
            }

            progress
                .report(
                    ProgressUpdate::new(
                        STAGE_LISTS,
                        format!("Processing list {} of {}: {}", index + 1, total, list.title),
                        percentage,
                    )
                    .with_items(index as u64, total as u64)
                    .with_operation("Processing list")
                    .with_current_item(list.title.clone())
                    .with_stats(stats),
                )
                .await;

            self.process_list(cancel, &scope, &params, list, percentage, &mut stats, progress)
                .await?;
            stats.lists_processed += 1;
        }

        progress
            .report(
                ProgressUpdate::new(STAGE_LISTS, "Lists processed", 80.0)
                    .with_items(total as u64, total as u64)
                    .with_stats(stats)
                    .with_message(format!(
                        "Processed {} lists ({} skipped), {} items",
                        stats.lists_processed, stats.lists_skipped, stats.items_processed
                    )),
            )
            .await;

        // Sharing
        if params.sharing_analysis {
            check_cancel(cancel)?;
            progress
                .report(
                    ProgressUpdate::new(STAGE_SHARING, "Analyzing sharing links", 80.0)
                        .with_operation("Resolving sharing links"),
                )
                .await;

            match self.sharing.audit_site_sharing(cancel, &scope).await {
                Ok(summary) => {
                    stats.sharing_links_found += summary.links_found as u64;
                    stats.errors += summary.errors.len() as u64;
                    progress
                        .report(
                            ProgressUpdate::new(STAGE_SHARING, "Sharing links analyzed", 90.0)
                                .with_stats(stats)
                                .with_message(format!(
                                    "Resolved {} of {} sharing links",
                                    summary.links_resolved, summary.links_found
                                )),
                        )
                        .await;
                }
                Err(CollectionError::Cancelled) => return Err(CollectionError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "Sharing analysis failed, continuing");
                    stats.errors += 1;
                }
            }
        }

        progress
            .report(
                ProgressUpdate::new(STAGE_FINALIZING, "Audit complete", 100.0)
                    .with_stats(stats)
                    .with_message("Audit complete"),
            )
            .await;

        info!(
            lists = stats.lists_processed,
            items = stats.items_processed,
            permissions = stats.permissions_analyzed,
            sharing_links = stats.sharing_links_found,
            errors = stats.errors,
            "Site collection finished"
        );
        Ok(stats)
    }

    /// Metadata, permissions and (optionally) items of one list. Only
    /// cancellation escapes.
    #[allow(clippy::too_many_arguments)]
    async fn process_list(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        params: &AuditParameters,
        list: &List,
        percentage: f64,
        stats: &mut JobStats,
        progress: &dyn ProgressReporter,
    ) -> Result<(), CollectionError> {
        if let Err(e) = self.repo.save_list(scope, list).await {
            check_cancel(cancel)?;
            warn!(list = %list.title, error = %e, "Failed to save list");
            stats.errors += 1;
        }

        match self.permissions.collect_list(cancel, scope, list.id).await {
            Ok(summary) => {
                stats.permissions_analyzed += summary.assignments as u64;
                stats.errors += summary.failures as u64;
            }
            Err(CollectionError::Cancelled) => return Err(CollectionError::Cancelled),
            Err(e) => {
                warn!(list = %list.title, error = %e, "Failed to collect list permissions");
                stats.errors += 1;
            }
        }

        if !params.deep_item_scan {
            return Ok(());
        }

        let query = self
            .client
            .item_query(&scope.site_url, list, params.page_size());
        let mut pager = ItemPager::new(self.client.as_ref(), query);
        let interval = params.progress_interval();
        let mut scanned = 0usize;

        loop {
            let page = match pager.next_page(cancel).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(CollectionError::Cancelled) => return Err(CollectionError::Cancelled),
                Err(e) => {
                    warn!(list = %list.title, error = %e, "Item pagination failed, skipping rest of list");
                    stats.errors += 1;
                    break;
                }
            };

            for raw in &page {
                check_cancel(cancel)?;
                stats.items_found += 1;

                match self.process_item(cancel, scope, list, raw, stats).await {
                    Ok(()) => stats.items_processed += 1,
                    Err(_) if cancel.is_cancelled() => return Err(CollectionError::Cancelled),
                    Err(e) => {
                        warn!(list = %list.title, error = %e, "Failed to process item, skipping");
                        stats.errors += 1;
                    }
                }

                scanned += 1;
                if scanned % interval == 0 {
                    progress
                        .report(
                            ProgressUpdate::new(
                                STAGE_LISTS,
                                format!("{}: {} items scanned", list.title, scanned),
                                percentage,
                            )
                            .with_items(scanned as u64, list.item_count.max(0) as u64)
                            .with_current_item(list.title.clone())
                            .with_stats(*stats),
                        )
                        .await;
                }
            }
        }

        Ok(())
    }

    async fn process_item(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        list: &List,
        raw: &Value,
        stats: &mut JobStats,
    ) -> anyhow::Result<()> {
        let ParsedItem {
            mut item,
            sensitivity_label,
        } = parse_item(list.id, raw)?;

        let target = PermissionTarget::Item {
            list_id: item.list_id,
            item_id: item.id,
        };
        item.has_unique_permissions = self
            .client
            .has_unique_permissions(cancel, &scope.site_url, &target)
            .await
            .with_context(|| format!("Failed to check permissions of {}", target))?;

        self.repo
            .save_item(scope, &item)
            .await
            .with_context(|| format!("Failed to save item {}", item.object_key()))?;

        if let Some(label) = &sensitivity_label {
            if let Err(e) = self.repo.save_sensitivity_label(scope, &item, label).await {
                warn!(item = %item.object_key(), error = %e, "Failed to save sensitivity label");
            }
        }

        // Inheriting items are never queried individually.
        if item.has_unique_permissions {
            let summary = self.permissions.collect_item(cancel, scope, &item).await?;
            stats.permissions_analyzed += summary.assignments as u64;
            stats.errors += summary.failures as u64;
        }

        Ok(())
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), CollectionError> {
    if cancel.is_cancelled() {
        Err(CollectionError::Cancelled)
    } else {
        Ok(())
    }
}
