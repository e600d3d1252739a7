//! Sharing-link reverse resolution.
//!
//! Sharing links are not listed by the service. Each one shows up as a
//! pseudo-principal named `SharingLinks.{item-guid}.{Kind}.{share-guid}`,
//! already persisted by the permission collector. This module parses those
//! names, resolves the referenced items and stores their sharing details.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use super::client::SharePointClient;
use super::error::CollectionError;
use super::models::{AuditScope, Item, Principal, SharingLinkKind};
use super::repository::AuditRepository;

const SHARING_LINK_PREFIX: &str = "SharingLinks.";

lazy_static! {
    static ref SHARING_LINK_REGEX: Regex = Regex::new(
        r"^SharingLinks\.([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\.([A-Za-z]+)\.([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$"
    ).unwrap();
}

/// A sharing link as encoded in a principal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingLinkRef {
    pub principal_id: i64,
    pub item_unique_id: Uuid,
    pub kind: SharingLinkKind,
    pub share_id: Uuid,
}

/// Parse `SharingLinks.{item-guid}.{Kind}.{share-guid}`.
pub fn parse_sharing_link_name(name: &str) -> Option<(Uuid, SharingLinkKind, Uuid)> {
    let caps = SHARING_LINK_REGEX.captures(name.trim())?;
    let item = Uuid::parse_str(&caps[1]).ok()?;
    let share = Uuid::parse_str(&caps[3]).ok()?;
    Some((item, SharingLinkKind::parse(&caps[2]), share))
}

/// Name carrying the sharing-link convention, if the principal has one.
fn sharing_link_name(principal: &Principal) -> Option<&str> {
    [principal.login_name.as_str(), principal.title.as_str()]
        .into_iter()
        .find(|n| n.trim_start().starts_with(SHARING_LINK_PREFIX))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharingSummary {
    pub links_found: usize,
    pub links_resolved: usize,
    pub links_failed: usize,
    pub unparseable: usize,
    pub items_created: usize,
    /// One line per failed item or facet.
    pub errors: Vec<String>,
}

/// Result of [`SharingLinkCollector::ensure_item_exists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyExists(Item),
    Created(Item),
}

impl EnsureOutcome {
    pub fn item(&self) -> &Item {
        match self {
            EnsureOutcome::AlreadyExists(item) | EnsureOutcome::Created(item) => item,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, EnsureOutcome::Created(_))
    }
}

pub struct SharingLinkCollector {
    client: Arc<dyn SharePointClient>,
    repo: Arc<dyn AuditRepository>,
    span: Span,
}

impl SharingLinkCollector {
    pub fn new(client: Arc<dyn SharePointClient>, repo: Arc<dyn AuditRepository>) -> Self {
        Self {
            client,
            repo,
            span: tracing::info_span!("sharing_link_collector"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Resolve every sharing link recorded for the run.
    ///
    /// Per-link failures are logged and counted; only cancellation and a
    /// failure to read the principals fail the call.
    pub async fn audit_site_sharing(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
    ) -> Result<SharingSummary, CollectionError> {
        self.audit_site_sharing_inner(cancel, scope)
            .instrument(self.span.clone())
            .await
    }

    async fn audit_site_sharing_inner(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
    ) -> Result<SharingSummary, CollectionError> {
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let principals = self
            .repo
            .list_principals(scope)
            .await
            .map_err(|e| CollectionError::from_call(cancel, "principal listing", &scope.site_url, e))?;

        let mut summary = SharingSummary::default();
        let mut by_item: BTreeMap<Uuid, Vec<SharingLinkRef>> = BTreeMap::new();

        for principal in &principals {
            let Some(name) = sharing_link_name(principal) else {
                continue;
            };
            match parse_sharing_link_name(name) {
                Some((item_unique_id, kind, share_id)) => {
                    by_item.entry(item_unique_id).or_default().push(SharingLinkRef {
                        principal_id: principal.id,
                        item_unique_id,
                        kind,
                        share_id,
                    });
                    summary.links_found += 1;
                }
                None => {
                    warn!(principal_id = principal.id, name = %name, "Unparseable sharing link principal, skipping");
                    summary.unparseable += 1;
                }
            }
        }

        info!(
            site_url = %scope.site_url,
            links = summary.links_found,
            items = by_item.len(),
            "Resolving sharing links"
        );

        for (unique_id, refs) in by_item {
            if cancel.is_cancelled() {
                return Err(CollectionError::Cancelled);
            }

            match self.process_item(cancel, scope, unique_id, &refs).await {
                Ok(outcome) => {
                    summary.links_resolved += refs.len();
                    if outcome.created {
                        summary.items_created += 1;
                    }
                    summary.errors.extend(outcome.errors);
                }
                Err(_) if cancel.is_cancelled() => return Err(CollectionError::Cancelled),
                Err(e) => {
                    warn!(item_unique_id = %unique_id, links = refs.len(), error = %e, "Failed to resolve sharing link");
                    summary.links_failed += refs.len();
                    summary.errors.push(format!("{:#}", e));
                }
            }
        }

        Ok(summary)
    }

    async fn process_item(
        &self,
        cancel: &CancellationToken,
        scope: &AuditScope,
        unique_id: Uuid,
        refs: &[SharingLinkRef],
    ) -> anyhow::Result<ItemSharingOutcome> {
        let resolved = self.resolve_item(cancel, &scope.site_url, unique_id).await?;
        let ensured = self.ensure_item_exists(scope, resolved).await?;
        let item = ensured.item();

        let info = self
            .client
            .get_sharing_info(cancel, &scope.site_url, item)
            .await
            .with_context(|| format!("Failed to fetch sharing info for item {}", unique_id))?;

        let mut outcome = ItemSharingOutcome {
            created: ensured.was_created(),
            errors: Vec::new(),
        };

        for link in &info.links {
            if let Err(e) = self.repo.save_sharing_link(scope, item, link).await {
                if cancel.is_cancelled() {
                    return Err(e);
                }
                warn!(item_unique_id = %unique_id, share_id = %link.share_id, error = %e, "Failed to save sharing link");
                outcome
                    .errors
                    .push(format!("sharing link {} on item {}: {:#}", link.share_id, unique_id, e));
            }
        }

        // Governance facets only warn.
        if let Some(abilities) = &info.abilities {
            if let Err(e) = self.repo.save_sharing_abilities(scope, item, abilities).await {
                warn!(item_unique_id = %unique_id, error = %e, "Failed to save sharing abilities");
            }
        }
        if let Some(limits) = &info.recipient_limits {
            if let Err(e) = self.repo.save_recipient_limits(scope, item, limits).await {
                warn!(item_unique_id = %unique_id, error = %e, "Failed to save recipient limits");
            }
        }
        if let Some(label) = &info.sensitivity_label {
            if let Err(e) = self.repo.save_sensitivity_label(scope, item, label).await {
                warn!(item_unique_id = %unique_id, error = %e, "Failed to save sensitivity label");
            }
        }

        debug!(
            item_unique_id = %unique_id,
            principals = ?refs.iter().map(|r| r.principal_id).collect::<Vec<_>>(),
            active_links = info.links.len(),
            "Stored sharing info"
        );
        Ok(outcome)
    }

    /// File lookup first, folder second.
    async fn resolve_item(
        &self,
        cancel: &CancellationToken,
        site_url: &str,
        unique_id: Uuid,
    ) -> anyhow::Result<Item> {
        let file_err = match self
            .client
            .get_file_by_unique_id(cancel, site_url, unique_id)
            .await
        {
            Ok(item) => return Ok(with_unique_id(item, unique_id)),
            Err(e) => e,
        };

        match self
            .client
            .get_folder_by_unique_id(cancel, site_url, unique_id)
            .await
        {
            Ok(item) => Ok(with_unique_id(item, unique_id)),
            Err(folder_err) => Err(anyhow!(
                "item {} not found as file ({:#}) or folder ({:#})",
                unique_id,
                file_err,
                folder_err
            )),
        }
    }

    /// Persist `item` unless the run already has it under any of its three
    /// identities (content id, list-item id, list + integer id).
    pub async fn ensure_item_exists(
        &self,
        scope: &AuditScope,
        item: Item,
    ) -> anyhow::Result<EnsureOutcome> {
        if let Some(unique_id) = item.unique_id {
            if let Some(existing) = self.repo.find_item_by_unique_id(scope, unique_id).await? {
                return Ok(EnsureOutcome::AlreadyExists(existing));
            }
        }
        if let Some(guid) = item.list_item_guid {
            if let Some(existing) = self.repo.find_item_by_list_item_guid(scope, guid).await? {
                return Ok(EnsureOutcome::AlreadyExists(existing));
            }
        }
        if let Some(existing) = self
            .repo
            .find_item_by_list_and_id(scope, item.list_id, item.id)
            .await?
        {
            return Ok(EnsureOutcome::AlreadyExists(existing));
        }

        self.repo
            .save_item(scope, &item)
            .await
            .with_context(|| format!("Failed to save item {}", item.object_key()))?;
        Ok(EnsureOutcome::Created(item))
    }
}

struct ItemSharingOutcome {
    created: bool,
    errors: Vec<String>,
}

fn with_unique_id(mut item: Item, unique_id: Uuid) -> Item {
    item.unique_id.get_or_insert(unique_id);
    item
}
