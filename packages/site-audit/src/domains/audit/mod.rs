//! Site audit domain.
//!
//! - [`AuditCollector`] - walks one site and persists what it finds
//! - [`PermissionCollector`] - role assignments per web, list or item
//! - [`SharingLinkCollector`] - reverse-resolves sharing-link principals
//! - [`SiteAuditExecutor`] - runs the collector as a `site_audit` job
//!
//! ```text
//! SiteAuditExecutor.execute(job)
//!     │
//!     └─► AuditCollector.collect_site_data()
//!             ├─► web + role definitions + web permissions
//!             ├─► per list: metadata, permissions, item pages
//!             │       └─► per unique item: PermissionCollector
//!             └─► SharingLinkCollector.audit_site_sharing()
//! ```
//!
//! Remote access and persistence are traits ([`SharePointClient`],
//! [`AuditRepository`]); `testing` holds in-memory versions of both.

pub mod client;
pub mod error;
pub mod executor;
pub mod items;
pub mod models;
pub mod parameters;
pub mod permissions;
pub mod pipeline;
pub mod repository;
pub mod sharing;
pub mod testing;

pub use client::{ItemPage, ItemQuery, SharePointClient, ITEM_SELECT_FIELDS};
pub use error::CollectionError;
pub use executor::SiteAuditExecutor;
pub use items::{parse_item, ItemPager, ParsedItem};
pub use models::*;
pub use parameters::{validate_site_url, AuditParameters, ParameterError};
pub use permissions::{PermissionCollector, PermissionSummary};
pub use pipeline::AuditCollector;
pub use repository::AuditRepository;
pub use sharing::{
    parse_sharing_link_name, EnsureOutcome, SharingLinkCollector, SharingLinkRef, SharingSummary,
};
