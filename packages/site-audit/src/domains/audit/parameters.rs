//! Audit parameters and their validation.
//!
//! Callers may send any mix of values; `validate` turns them into a set the
//! pipeline can trust. Zero sizes fall back to defaults, values outside the
//! service bounds are clamped, and negative values reject the whole set.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::parse_site_url;

pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const MIN_BATCH_SIZE: i64 = 10;
pub const MAX_BATCH_SIZE: i64 = 5000;

pub const DEFAULT_TIMEOUT_SECS: i64 = 1800;
pub const MIN_TIMEOUT_SECS: i64 = 60;
pub const MAX_TIMEOUT_SECS: i64 = 86_400;

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const MAX_RETRIES_LIMIT: i64 = 10;

/// Progress is reported at most every this many items during a deep scan.
const MAX_PROGRESS_INTERVAL: usize = 50;

/// Errors raised while validating audit input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },

    #[error("invalid site URL '{url}': {reason}")]
    InvalidSiteUrl { url: String, reason: String },
}

/// Tunables for one site audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditParameters {
    /// Page size used for item pagination.
    pub batch_size: i64,
    /// Advisory time budget for the audit, in seconds. Not enforced.
    pub timeout_secs: i64,
    pub max_retries: i64,
    /// Paginate list items and inspect their permissions.
    pub deep_item_scan: bool,
    /// Reverse-resolve sharing links after list processing.
    pub sharing_analysis: bool,
    /// Skip hidden lists entirely.
    pub skip_hidden: bool,
}

impl Default for AuditParameters {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            deep_item_scan: true,
            sharing_analysis: true,
            skip_hidden: true,
        }
    }
}

impl AuditParameters {
    /// Return a copy with numeric fields normalized to the service bounds.
    pub fn validate(self) -> Result<Self, ParameterError> {
        let batch_size = normalize(
            "batch_size",
            self.batch_size,
            DEFAULT_BATCH_SIZE,
            MIN_BATCH_SIZE,
            MAX_BATCH_SIZE,
        )?;
        let timeout_secs = normalize(
            "timeout_secs",
            self.timeout_secs,
            DEFAULT_TIMEOUT_SECS,
            MIN_TIMEOUT_SECS,
            MAX_TIMEOUT_SECS,
        )?;

        if self.max_retries < 0 {
            return Err(ParameterError::Negative {
                field: "max_retries",
                value: self.max_retries,
            });
        }

        Ok(Self {
            batch_size,
            timeout_secs,
            max_retries: self.max_retries.min(MAX_RETRIES_LIMIT),
            ..self
        })
    }

    /// Number of items between deep-scan progress reports.
    pub fn progress_interval(&self) -> usize {
        usize::try_from(self.batch_size)
            .unwrap_or(1)
            .clamp(1, MAX_PROGRESS_INTERVAL)
    }

    /// Page size to request from the remote service.
    pub fn page_size(&self) -> usize {
        usize::try_from(self.batch_size).unwrap_or(DEFAULT_BATCH_SIZE as usize)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout_secs).unwrap_or(0))
    }
}

fn normalize(
    field: &'static str,
    value: i64,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, ParameterError> {
    match value {
        v if v < 0 => Err(ParameterError::Negative { field, value: v }),
        0 => Ok(default),
        v => Ok(v.clamp(min, max)),
    }
}

/// Validate a site URL at the request boundary.
pub fn validate_site_url(raw: &str) -> Result<String, ParameterError> {
    parse_site_url(raw)
        .map(|_| raw.trim().to_string())
        .map_err(|reason| ParameterError::InvalidSiteUrl {
            url: raw.to_string(),
            reason,
        })
}
