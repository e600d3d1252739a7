use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::domains::audit::AuditParameters;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres job store. `None` keeps jobs in memory.
    pub database_url: Option<String>,
    /// Validated defaults applied to every new site audit.
    pub audit_defaults: AuditParameters,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = AuditParameters::default();

        let audit_defaults = AuditParameters {
            batch_size: parse_or(&lookup, "AUDIT_BATCH_SIZE", defaults.batch_size)?,
            timeout_secs: parse_or(&lookup, "AUDIT_TIMEOUT_SECS", defaults.timeout_secs)?,
            max_retries: parse_or(&lookup, "AUDIT_MAX_RETRIES", defaults.max_retries)?,
            deep_item_scan: parse_bool_or(&lookup, "AUDIT_DEEP_SCAN", defaults.deep_item_scan)?,
            sharing_analysis: parse_bool_or(
                &lookup,
                "AUDIT_SHARING_ANALYSIS",
                defaults.sharing_analysis,
            )?,
            skip_hidden: parse_bool_or(&lookup, "AUDIT_SKIP_HIDDEN", defaults.skip_hidden)?,
        }
        .validate()
        .context("Invalid AUDIT_* configuration")?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            audit_defaults,
        })
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: i64) -> Result<i64> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn parse_bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{} must be a boolean (got '{}')", key, other),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert!(config.database_url.is_none());
        assert_eq!(config.audit_defaults, AuditParameters::default());
    }

    #[test]
    fn values_are_parsed_and_clamped() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/audit"),
            ("AUDIT_BATCH_SIZE", "9000"),
            ("AUDIT_TIMEOUT_SECS", "0"),
            ("AUDIT_DEEP_SCAN", "false"),
            ("AUDIT_SKIP_HIDDEN", "No"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/audit"));
        assert_eq!(config.audit_defaults.batch_size, 5000);
        assert_eq!(config.audit_defaults.timeout_secs, 1800);
        assert!(!config.audit_defaults.deep_item_scan);
        assert!(!config.audit_defaults.skip_hidden);
        assert!(config.audit_defaults.sharing_analysis);
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("AUDIT_MAX_RETRIES", "three")])).unwrap_err();
        assert!(err.to_string().contains("AUDIT_MAX_RETRIES"));
    }

    #[test]
    fn negative_value_is_rejected() {
        let err = Config::from_lookup(lookup(&[("AUDIT_BATCH_SIZE", "-5")])).unwrap_err();
        assert!(format!("{:#}", err).contains("batch_size"));
    }
}
