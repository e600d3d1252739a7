// Common types and utilities shared across the crate

pub mod site_url;

pub use site_url::{normalize_site_url, parse_site_url, same_site};
