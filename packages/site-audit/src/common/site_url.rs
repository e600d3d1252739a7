//! Site URL parsing and comparison.
//!
//! Site URLs arrive from callers in many spellings (trailing slashes, mixed
//! case hosts). Duplicate-audit detection and repository scoping compare the
//! normalized form.

use url::Url;

/// Parse a site URL, accepting only absolute `http`/`https` URLs with a host.
pub fn parse_site_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("site URL is empty".to_string());
    }

    let url = Url::parse(trimmed).map_err(|e| e.to_string())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }

    if url.host_str().is_none() {
        return Err("site URL has no host".to_string());
    }

    Ok(url)
}

/// Normalized form used for comparisons: lowercase, no trailing slash.
pub fn normalize_site_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Whether two site URLs refer to the same site.
pub fn same_site(a: &str, b: &str) -> bool {
    normalize_site_url(a) == normalize_site_url(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_site() {
        let url = parse_site_url("https://contoso.sharepoint.com/sites/finance").unwrap();
        assert_eq!(url.host_str(), Some("contoso.sharepoint.com"));
    }

    #[test]
    fn rejects_empty_and_relative() {
        assert!(parse_site_url("   ").is_err());
        assert!(parse_site_url("/sites/finance").is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = parse_site_url("ftp://contoso.example/sites/x").unwrap_err();
        assert!(err.contains("ftp"));
    }

    #[test]
    fn same_site_ignores_case_and_trailing_slash() {
        assert!(same_site(
            "https://Contoso.sharepoint.com/sites/HR/",
            "https://contoso.sharepoint.com/sites/hr"
        ));
        assert!(!same_site(
            "https://contoso.sharepoint.com/sites/hr",
            "https://contoso.sharepoint.com/sites/finance"
        ));
    }
}
