// ABOUTME: Redirect-URI normalization and installed-app classification
// ABOUTME: Strips trailing slashes and loopback ports so registration and authorize requests match
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Redirection-URI handling.
//!
//! URIs are stored normalized: trailing slashes stripped from the path
//! and explicit ports stripped when the host is loopback, so
//! `http://localhost:3000/cb/` presented at authorize time matches a
//! registered `http://localhost/cb`. Custom-scheme URIs, loopback URIs,
//! and the out-of-band URNs identify installed/native apps that cannot
//! keep a secret.

use thiserror::Error;
use url::Url;

/// RFC "out of band" redirect URNs for installed apps.
pub const OOB_URN: &str = "urn:ietf:wg:oauth:2.0:oob";
/// Auto-variant of the out-of-band URN.
pub const OOB_AUTO_URN: &str = "urn:ietf:wg:oauth:2.0:oob:auto";

/// Redirect-URI validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedirectUriError {
    #[error("redirect URI does not parse: {0}")]
    Unparsable(String),
    #[error("token response type requires an https redirect URI")]
    TokenRequiresHttps,
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

/// Normalize a redirect URI for storage and matching.
///
/// # Errors
///
/// Returns [`RedirectUriError::Unparsable`] when the input is not a
/// valid absolute URI.
pub fn normalize_redirect_uri(raw: &str) -> Result<String, RedirectUriError> {
    if raw == OOB_URN || raw == OOB_AUTO_URN {
        return Ok(raw.to_owned());
    }

    let url = Url::parse(raw).map_err(|_| RedirectUriError::Unparsable(raw.to_owned()))?;

    // Custom schemes (installed apps) keep their opaque form, minus any
    // trailing slash noise.
    if url.scheme() != "http" && url.scheme() != "https" {
        return Ok(raw.trim_end_matches('/').to_owned());
    }

    let host = url
        .host_str()
        .ok_or_else(|| RedirectUriError::Unparsable(raw.to_owned()))?;

    let mut normalized = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        if !is_loopback_host(host) {
            normalized.push_str(&format!(":{port}"));
        }
    }

    let path = url.path().trim_end_matches('/');
    normalized.push_str(path);

    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    Ok(normalized)
}

/// Whether a (normalized) redirect URI identifies a confidential client.
///
/// Custom-scheme URIs, loopback http(s) URIs, and the out-of-band URNs
/// represent installed/native apps that cannot keep a secret, so the
/// client secret is not required when redeeming their codes.
#[must_use]
pub fn needs_client_secret(uri: &str) -> bool {
    if uri == OOB_URN || uri == OOB_AUTO_URN {
        return false;
    }
    let Ok(url) = Url::parse(uri) else {
        return true;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    match url.host_str() {
        Some(host) => !is_loopback_host(host),
        None => true,
    }
}

/// Enforce that implicit-flow (`token` response type) URIs use https;
/// returning tokens in a fragment over plaintext would leak them.
///
/// # Errors
///
/// Returns [`RedirectUriError::TokenRequiresHttps`] for any non-https URI.
pub fn require_https_for_token(uri: &str) -> Result<(), RedirectUriError> {
    if uri.starts_with("https://") {
        Ok(())
    } else {
        Err(RedirectUriError::TokenRequiresHttps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(
            normalize_redirect_uri("https://example.com/cb/").unwrap(),
            "https://example.com/cb"
        );
    }

    #[test]
    fn strips_loopback_port() {
        assert_eq!(
            normalize_redirect_uri("http://localhost:3000/cb").unwrap(),
            "http://localhost/cb"
        );
        assert_eq!(
            normalize_redirect_uri("http://127.0.0.1:8080/cb").unwrap(),
            "http://127.0.0.1/cb"
        );
    }

    #[test]
    fn keeps_non_loopback_port() {
        assert_eq!(
            normalize_redirect_uri("https://example.com:8443/cb").unwrap(),
            "https://example.com:8443/cb"
        );
    }

    #[test]
    fn localhost_with_port_and_slash_matches_registered_form() {
        // The authorize request presents the noisy form; registration
        // stored the clean one.
        let registered = normalize_redirect_uri("http://localhost:3000/cb").unwrap();
        let presented = normalize_redirect_uri("http://localhost:3000/cb/").unwrap();
        assert_eq!(registered, "http://localhost/cb");
        assert_eq!(registered, presented);
    }

    #[test]
    fn oob_urns_pass_through() {
        assert_eq!(normalize_redirect_uri(OOB_URN).unwrap(), OOB_URN);
        assert_eq!(normalize_redirect_uri(OOB_AUTO_URN).unwrap(), OOB_AUTO_URN);
    }

    #[test]
    fn custom_scheme_is_installed_app() {
        assert!(!needs_client_secret("myapp://oauth/callback"));
        assert!(!needs_client_secret("http://localhost/cb"));
        assert!(!needs_client_secret(OOB_URN));
        assert!(needs_client_secret("https://example.com/cb"));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(matches!(
            normalize_redirect_uri("not a uri"),
            Err(RedirectUriError::Unparsable(_))
        ));
    }

    #[test]
    fn token_response_type_needs_https() {
        assert!(require_https_for_token("https://example.com/cb").is_ok());
        assert_eq!(
            require_https_for_token("http://example.com/cb").unwrap_err(),
            RedirectUriError::TokenRequiresHttps
        );
    }
}
