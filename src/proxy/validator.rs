//! Structural validation and masking of proxy strings
//!
//! Accepted formats:
//! - HOST:PORT
//! - HOST:PORT:USER:PASS
//!
//! Validation is pure string work: no DNS resolution, no network access.

use crate::proxy::models::{ProxyEndpoint, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

/// Placeholder substituted for the password segment by [`mask`]. Fixed width
/// so masked output never reveals the real password length.
const MASK_PLACEHOLDER: &str = "******";

static HOSTNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9.-]+$").expect("hostname pattern is valid"));

/// Parse a raw proxy string into a [`ProxyEndpoint`].
///
/// The input is trimmed and split on `:`; exactly 2 parts (`host:port`) or
/// exactly 4 parts (`host:port:user:pass`) are accepted. The host must be an
/// IP literal or a plausible DNS name, the port must be all-digit within
/// 1..=65535, and credentials, when present, must both be non-empty.
pub fn validate(raw: &str) -> Result<ProxyEndpoint, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 && parts.len() != 4 {
        return Err(ValidationError::BadFormat);
    }

    let host = parts[0];
    if !is_valid_host(host) {
        return Err(ValidationError::InvalidHost);
    }

    let port = parse_port(parts[1])?;

    if parts.len() == 4 {
        let (username, password) = (parts[2], parts[3]);
        if username.is_empty() || password.is_empty() {
            return Err(ValidationError::InvalidCredentials);
        }
        return Ok(ProxyEndpoint::with_auth(
            host.to_string(),
            port,
            username.to_string(),
            password.to_string(),
        ));
    }

    Ok(ProxyEndpoint::new(host.to_string(), port))
}

/// Redact the password segment of a proxy string for display and logging.
///
/// Only 4-part strings carry a password; anything else is returned unchanged.
pub fn mask(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 {
        return raw.to_string();
    }

    format!("{}:{}:{}:{}", parts[0], parts[1], parts[2], MASK_PLACEHOLDER)
}

fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    HOSTNAME_RE.is_match(host)
}

fn parse_port(s: &str) -> Result<u16, ValidationError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidPort);
    }

    let port: u32 = s.parse().map_err(|_| ValidationError::InvalidPort)?;
    if port < 1 || port > 65535 {
        return Err(ValidationError::InvalidPort);
    }

    Ok(port as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_host_port() {
        let ep = validate("1.2.3.4:8080").unwrap();
        assert_eq!(ep.host, "1.2.3.4");
        assert_eq!(ep.port, 8080);
        assert!(ep.auth.is_none());
    }

    #[test]
    fn test_validate_with_credentials() {
        let ep = validate("example.com:3128:alice:secret").unwrap();
        assert_eq!(ep.host, "example.com");
        assert_eq!(ep.port, 3128);
        let auth = ep.auth.unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "secret");
    }

    #[test]
    fn test_validate_trims_whitespace() {
        let ep = validate("  1.2.3.4:8080\n").unwrap();
        assert_eq!(ep.host, "1.2.3.4");
    }

    #[test]
    fn test_validate_empty() {
        assert_eq!(validate(""), Err(ValidationError::EmptyInput));
        assert_eq!(validate("   "), Err(ValidationError::EmptyInput));
    }

    #[test]
    fn test_validate_bad_arity() {
        assert_eq!(validate("bad"), Err(ValidationError::BadFormat));
        assert_eq!(validate("a:1:user"), Err(ValidationError::BadFormat));
        assert_eq!(validate("a:1:u:p:extra"), Err(ValidationError::BadFormat));
    }

    #[test]
    fn test_validate_bad_host() {
        assert_eq!(validate("bad host:8080"), Err(ValidationError::InvalidHost));
        assert_eq!(validate(":8080"), Err(ValidationError::InvalidHost));
        assert_eq!(
            validate("under_score:8080"),
            Err(ValidationError::InvalidHost)
        );
    }

    #[test]
    fn test_validate_bad_port() {
        assert_eq!(validate("1.2.3.4:99999"), Err(ValidationError::InvalidPort));
        assert_eq!(validate("1.2.3.4:0"), Err(ValidationError::InvalidPort));
        assert_eq!(validate("1.2.3.4:abc"), Err(ValidationError::InvalidPort));
        assert_eq!(validate("1.2.3.4:-1:u:p"), Err(ValidationError::InvalidPort));
        assert_eq!(validate("1.2.3.4:"), Err(ValidationError::InvalidPort));
    }

    #[test]
    fn test_validate_port_bounds() {
        assert_eq!(validate("1.2.3.4:1").unwrap().port, 1);
        assert_eq!(validate("1.2.3.4:65535").unwrap().port, 65535);
        assert_eq!(validate("1.2.3.4:65536"), Err(ValidationError::InvalidPort));
    }

    #[test]
    fn test_validate_empty_credentials() {
        assert_eq!(
            validate("host:8080:user:"),
            Err(ValidationError::InvalidCredentials)
        );
        assert_eq!(
            validate("host:8080::pass"),
            Err(ValidationError::InvalidCredentials)
        );
    }

    #[test]
    fn test_validate_hostname_host() {
        assert!(validate("proxy-7.eu.example.com:1080").is_ok());
    }

    #[test]
    fn test_mask_four_parts() {
        assert_eq!(
            mask("1.2.3.4:8080:alice:verylongsecret"),
            "1.2.3.4:8080:alice:******"
        );
        assert_eq!(mask("host:1:u:p"), "host:1:u:******");
    }

    #[test]
    fn test_mask_other_arity_unchanged() {
        assert_eq!(mask("1.2.3.4:8080"), "1.2.3.4:8080");
        assert_eq!(mask("garbage"), "garbage");
        assert_eq!(mask(""), "");
        assert_eq!(mask("a:b:c:d:e"), "a:b:c:d:e");
    }

    #[test]
    fn test_mask_preserves_invalid_fields_verbatim() {
        // mask is display-only, it does not validate
        assert_eq!(mask("host:notaport:u:p"), "host:notaport:u:******");
    }
}
