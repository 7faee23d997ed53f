//! SSRF guard for page URLs submitted to the ingest endpoint.

use crate::error::PlaylinkError;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Parse and vet a user-supplied page URL before anything fetches it.
///
/// Only absolute `http`/`https` URLs are accepted. IP literals in loopback,
/// private, link-local, unspecified or unique-local ranges are rejected.
/// Hostnames are not resolved, so DNS rebinding is not covered here.
///
/// # Errors
/// Returns [`PlaylinkError::InvalidUrl`] describing the first problem found.
pub fn validate_page_url(raw: &str) -> Result<Url, PlaylinkError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| PlaylinkError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(PlaylinkError::InvalidUrl(format!(
            "scheme '{}' not allowed",
            url.scheme()
        )));
    }

    let blocked = match url.host() {
        None => return Err(PlaylinkError::InvalidUrl(format!("no host in {raw}"))),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => is_internal_v4(ip),
        Some(Host::Ipv6(ip)) => is_internal_v6(ip),
    };
    if blocked {
        return Err(PlaylinkError::InvalidUrl(format!(
            "internal host not allowed: {}",
            url.host_str().unwrap_or_default()
        )));
    }

    Ok(url)
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.octets()[0] == 0
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_unspecified()
        || ip.is_loopback()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_pages() {
        let url = validate_page_url("https://videos.example/watch/clip-42#t=3").unwrap();
        assert_eq!(url.host_str(), Some("videos.example"));
        assert!(validate_page_url("http://203.0.113.7/watch/1").is_ok());
        assert!(validate_page_url("  https://videos.example/watch/1  ").is_ok());
    }

    #[test]
    fn rejects_internal_ipv4() {
        for url in [
            "http://127.0.0.1/watch",
            "http://10.1.2.3/watch",
            "http://172.20.0.1/watch",
            "http://192.168.1.1/watch",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.0.0.0/watch",
        ] {
            assert!(validate_page_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn rejects_internal_ipv6() {
        for url in [
            "http://[::1]/watch",
            "http://[fe80::1]/watch",
            "http://[fd00::1]/watch",
            "http://[::ffff:127.0.0.1]/watch",
        ] {
            assert!(validate_page_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn rejects_localhost_name() {
        assert!(validate_page_url("http://LOCALHOST:3000/watch").is_err());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        for url in ["ftp://videos.example/x", "file:///etc/passwd", "videos.example/x", ""] {
            assert!(matches!(
                validate_page_url(url),
                Err(PlaylinkError::InvalidUrl(_))
            ));
        }
    }
}
