//! SSRF screen for outbound HTTP: scheme, loopback, link-local metadata
//! ranges, and private networks.
//!
//! Applied to declared base URLs at the capability gate and again on every
//! call. The screen works on the URL's literal host; names on the
//! `allow_hosts` list or under `allow_private_network` are exempt from the
//! private-range rules, never from the scheme rule.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use super::{SecurityPolicy, ToolError};

/// Validates a URL against the screen. Returns the parsed URL on success.
pub fn screen_url(raw: &str, policy: &SecurityPolicy) -> Result<Url, ToolError> {
    let url = Url::parse(raw).map_err(|e| ToolError::InvalidInput(format!("url {:?}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ToolError::Blocked(format!(
                "scheme {:?} not allowed (http, https only)",
                other
            )))
        }
    }
    let host = url
        .host()
        .ok_or_else(|| ToolError::InvalidInput(format!("url {:?} has no host", raw)))?;

    let allowed = |name: &str| policy.allow_hosts.iter().any(|h| h == name);

    match host {
        Host::Domain(name) => {
            if name.eq_ignore_ascii_case("localhost") && !allowed(name) {
                return Err(ToolError::Blocked("loopback host".to_string()));
            }
        }
        Host::Ipv4(ip) => {
            let name = ip.to_string();
            if !allowed(&name) {
                screen_ipv4(ip, policy)?;
            }
        }
        Host::Ipv6(ip) => {
            let name = ip.to_string();
            if !allowed(&name) {
                screen_ipv6(ip, policy)?;
            }
        }
    }
    Ok(url)
}

fn screen_ipv4(ip: Ipv4Addr, policy: &SecurityPolicy) -> Result<(), ToolError> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(ToolError::Blocked(format!("loopback address {}", ip)));
    }
    if ip.is_link_local() {
        return Err(ToolError::Blocked(format!(
            "link-local metadata address {}",
            ip
        )));
    }
    if ip.is_private() && !policy.allow_private_network {
        return Err(ToolError::Blocked(format!(
            "private network address {} (set security.allow_private_network to permit)",
            ip
        )));
    }
    Ok(())
}

fn screen_ipv6(ip: Ipv6Addr, policy: &SecurityPolicy) -> Result<(), ToolError> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(ToolError::Blocked(format!("loopback address {}", ip)));
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return screen_ipv4(v4, policy);
    }
    let segments = ip.segments();
    // fe80::/10 link-local, fc00::/7 unique-local
    let link_local = (segments[0] & 0xffc0) == 0xfe80;
    let unique_local = (segments[0] & 0xfe00) == 0xfc00;
    if link_local {
        return Err(ToolError::Blocked(format!("link-local address {}", ip)));
    }
    if unique_local && !policy.allow_private_network {
        return Err(ToolError::Blocked(format!(
            "private network address {} (set security.allow_private_network to permit)",
            ip
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    /// **Scenario**: public https URLs pass the screen.
    #[test]
    fn public_urls_pass() {
        assert!(screen_url("https://example.com/api", &policy()).is_ok());
        assert!(screen_url("http://93.184.216.34/", &policy()).is_ok());
    }

    /// **Scenario**: non-http schemes are blocked regardless of host.
    #[test]
    fn bad_schemes_blocked() {
        for raw in ["file:///etc/passwd", "ftp://example.com", "gopher://x"] {
            let err = screen_url(raw, &policy()).unwrap_err();
            assert!(matches!(err, ToolError::Blocked(_)), "{raw}: {err}");
        }
    }

    /// **Scenario**: loopback in every spelling is blocked.
    #[test]
    fn loopback_blocked() {
        for raw in [
            "http://127.0.0.1/",
            "http://localhost/",
            "http://0.0.0.0/",
            "http://[::1]/",
        ] {
            let err = screen_url(raw, &policy()).unwrap_err();
            assert!(matches!(err, ToolError::Blocked(_)), "{raw}: {err}");
        }
    }

    /// **Scenario**: the 169.254.0.0/16 metadata range is always blocked.
    #[test]
    fn link_local_metadata_blocked() {
        let err = screen_url("http://169.254.169.254/latest/meta-data", &policy()).unwrap_err();
        assert!(matches!(err, ToolError::Blocked(_)), "{err}");
        let mut open = policy();
        open.allow_private_network = true;
        // allow_private_network does not open the metadata range
        assert!(screen_url("http://169.254.169.254/", &open).is_err());
    }

    /// **Scenario**: RFC1918 blocked by default, allowed with the flag or allow-list.
    #[test]
    fn private_ranges() {
        for raw in ["http://10.0.0.8/", "http://172.16.1.1/", "http://192.168.0.5/"] {
            assert!(screen_url(raw, &policy()).is_err(), "{raw}");
        }
        let mut open = policy();
        open.allow_private_network = true;
        assert!(screen_url("http://10.0.0.8/", &open).is_ok());

        let mut listed = policy();
        listed.allow_hosts = vec!["192.168.0.5".into()];
        assert!(screen_url("http://192.168.0.5/", &listed).is_ok());
    }
}
