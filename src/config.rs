//! Upstream resolver specification parsing
//!
//! Parses resolver specifications in the supported formats:
//! - `IP` or `IP:port` - plain UDP resolver (port defaults to 53)
//! - `http://...` or `https://...` - DNS over HTTPS (DoH) endpoint
//! - `tls://...` - recognized, but queries against it fail until DoT
//!   support exists

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Specification for an upstream DNS resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverSpec {
    /// Plain UDP resolver
    Udp { addr: SocketAddr },

    /// DNS over HTTPS endpoint.
    ///
    /// `bootstrap` lists IP addresses used to reach the endpoint's
    /// hostname when the system resolver cannot resolve it.
    Doh {
        url: String,
        bootstrap: Vec<IpAddr>,
    },

    /// DNS over TLS endpoint. Parsed so that configuration survives,
    /// but every query attempt against it fails with
    /// [`Error::TlsUnsupported`].
    Tls { host: String },
}

impl ResolverSpec {
    /// Get a human-readable description of this resolver type
    pub fn kind(&self) -> &'static str {
        match self {
            ResolverSpec::Udp { .. } => "UDP",
            ResolverSpec::Doh { .. } => "DoH",
            ResolverSpec::Tls { .. } => "DoT",
        }
    }
}

impl std::fmt::Display for ResolverSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolverSpec::Udp { addr } => write!(f, "{}", addr),
            ResolverSpec::Doh { url, .. } => write!(f, "{}", url),
            ResolverSpec::Tls { host } => write!(f, "tls://{}", host),
        }
    }
}

/// Parse a resolver specification string
///
/// Supported formats:
/// - `8.8.8.8` - UDP to 8.8.8.8:53
/// - `8.8.8.8:5353` - UDP to 8.8.8.8:5353
/// - `[2001:4860:4860::8888]` - UDP over IPv6, port 53
/// - `[2001:4860:4860::8888]:5353` - UDP over IPv6, explicit port
/// - `https://cloudflare-dns.com/dns-query` - DoH
/// - `tls://dns.google` - DoT (currently rejected at query time)
pub fn parse_resolver(s: &str) -> Result<ResolverSpec> {
    let s = s.trim();

    if s.starts_with("http://") || s.starts_with("https://") {
        return Ok(ResolverSpec::Doh {
            url: s.to_string(),
            bootstrap: Vec::new(),
        });
    }

    if let Some(host) = s.strip_prefix("tls://") {
        if host.is_empty() {
            return Err(Error::Config("empty hostname in DoT spec".into()));
        }
        return Ok(ResolverSpec::Tls {
            host: host.to_string(),
        });
    }

    let addr = parse_socket_addr(s, 53)?;
    Ok(ResolverSpec::Udp { addr })
}

/// Parse an IP address with optional port, defaulting to the given port
fn parse_socket_addr(s: &str, default_port: u16) -> Result<SocketAddr> {
    // Try parsing as full socket address first
    if let Ok(addr) = SocketAddr::from_str(s) {
        return Ok(addr);
    }

    // Handle IPv6 addresses in brackets [::1]:port or [::1]
    if s.starts_with('[') {
        if let Some(bracket_end) = s.find(']') {
            let ip_str = &s[1..bracket_end];
            let ip = ip_str
                .parse::<IpAddr>()
                .map_err(|e| Error::Config(format!("invalid IP address '{}': {}", ip_str, e)))?;

            let port = if s.len() > bracket_end + 1 && s.as_bytes()[bracket_end + 1] == b':' {
                s[bracket_end + 2..]
                    .parse::<u16>()
                    .map_err(|e| Error::Config(format!("invalid port: {}", e)))?
            } else {
                default_port
            };

            return Ok(SocketAddr::new(ip, port));
        }
    }

    // Try parsing as IP address only (no port)
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    // Handle IPv4 with port: 1.2.3.4:5353
    if let Some(colon_pos) = s.rfind(':') {
        let ip_str = &s[..colon_pos];
        let port_str = &s[colon_pos + 1..];

        let ip = ip_str
            .parse::<IpAddr>()
            .map_err(|e| Error::Config(format!("invalid IP address '{}': {}", ip_str, e)))?;
        let port = port_str
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("invalid port '{}': {}", port_str, e)))?;

        return Ok(SocketAddr::new(ip, port));
    }

    Err(Error::Config(format!(
        "cannot parse resolver address '{}'",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_udp_ip_only() {
        let spec = parse_resolver("8.8.8.8").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Udp {
                addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53)
            }
        );
    }

    #[test]
    fn parse_udp_with_port() {
        let spec = parse_resolver("8.8.8.8:5353").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Udp {
                addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 5353)
            }
        );
    }

    #[test]
    fn parse_ipv6() {
        let spec = parse_resolver("[2001:4860:4860::8888]").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Udp {
                addr: SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
                    53
                )
            }
        );
    }

    #[test]
    fn parse_ipv6_with_port() {
        let spec = parse_resolver("[2001:4860:4860::8888]:5353").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Udp {
                addr: SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
                    5353
                )
            }
        );
    }

    #[test]
    fn parse_doh_https() {
        let spec = parse_resolver("https://cloudflare-dns.com/dns-query").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Doh {
                url: "https://cloudflare-dns.com/dns-query".to_string(),
                bootstrap: Vec::new(),
            }
        );
    }

    #[test]
    fn parse_doh_plain_http() {
        let spec = parse_resolver("http://127.0.0.1:8053/dns-query").unwrap();
        assert!(matches!(spec, ResolverSpec::Doh { .. }));
    }

    #[test]
    fn parse_tls_is_recognized() {
        let spec = parse_resolver("tls://dns.google").unwrap();
        assert_eq!(
            spec,
            ResolverSpec::Tls {
                host: "dns.google".to_string()
            }
        );
    }

    #[test]
    fn parse_tls_empty_host() {
        assert!(parse_resolver("tls://").is_err());
    }

    #[test]
    fn parse_invalid_address() {
        assert!(parse_resolver("not.an.ip").is_err());
        assert!(parse_resolver("8.8.8.8:notaport").is_err());
    }

    #[test]
    fn display() {
        assert_eq!(
            format!(
                "{}",
                ResolverSpec::Udp {
                    addr: "8.8.8.8:53".parse().unwrap()
                }
            ),
            "8.8.8.8:53"
        );
        assert_eq!(
            format!(
                "{}",
                ResolverSpec::Doh {
                    url: "https://dns.example.com/dns-query".into(),
                    bootstrap: Vec::new(),
                }
            ),
            "https://dns.example.com/dns-query"
        );
        assert_eq!(
            format!(
                "{}",
                ResolverSpec::Tls {
                    host: "dns.google".into()
                }
            ),
            "tls://dns.google"
        );
    }
}
