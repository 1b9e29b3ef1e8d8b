//! Well-known DoH-capable resolver addresses
//!
//! A build-time table mapping the anycast IPs of a few public resolvers
//! to their DoH URL bases. Plain UDP resolvers whose address appears
//! here are transparently upgraded to DoH, and the reverse index lets
//! the DoH dialer fall back from a v4 address to a known v6 one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;

/// (IP address, DoH URL base) pairs, grouped by provider.
const KNOWN_DOH: &[(&str, &str)] = &[
    // Cloudflare
    ("1.1.1.1", "https://cloudflare-dns.com/dns-query"),
    ("1.0.0.1", "https://cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1111", "https://cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1001", "https://cloudflare-dns.com/dns-query"),
    // Cloudflare -Malware
    ("1.1.1.2", "https://security.cloudflare-dns.com/dns-query"),
    ("1.0.0.2", "https://security.cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1112", "https://security.cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1002", "https://security.cloudflare-dns.com/dns-query"),
    // Cloudflare -Malware -Adult
    ("1.1.1.3", "https://family.cloudflare-dns.com/dns-query"),
    ("1.0.0.3", "https://family.cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1113", "https://family.cloudflare-dns.com/dns-query"),
    ("2606:4700:4700::1003", "https://family.cloudflare-dns.com/dns-query"),
    // Google
    ("8.8.8.8", "https://dns.google/dns-query"),
    ("8.8.4.4", "https://dns.google/dns-query"),
    ("2001:4860:4860::8888", "https://dns.google/dns-query"),
    ("2001:4860:4860::8844", "https://dns.google/dns-query"),
    // Quad9
    ("9.9.9.9", "https://dns.quad9.net/dns-query"),
    ("149.112.112.112", "https://dns.quad9.net/dns-query"),
    ("2620:fe::fe", "https://dns.quad9.net/dns-query"),
    ("2620:fe::fe:9", "https://dns.quad9.net/dns-query"),
];

fn by_ip() -> &'static HashMap<IpAddr, &'static str> {
    static BY_IP: OnceLock<HashMap<IpAddr, &'static str>> = OnceLock::new();
    BY_IP.get_or_init(|| {
        KNOWN_DOH
            .iter()
            .map(|(ip, base)| (ip.parse().expect("known DoH table IP"), *base))
            .collect()
    })
}

fn by_base() -> &'static HashMap<&'static str, Vec<IpAddr>> {
    static BY_BASE: OnceLock<HashMap<&'static str, Vec<IpAddr>>> = OnceLock::new();
    BY_BASE.get_or_init(|| {
        let mut map: HashMap<&'static str, Vec<IpAddr>> = HashMap::new();
        for (ip, base) in KNOWN_DOH {
            map.entry(base)
                .or_default()
                .push(ip.parse().expect("known DoH table IP"));
        }
        map
    })
}

/// The DoH URL base operated on `ip`, if `ip` belongs to a well-known
/// resolver.
pub(crate) fn doh_base_for_ip(ip: IpAddr) -> Option<&'static str> {
    by_ip().get(&ip).copied()
}

/// Every address known for a DoH URL base. Empty for unknown bases.
pub(crate) fn doh_ips_of_base(base: &str) -> &'static [IpAddr] {
    by_base().get(base).map(Vec::as_slice).unwrap_or(&[])
}

/// An IPv6 address known for a DoH URL base, used when a v4 dial fails.
pub(crate) fn doh_v6_of_base(base: &str) -> Option<IpAddr> {
    doh_ips_of_base(base).iter().copied().find(IpAddr::is_ipv6)
}
