//! Suffix routing and upstream staggering
//!
//! Routes associate a domain suffix with an ordered set of upstream
//! resolvers. Lookup walks routes from the most to the least specific
//! suffix; `.` is the catch-all. Each resolver carries a start delay
//! computed once at configuration time so that the four equivalent
//! addresses of a well-known provider are raced with a stagger instead
//! of all at once.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::rr::Name;

use crate::config::ResolverSpec;
use crate::forwarder::RESPONSE_TIMEOUT;
use crate::well_known;

/// How long to artificially delay upstream queries to the "fallback"
/// DNS server IP of a known provider (e.g. how long to wait to query
/// Google's 8.8.4.4 after 8.8.8.8).
pub(crate) const WELL_KNOWN_HOST_BACKUP_DELAY: Duration = Duration::from_millis(200);

/// An upstream resolver and the delay to wait before querying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolverWithDelay {
    pub resolver: ResolverSpec,
    pub start_delay: Duration,
}

/// One suffix route: resolvers, most preferred first.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub suffix: Name,
    pub resolvers: Arc<[ResolverWithDelay]>,
}

/// Annotate `resolvers` with start delays.
///
/// If the set contains several addresses of the same well-known provider
/// the primary address per family goes first and the rest are treated as
/// backups, biased toward IPv4: a second IPv4 waits the backup delay,
/// and IPv6 addresses wait half the response timeout when two provider
/// IPv4s are present (on a dual-stack network v4 should win; on a
/// v6-only network the DoH dialer falls back to v6 on its own).
pub(crate) fn resolvers_with_delays(resolvers: Vec<ResolverSpec>) -> Vec<ResolverWithDelay> {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct HostAndFam {
        host: &'static str,
        v6: bool,
    }

    fn known_provider(spec: &ResolverSpec) -> Option<(&'static str, IpAddr)> {
        match spec {
            ResolverSpec::Udp { addr } => {
                well_known::doh_base_for_ip(addr.ip()).map(|base| (base, addr.ip()))
            }
            _ => None,
        }
    }

    // First pass: count how many addresses of each known provider are in
    // the list, per address family.
    let mut total: HashMap<HostAndFam, usize> = HashMap::new();
    for spec in &resolvers {
        if let Some((host, ip)) = known_provider(spec) {
            *total
                .entry(HostAndFam {
                    host,
                    v6: ip.is_ipv6(),
                })
                .or_default() += 1;
        }
    }

    let mut done: HashMap<HostAndFam, usize> = HashMap::new();
    resolvers
        .into_iter()
        .map(|spec| {
            let mut start_delay = Duration::ZERO;
            if let Some((host, ip)) = known_provider(&spec) {
                let key4 = HostAndFam { host, v6: false };
                let key6 = HostAndFam { host, v6: true };
                match ip {
                    IpAddr::V4(_) => {
                        if done.get(&key4).copied().unwrap_or(0) > 0 {
                            start_delay += WELL_KNOWN_HOST_BACKUP_DELAY;
                        }
                    }
                    IpAddr::V6(_) => {
                        let total4 = total.get(&key4).copied().unwrap_or(0);
                        if total4 >= 2 {
                            start_delay = RESPONSE_TIMEOUT / 2;
                        } else if total4 == 1 {
                            start_delay += WELL_KNOWN_HOST_BACKUP_DELAY;
                        }
                        if done.get(&key6).copied().unwrap_or(0) > 0 {
                            start_delay += WELL_KNOWN_HOST_BACKUP_DELAY;
                        }
                    }
                }
                *done
                    .entry(HostAndFam {
                        host,
                        v6: ip.is_ipv6(),
                    })
                    .or_default() += 1;
            }
            ResolverWithDelay {
                resolver: spec,
                start_delay,
            }
        })
        .collect()
}

/// Build a route table from a suffix map, most specific suffix first.
pub(crate) fn build_routes(routes_by_suffix: HashMap<Name, Vec<ResolverSpec>>) -> Arc<[Route]> {
    let mut routes: Vec<Route> = routes_by_suffix
        .into_iter()
        .map(|(suffix, resolvers)| Route {
            suffix: suffix.to_lowercase(),
            resolvers: resolvers_with_delays(resolvers).into(),
        })
        .collect();
    routes.sort_by(|a, b| b.suffix.num_labels().cmp(&a.suffix.num_labels()));
    routes.into()
}

/// The resolvers to use for `domain`: the first route whose suffix
/// contains it.
pub(crate) fn lookup(routes: &[Route], domain: &Name) -> Option<Arc<[ResolverWithDelay]>> {
    routes
        .iter()
        .find(|route| route.suffix.is_root() || route.suffix.zone_of(domain))
        .map(|route| route.resolvers.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_resolver;
    use std::str::FromStr;

    fn specs(addrs: &[&str]) -> Vec<ResolverSpec> {
        addrs.iter().map(|a| parse_resolver(a).unwrap()).collect()
    }

    fn delays(addrs: &[&str]) -> Vec<Duration> {
        resolvers_with_delays(specs(addrs))
            .into_iter()
            .map(|r| r.start_delay)
            .collect()
    }

    #[test]
    fn cloudflare_canonical_stagger() {
        assert_eq!(
            delays(&[
                "1.1.1.1",
                "1.0.0.1",
                "[2606:4700:4700::1111]",
                "[2606:4700:4700::1001]",
            ]),
            vec![
                Duration::ZERO,
                Duration::from_millis(200),
                Duration::from_millis(2500),
                Duration::from_millis(2700),
            ]
        );
    }

    #[test]
    fn google_canonical_stagger() {
        assert_eq!(
            delays(&[
                "8.8.8.8",
                "8.8.4.4",
                "[2001:4860:4860::8888]",
                "[2001:4860:4860::8844]",
            ]),
            vec![
                Duration::ZERO,
                Duration::from_millis(200),
                Duration::from_millis(2500),
                Duration::from_millis(2700),
            ]
        );
    }

    #[test]
    fn quad9_canonical_stagger() {
        assert_eq!(
            delays(&["9.9.9.9", "149.112.112.112", "[2620:fe::fe]", "[2620:fe::fe:9]"]),
            vec![
                Duration::ZERO,
                Duration::from_millis(200),
                Duration::from_millis(2500),
                Duration::from_millis(2700),
            ]
        );
    }

    #[test]
    fn single_v4_with_v6_backup() {
        assert_eq!(
            delays(&["8.8.8.8", "[2001:4860:4860::8888]"]),
            vec![Duration::ZERO, Duration::from_millis(200)]
        );
    }

    #[test]
    fn unknown_resolvers_are_not_delayed() {
        assert_eq!(
            delays(&["192.0.2.1", "192.0.2.2", "[2001:db8::1]"]),
            vec![Duration::ZERO, Duration::ZERO, Duration::ZERO]
        );
    }

    #[test]
    fn different_providers_do_not_delay_each_other() {
        assert_eq!(
            delays(&["1.1.1.1", "8.8.8.8", "9.9.9.9"]),
            vec![Duration::ZERO, Duration::ZERO, Duration::ZERO]
        );
    }

    #[test]
    fn doh_specs_are_not_delayed() {
        assert_eq!(
            delays(&[
                "https://cloudflare-dns.com/dns-query",
                "https://dns.google/dns-query",
            ]),
            vec![Duration::ZERO, Duration::ZERO]
        );
    }

    fn table(entries: &[(&str, &[&str])]) -> Arc<[Route]> {
        let mut map = HashMap::new();
        for (suffix, addrs) in entries {
            map.insert(Name::from_str(suffix).unwrap(), specs(addrs));
        }
        build_routes(map)
    }

    #[test]
    fn most_specific_suffix_wins() {
        let routes = table(&[
            (".", &["192.0.2.53"]),
            ("example.com.", &["192.0.2.1"]),
            ("corp.example.com.", &["192.0.2.2"]),
        ]);

        let domain = Name::from_str("host.corp.example.com.").unwrap();
        let resolvers = lookup(&routes, &domain).unwrap();
        assert_eq!(resolvers[0].resolver, parse_resolver("192.0.2.2").unwrap());

        let domain = Name::from_str("www.example.com.").unwrap();
        let resolvers = lookup(&routes, &domain).unwrap();
        assert_eq!(resolvers[0].resolver, parse_resolver("192.0.2.1").unwrap());
    }

    #[test]
    fn root_is_the_catch_all() {
        let routes = table(&[(".", &["192.0.2.53"]), ("example.com.", &["192.0.2.1"])]);
        let domain = Name::from_str("other.test.").unwrap();
        let resolvers = lookup(&routes, &domain).unwrap();
        assert_eq!(resolvers[0].resolver, parse_resolver("192.0.2.53").unwrap());
    }

    #[test]
    fn no_route_means_no_resolvers() {
        let routes = table(&[("example.com.", &["192.0.2.1"])]);
        let domain = Name::from_str("other.test.").unwrap();
        assert!(lookup(&routes, &domain).is_none());
    }

    #[test]
    fn suffix_match_is_case_insensitive() {
        let routes = table(&[("example.com.", &["192.0.2.1"])]);
        let domain = Name::from_str("WWW.EXAMPLE.COM.").unwrap();
        assert!(lookup(&routes, &domain).is_some());
    }
}
