//! DNS over HTTPS transport
//!
//! One long-lived HTTP client per DoH URL base, created on demand and
//! reused for the lifetime of the forwarder. Client construction folds
//! in bootstrap resolution for the endpoint hostname and seeds known
//! provider addresses (v4 before v6) so a failed v4 dial falls back to
//! a known v6. A global semaphore caps concurrent DoH requests, which
//! matters on memory-constrained targets without HTTP/2.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::well_known;

/// MIME type of DNS messages carried over HTTP
pub(crate) const DOH_CONTENT_TYPE: &str = "application/dns-message";

/// How long to keep idle HTTP connections to DoH servers open
const DOH_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on concurrent DoH requests. HTTP requests are heavier on mobile
/// targets built without HTTP/2, so the cap is tight there and
/// effectively unlimited elsewhere.
#[cfg(any(target_os = "ios", target_os = "android"))]
const MAX_DOH_IN_FLIGHT: usize = 10;
#[cfg(not(any(target_os = "ios", target_os = "android")))]
const MAX_DOH_IN_FLIGHT: usize = 1000;

/// Cache of per-URL-base HTTP clients plus the global in-flight cap.
pub(crate) struct DohClientPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
    in_flight: Semaphore,
}

impl DohClientPool {
    pub(crate) fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            in_flight: Semaphore::new(MAX_DOH_IN_FLIGHT),
        }
    }

    /// Fetch or create the HTTP client for `url_base`.
    pub(crate) async fn get(
        &self,
        url_base: &str,
        bootstrap: &[IpAddr],
    ) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.lock().get(url_base) {
            return Ok(client.clone());
        }

        let client = build_client(url_base, bootstrap).await?;

        // Two queries may have built clients concurrently; first insert
        // wins so every caller shares one connection pool.
        let mut clients = self.clients.lock();
        Ok(clients
            .entry(url_base.to_string())
            .or_insert(client)
            .clone())
    }

    /// Perform one DoH exchange: POST the query packet, return the
    /// response message bytes.
    pub(crate) async fn send_doh(
        &self,
        url_base: &str,
        client: &reqwest::Client,
        packet: &[u8],
    ) -> Result<Vec<u8>> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| Error::Closed)?;

        // Note: no Accept header. It is only a SHOULD in RFC 8484, no
        // provider has been observed to care about its absence, and the
        // bytes matter on mobile uplinks.
        let response = client
            .post(url_base)
            .header(header::CONTENT_TYPE, DOH_CONTENT_TYPE)
            .body(packet.to_vec())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("DoH request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::Transport(format!(
                "DoH server returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_type != DOH_CONTENT_TYPE {
            return Err(Error::Transport(format!(
                "unexpected DoH response Content-Type {:?}",
                content_type
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read DoH response: {}", e)))?;
        Ok(body.to_vec())
    }
}

/// Build the HTTP client for one DoH URL base.
///
/// Hostname endpoints get explicit address overrides: the system
/// resolver's answers first, bootstrap IPs as a fallback, and for
/// well-known bases the registry addresses ordered v4 before v6 so the
/// dialer's in-order attempts give the v4-to-v6 fallback.
async fn build_client(url_base: &str, bootstrap: &[IpAddr]) -> Result<reqwest::Client> {
    let url: reqwest::Url = url_base
        .parse()
        .map_err(|e| Error::Config(format!("invalid DoH URL '{}': {}", url_base, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("DoH URL '{}' has no host", url_base)))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_idle_timeout(DOH_TRANSPORT_TIMEOUT);

    if host.parse::<IpAddr>().is_err() {
        let mut addrs: Vec<SocketAddr> = Vec::new();

        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(resolved) => addrs.extend(resolved),
            Err(e) => {
                log::debug!("system resolution of DoH host {} failed: {}", host, e);
            }
        }
        addrs.extend(bootstrap.iter().map(|ip| SocketAddr::new(*ip, port)));

        // Known providers: their v4 addresses, then a known v6 so a
        // network where the v4 dial fails still connects on the
        // dialer's next attempt.
        addrs.extend(
            well_known::doh_ips_of_base(url_base)
                .iter()
                .filter(|ip| ip.is_ipv4())
                .map(|ip| SocketAddr::new(*ip, port)),
        );
        if let Some(ip6) = well_known::doh_v6_of_base(url_base) {
            addrs.push(SocketAddr::new(ip6, port));
        }

        addrs.dedup();
        if !addrs.is_empty() {
            builder = builder.resolve_to_addrs(&host, &addrs);
        }
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to create DoH client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clients_are_cached_per_base() {
        let pool = DohClientPool::new();
        let a = pool.get("http://127.0.0.1:8053/dns-query", &[]).await;
        let b = pool.get("http://127.0.0.1:8053/dns-query", &[]).await;
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(pool.clients.lock().len(), 1);
    }

    #[tokio::test]
    async fn distinct_bases_get_distinct_clients() {
        let pool = DohClientPool::new();
        pool.get("http://127.0.0.1:8053/dns-query", &[]).await.unwrap();
        pool.get("http://127.0.0.2:8053/dns-query", &[]).await.unwrap();
        assert_eq!(pool.clients.lock().len(), 2);
    }

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let pool = DohClientPool::new();
        let err = pool.get("not a url", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
