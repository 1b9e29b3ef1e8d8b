//! The DNS forwarding engine
//!
//! A [`Forwarder`] accepts query packets, races them against the
//! upstream resolvers selected by suffix routing, and delivers the
//! first valid response on a caller-supplied channel. Racing is
//! staggered per provider and address family, and plain UDP upstreams
//! whose address belongs to a well-known provider are transparently
//! upgraded to DoH with fallback to UDP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::rr::Name;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::close_pool::{CloseHandle, ClosePool, SocketCloser};
use crate::config::ResolverSpec;
use crate::doh::DohClientPool;
use crate::error::{Error, Result};
use crate::link::{self, BindDeviceHook, LinkSelector};
use crate::packet::{
    clamp_edns_size, name_from_query, txid, Packet, DNS_FLAG_TRUNCATED, HEADER_BYTES,
};
use crate::routes::{self, ResolverWithDelay, Route};
use crate::well_known;

/// The maximal amount of time to wait for a DNS response
pub(crate) const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default ceiling on UDP response size (the EDNS-recommended maximum
/// that avoids IP fragmentation)
pub const DEFAULT_MAX_RESPONSE_BYTES: u16 = 1232;

/// Forwards DNS packets to a number of upstream nameservers.
pub struct Forwarder {
    /// Channel by which responses are returned to the caller
    responses: mpsc::Sender<Packet>,

    /// Per-suffix resolvers to use, with the most specific routes first.
    /// Replaced wholesale; queries work on a snapshot.
    routes: Mutex<Arc<[Route]>>,

    /// Upstream transport state, shared with in-flight attempt tasks
    transports: Arc<Transports>,

    /// Latched close signal; flips to true once on `close`
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Forwarder {
    /// Create a forwarder delivering responses on `responses`, with the
    /// default response size ceiling and no link selection.
    pub fn new(responses: mpsc::Sender<Packet>) -> Self {
        Self::with_options(responses, DEFAULT_MAX_RESPONSE_BYTES, None, None)
    }

    /// Create a forwarder with an explicit UDP response ceiling and
    /// optional link selection.
    ///
    /// # Arguments
    /// * `responses` - sink for successfully forwarded responses
    /// * `max_response_bytes` - UDP receive ceiling; longer responses
    ///   are clipped and flagged truncated
    /// * `link_sel` - maps an upstream IP to a local interface name
    /// * `bind_hook` - platform capability applying the device binding
    pub fn with_options(
        responses: mpsc::Sender<Packet>,
        max_response_bytes: u16,
        link_sel: Option<Arc<dyn LinkSelector>>,
        bind_hook: Option<Arc<BindDeviceHook>>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            responses,
            routes: Mutex::new(Vec::new().into()),
            transports: Arc::new(Transports {
                doh: DohClientPool::new(),
                link_sel,
                bind_hook,
                max_response_bytes,
                cancel: cancel_rx.clone(),
            }),
            cancel_tx,
            cancel_rx,
        }
    }

    /// Cancel all in-flight queries and refuse new ones.
    pub fn close(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Replace the routing table.
    ///
    /// Resolver start delays are computed here, once per reconfiguration,
    /// not per query.
    pub fn set_routes(&self, routes_by_suffix: HashMap<Name, Vec<ResolverSpec>>) {
        let routes = routes::build_routes(routes_by_suffix);
        *self.routes.lock() = routes;
    }

    /// The resolvers to use for `domain`.
    fn resolvers(&self, domain: &Name) -> Option<Arc<[ResolverWithDelay]>> {
        let snapshot = self.routes.lock().clone();
        routes::lookup(&snapshot, domain)
    }

    /// Forward `query` to the upstream nameservers routed for its
    /// question and deliver the first response to the response channel.
    ///
    /// Individual upstream failures are not surfaced while another
    /// attempt may still succeed; if every attempt fails, the first
    /// recorded error is returned.
    pub async fn forward(&self, query: Packet) -> Result<()> {
        let mut cancel = self.cancel_rx.clone();
        if *cancel.borrow_and_update() {
            return Err(Error::Closed);
        }

        let Packet { mut bytes, addr } = query;
        let domain = name_from_query(&bytes)?;
        clamp_edns_size(&mut bytes, self.transports.max_response_bytes);

        let resolvers = self.resolvers(&domain).ok_or(Error::NoUpstreams)?;
        if resolvers.is_empty() {
            return Err(Error::NoUpstreams);
        }
        log::debug!(
            "forwarding query for {} to {} upstream(s)",
            domain,
            resolvers.len()
        );

        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        let fq = Arc::new(ForwardQuery {
            txid: txid(&bytes),
            packet: bytes,
            deadline,
            close_on_done: ClosePool::new(),
        });

        // First response wins: capacity 1, losers drop their result.
        let (first_tx, mut first_rx) = mpsc::channel::<Vec<u8>>(1);
        let first_err: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

        for rr in resolvers.iter() {
            let rr = rr.clone();
            let fq = fq.clone();
            let transports = self.transports.clone();
            let first_tx = first_tx.clone();
            let first_err = first_err.clone();
            let cancel = self.cancel_rx.clone();
            tokio::spawn(async move {
                let attempt = async {
                    if rr.start_delay > Duration::ZERO {
                        tokio::time::sleep(rr.start_delay).await;
                    }
                    transports.send(&fq, &rr.resolver).await
                };
                let result = tokio::select! {
                    res = tokio::time::timeout_at(deadline, attempt) => match res {
                        Ok(result) => result,
                        Err(_) => return, // deadline elapsed; the caller reports it
                    },
                    _ = closed(cancel) => return,
                };
                match result {
                    Ok(response) => {
                        let _ = first_tx.try_send(response);
                    }
                    Err(e) => {
                        let mut slot = first_err.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });
        }
        drop(first_tx);

        let result = tokio::select! {
            received = first_rx.recv() => match received {
                Some(response) => {
                    // The response channel may be full; keep honoring the
                    // deadline and the close signal during the handoff.
                    tokio::select! {
                        sent = self.responses.send(Packet { bytes: response, addr }) => {
                            sent.map_err(|_| Error::Transport("response channel closed".into()))
                        }
                        _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout),
                        _ = closed(cancel.clone()) => Err(Error::Closed),
                    }
                }
                // Every attempt already failed.
                None => Err(first_err.lock().take().unwrap_or(Error::Timeout)),
            },
            _ = tokio::time::sleep_until(deadline) => {
                Err(first_err.lock().take().unwrap_or(Error::Timeout))
            }
            _ = closed(cancel.clone()) => {
                Err(first_err.lock().take().unwrap_or(Error::Closed))
            }
        };

        fq.close_on_done.close();
        result
    }
}

/// Resolves once the forwarder has been closed (or dropped).
async fn closed(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Information and state about a forwarded DNS query racing one or more
/// upstreams.
struct ForwardQuery {
    txid: u64,
    packet: Vec<u8>,

    /// When this query gives up.
    deadline: Instant,

    /// Sockets with a read in flight register here so that finishing
    /// the query closes them as a group, instead of parking a watcher
    /// task per socket. Matters under bursty load on small targets.
    close_on_done: ClosePool,
}

/// Per-forwarder upstream transport state shared by racing attempts.
struct Transports {
    doh: DohClientPool,
    link_sel: Option<Arc<dyn LinkSelector>>,
    bind_hook: Option<Arc<BindDeviceHook>>,
    max_response_bytes: u16,

    /// Observer side of the forwarder's close latch.
    cancel: watch::Receiver<bool>,
}

impl Transports {
    /// Send the query to one upstream. Best effort; the caller races
    /// several of these.
    async fn send(&self, fq: &ForwardQuery, spec: &ResolverSpec) -> Result<Vec<u8>> {
        match spec {
            ResolverSpec::Doh { url, bootstrap } => {
                let client = self.doh.get(url, bootstrap).await?;
                self.doh.send_doh(url, &client, &fq.packet).await
            }
            ResolverSpec::Tls { .. } => Err(Error::TlsUnsupported),
            ResolverSpec::Udp { addr } => {
                // Upgrade well-known resolver IPs to DoH.
                if let Some(url_base) = well_known::doh_base_for_ip(addr.ip()) {
                    match self.send_doh_upgraded(fq, url_base).await {
                        Ok(response) => return Ok(response),
                        // Don't start a UDP retry for a query that is
                        // already done.
                        Err(e) if self.query_done(fq) => return Err(e),
                        Err(e) => {
                            log::warn!(
                                "DoH error from {}: {}; falling back to UDP",
                                addr.ip(),
                                e
                            );
                        }
                    }
                }
                self.send_udp(fq, *addr).await
            }
        }
    }

    async fn send_doh_upgraded(&self, fq: &ForwardQuery, url_base: &str) -> Result<Vec<u8>> {
        let client = self.doh.get(url_base, &[]).await?;
        self.doh.send_doh(url_base, &client, &fq.packet).await
    }

    /// Whether the query's deadline or the forwarder's close latch has
    /// already fired.
    fn query_done(&self, fq: &ForwardQuery) -> bool {
        Instant::now() >= fq.deadline || *self.cancel.borrow()
    }

    async fn send_udp(&self, fq: &ForwardQuery, dest: SocketAddr) -> Result<Vec<u8>> {
        let socket =
            link::bind_udp(dest.ip(), self.link_sel.as_ref(), self.bind_hook.as_ref()).await?;

        let closer = Arc::new(SocketCloser::new());
        let handle: Arc<dyn CloseHandle> = closer.clone();
        fq.close_on_done.add(handle.clone());
        let result = self.exchange_udp(&socket, &closer, fq, dest).await;
        fq.close_on_done.remove(&handle);
        result
    }

    async fn exchange_udp(
        &self,
        socket: &UdpSocket,
        closer: &SocketCloser,
        fq: &ForwardQuery,
        dest: SocketAddr,
    ) -> Result<Vec<u8>> {
        socket.send_to(&fq.packet, dest).await?;

        // One extra byte so an oversized response is detectable.
        let max = self.max_response_bytes as usize;
        let mut buf = vec![0u8; max + 1];
        let n = tokio::select! {
            received = socket.recv_from(&mut buf) => received.map(|(n, _)| n)?,
            _ = closer.wait_closed() => return Err(Error::Closed),
        };

        let truncated = n > max;
        let n = if truncated { max } else { n };
        if n < HEADER_BYTES {
            log::debug!("recv: packet too small ({} bytes)", n);
        }
        buf.truncate(n);

        if txid(&buf) != fq.txid {
            return Err(Error::TxidMismatch);
        }

        if truncated && buf.len() >= 4 {
            // RFC 1035 section 6.2 says truncation should head-drop so
            // the authority section survives, but the UDP read already
            // tail-dropped; setting TC is what's left.
            let flags = u16::from_be_bytes([buf[2], buf[3]]) | DNS_FLAG_TRUNCATED;
            buf[2..4].copy_from_slice(&flags.to_be_bytes());
        }

        clamp_edns_size(&mut buf, self.max_response_bytes);

        Ok(buf)
    }
}
