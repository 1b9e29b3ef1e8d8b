//! dnsfwd - DNS forwarding resolver
//!
//! This crate forwards DNS query packets to upstream nameservers and
//! delivers the first valid response out-of-band on a caller-supplied
//! channel.
//!
//! Features:
//! - Longest-suffix routing of queries to per-domain resolver sets
//!   (`.` as the catch-all)
//! - Staggered racing of equivalent provider addresses (two IPv4 + two
//!   IPv6) instead of blasting all of them at once
//! - Transparent upgrade of well-known resolver IPs (Cloudflare,
//!   Google, Quad9) to DNS over HTTPS, with fallback to UDP
//! - Bootstrap resolution for DoH hostnames and a global cap on
//!   in-flight DoH requests
//! - Pluggable link selection so upstream traffic can be pinned to a
//!   specific local interface
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use dnsfwd::{parse_resolver, Forwarder, Name, Packet};
//!
//! # async fn example() -> dnsfwd::Result<()> {
//! let (response_tx, mut responses) = tokio::sync::mpsc::channel(128);
//! let forwarder = Forwarder::new(response_tx);
//!
//! let mut routes = HashMap::new();
//! routes.insert(
//!     Name::root(),
//!     vec![parse_resolver("1.1.1.1")?, parse_resolver("1.0.0.1")?],
//! );
//! forwarder.set_routes(routes);
//!
//! # let (query_bytes, caller_addr) = (Vec::new(), "127.0.0.1:5353".parse().unwrap());
//! // Query bytes and caller address come from the local interface.
//! forwarder
//!     .forward(Packet {
//!         bytes: query_bytes,
//!         addr: caller_addr,
//!     })
//!     .await?;
//!
//! if let Some(reply) = responses.recv().await {
//!     // Write reply.bytes back to reply.addr.
//! }
//! # Ok(())
//! # }
//! ```

mod close_pool;
mod config;
mod doh;
pub mod error;
mod forwarder;
mod link;
mod packet;
mod routes;
mod well_known;

pub use close_pool::{CloseHandle, ClosePool};
pub use config::{parse_resolver, ResolverSpec};
pub use error::{Error, Result};
pub use forwarder::{Forwarder, DEFAULT_MAX_RESPONSE_BYTES};
pub use link::{BindDeviceHook, LinkSelector};
pub use packet::{clamp_edns_size, name_from_query, txid, Packet, HEADER_BYTES};

/// Domain name type used for route suffixes, re-exported from
/// hickory-proto.
pub use hickory_proto::rr::Name;
