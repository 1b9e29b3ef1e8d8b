//! Error types for DNS forwarding operations

use thiserror::Error;

/// Result type alias for DNS forwarding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while forwarding DNS queries
#[derive(Debug, Error)]
pub enum Error {
    /// The query packet could not be parsed
    #[error("invalid DNS query: {0}")]
    InvalidQuery(String),

    /// The packet carries the response flag and cannot be forwarded
    #[error("packet is a DNS response, not a query")]
    NotQuery,

    /// No route matched the queried domain
    #[error("upstream nameservers not set")]
    NoUpstreams,

    /// tls:// resolver specs are recognized but not implemented
    #[error("tls:// resolvers not supported yet")]
    TlsUnsupported,

    /// An upstream answered with a transaction id that does not match the query
    #[error("response transaction id does not match the query")]
    TxidMismatch,

    /// No upstream produced a response within the per-query deadline
    #[error("DNS query timed out")]
    Timeout,

    /// The forwarder was closed while the query was in flight
    #[error("forwarder is closed")]
    Closed,

    /// Upstream transport failure (UDP exchange, TCP dial, HTTP round-trip)
    #[error("DNS transport error: {0}")]
    Transport(String),

    /// Resolver specification or DoH client configuration error
    #[error("DNS configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
