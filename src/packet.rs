//! DNS packet helpers
//!
//! The forwarder treats DNS messages as opaque bytes wherever it can.
//! The helpers here cover the few places it cannot: reading the
//! transaction id, capping the advertised EDNS buffer size, and
//! extracting the question name that drives route selection.

use std::net::SocketAddr;

use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::{Name, RecordType};

use crate::error::{Error, Result};

/// Number of bytes in a DNS message header
pub const HEADER_BYTES: usize = 12;

/// The TC (truncation) bit in the DNS flags word at offset 2
pub const DNS_FLAG_TRUNCATED: u16 = 0x0200;

/// A DNS message paired with the address of the local caller it belongs to.
///
/// This is both the input to [`Forwarder::forward`](crate::Forwarder::forward)
/// and the shape delivered on the response channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw DNS message bytes
    pub bytes: Vec<u8>,
    /// Opaque caller address, echoed back with the response
    pub addr: SocketAddr,
}

/// Compute the transaction id of a DNS packet.
///
/// The id is the 16-bit DNS request id zero-extended to 64 bits. The
/// question is deliberately not hashed into the id: some upstreams
/// canonicalize question case in their responses, which would make the
/// response unmatchable.
pub fn txid(packet: &[u8]) -> u64 {
    if packet.len() < HEADER_BYTES {
        return 0;
    }
    u16::from_be_bytes([packet[0], packet[1]]) as u64
}

/// Attempt to limit the maximum EDNS response size advertised by `packet`.
///
/// This is not an exhaustive solution; only the easy case is handled in
/// the interest of speed and reduced complexity: an OPT record at the
/// very end of the message with no option codes. Anything else is left
/// untouched.
pub fn clamp_edns_size(packet: &mut [u8], max_size: u16) {
    // Size of an OPT record with no option codes.
    const OPT_FIXED_BYTES: usize = 11;
    const EDNS0_VERSION: u8 = 0;

    if packet.len() < HEADER_BYTES + OPT_FIXED_BYTES {
        return;
    }

    let ar_count = u16::from_be_bytes([packet[10], packet[11]]);
    if ar_count == 0 {
        // OPT shows up in an AR, so there must be no OPT.
        return;
    }

    // https://datatracker.ietf.org/doc/html/rfc6891#section-6.1.2
    let tail = packet.len() - OPT_FIXED_BYTES;
    let opt = &mut packet[tail..];

    if opt[0] != 0 {
        // OPT NAME must be 0 (root domain).
        return;
    }
    if u16::from_be_bytes([opt[1], opt[2]]) != u16::from(RecordType::OPT) {
        return;
    }
    let requested_size = u16::from_be_bytes([opt[3], opt[4]]);
    // opt[5] is the extended RCODE, ignored here.
    if opt[6] != EDNS0_VERSION {
        // Don't touch unknown versions.
        return;
    }
    // opt[7..9] are the EDNS flags, ignored here.
    if u16::from_be_bytes([opt[9], opt[10]]) != 0 {
        // RDLEN must be 0 (no variable length data); we're at the end
        // of the packet so it should be 0 anyway.
        return;
    }

    if requested_size <= max_size {
        return;
    }

    opt[3..5].copy_from_slice(&max_size.to_be_bytes());
}

/// Extract the normalized question name from a query packet.
///
/// Fails if the packet cannot be parsed, carries the response flag, or
/// has no question. The returned name is lowercased and fully qualified.
pub fn name_from_query(bs: &[u8]) -> Result<Name> {
    let message =
        Message::from_vec(bs).map_err(|e| Error::InvalidQuery(e.to_string()))?;

    if message.message_type() == MessageType::Response {
        return Err(Error::NotQuery);
    }

    let question = message
        .queries()
        .first()
        .ok_or_else(|| Error::InvalidQuery("DNS query has no questions".into()))?;

    let mut name = question.name().to_lowercase();
    name.set_fqdn(true);
    Ok(name)
}
