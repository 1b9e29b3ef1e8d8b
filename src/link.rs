//! Link selection boundary
//!
//! The host application may care which local interface an upstream query
//! leaves through (VPN setups in particular must keep DNS traffic off
//! the tunnel it serves). The forwarder only consumes a capability that
//! maps a destination IP to an interface name, plus an injected hook
//! that applies the OS-specific socket binding.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::Result;

/// Picks the local interface to use for reaching an upstream IP.
pub trait LinkSelector: Send + Sync {
    /// The name of the interface to bind to when dialing `ip`.
    /// `None` (or an empty name) selects the default route.
    fn pick_link(&self, ip: IpAddr) -> Option<String>;
}

/// Platform hook that binds a socket to a named interface
/// (e.g. `SO_BINDTODEVICE` on Linux). Injected at startup; when absent,
/// sockets use the default binding.
pub type BindDeviceHook = dyn Fn(&Socket, &str) -> io::Result<()> + Send + Sync;

/// Bind a fresh UDP socket suitable for reaching `dest`.
///
/// When a link selector picks an interface and a bind hook is available,
/// the socket is bound to that device; hook errors surface to the
/// caller. Otherwise the socket binds the family-matched wildcard
/// address on an ephemeral port.
pub(crate) async fn bind_udp(
    dest: IpAddr,
    link_sel: Option<&Arc<dyn LinkSelector>>,
    bind_hook: Option<&Arc<BindDeviceHook>>,
) -> Result<UdpSocket> {
    let wildcard: SocketAddr = match dest {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let link = link_sel
        .and_then(|sel| sel.pick_link(dest))
        .filter(|name| !name.is_empty());

    match (link, bind_hook) {
        (Some(link), Some(hook)) => {
            let domain = if dest.is_ipv6() {
                Domain::IPV6
            } else {
                Domain::IPV4
            };
            let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
            hook(&socket, &link)?;
            socket.set_nonblocking(true)?;
            socket.bind(&wildcard.into())?;
            let socket: std::net::UdpSocket = socket.into();
            Ok(UdpSocket::from_std(socket)?)
        }
        _ => Ok(UdpSocket::bind(wildcard).await?),
    }
}
