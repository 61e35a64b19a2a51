//! UDP transport: one bincode-encoded [`Envelope`] per datagram.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use swim_types::{
    Envelope, Header, NodeAddr, ParentSet, PeerAddress, Pong, RelayHeader, Route, Rumor,
    SwimMessage,
};
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::error::Result;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Most gossip rumors one pong can carry and still fit in a datagram.
///
/// Sized for the widest encoding: every address IPv6 and NAT'd behind
/// `parent_count` parents, and the pong relayed through a parent.
pub fn rumor_capacity(parent_count: usize) -> Result<usize> {
    let widest_addr = |id: u32| NodeAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), u16::MAX, id);
    let parents = ParentSet::new((0..parent_count).map(|id| widest_addr(id as u32)));
    let widest = PeerAddress::nated(widest_addr(u32::MAX), parents);

    let empty = Envelope {
        route: Route::Relay(RelayHeader {
            actual_source: widest.clone(),
            inner: Header::new(widest.clone(), widest.clone()),
        }),
        payload: SwimMessage::Pong(Pong {
            ping_nr: u64::MAX,
            incarnation: u64::MAX,
            ..Default::default()
        })
        .into(),
    };
    let overhead = bincode::serialized_size(&empty)?;
    let rumor = bincode::serialized_size(&Rumor::new(widest, u64::MAX))?;

    let room = (MAX_DATAGRAM as u64).saturating_sub(overhead);
    Ok(usize::try_from(room / rumor.max(1)).unwrap_or(usize::MAX))
}

/// A bound UDP socket speaking envelopes.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Bind to `addr` with the given socket buffer sizes.
    pub async fn bind(addr: SocketAddr, sndbuf: usize, rcvbuf: usize) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        // Buffer sizes must be set before binding.
        socket.set_send_buffer_size(sndbuf)?;
        socket.set_recv_buffer_size(rcvbuf)?;
        socket.set_reuse_address(true)?;

        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        info!(
            local = %socket.local_addr()?,
            sndbuf,
            rcvbuf,
            "UDP transport bound"
        );

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Encode `envelope` and send it to its next hop.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let bytes = bincode::serialize(envelope)?;
        let to = envelope.next_hop().socket_addr();
        trace!(%to, len = bytes.len(), "sending datagram");
        self.socket.send_to(&bytes, to).await?;
        Ok(())
    }

    /// Receive and decode one envelope. `buf` should hold [`MAX_DATAGRAM`]
    /// bytes.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(Envelope, SocketAddr)> {
        let (len, from) = self.socket.recv_from(buf).await?;
        let envelope = bincode::deserialize(&buf[..len])?;
        Ok((envelope, from))
    }
}
