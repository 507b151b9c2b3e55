//! ICMP echo handling: this stack only ever replies to Echo Request with
//! Echo Reply, optionally exposing received Echo Replies to the
//! application through a socket bound to an echo identifier.

use crate::iface::InterfaceInner;
use crate::socket::PollAt;
use crate::wire::{IcmpRepr, IpAddress, IpListenEndpoint, IpProtocol, IpRepr, Ipv4Repr};
use crate::wire::{Icmpv4Packet, Icmpv4Repr};

/// An ICMP packet ring buffer.
pub type PacketBuffer<'a> = crate::storage::PacketBuffer<'a, IpAddress>;

/// Type of endpoint to bind the ICMP socket to. See [`Socket::bind`] for
/// more details.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Endpoint {
    #[default]
    Unspecified,
    Ident(u16),
    Udp(IpListenEndpoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    Unaddressable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Exhausted,
}

/// A ICMP socket: the user-visible half of this stack's echo handling. The
/// stack-wide echo-reply responder (answering every well-formed Echo
/// Request) lives in the interface drive loop, not here; this socket
/// exists only so a local application can originate pings and read back
/// the replies.
#[derive(Debug)]
pub struct Socket<'a> {
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: PacketBuffer<'a>,
    /// The endpoint this socket is communicating with.
    endpoint: Endpoint,
    /// The time-to-live (IPv4) or hop limit (IPv6) value used in outgoing packets.
    hop_limit: Option<u8>,
}

impl<'a> Socket<'a> {
    /// Create an ICMP socket with the given buffers.
    pub fn new(rx_buffer: PacketBuffer<'a>, tx_buffer: PacketBuffer<'a>) -> Socket<'a> {
        Socket {
            rx_buffer,
            tx_buffer,
            endpoint: Default::default(),
            hop_limit: None,
        }
    }

    pub fn bind<T: Into<Endpoint>>(&mut self, endpoint: T) -> Result<(), BindError> {
        let endpoint = endpoint.into();
        if endpoint == Endpoint::Unspecified {
            return Err(BindError::Unaddressable);
        }
        self.endpoint = endpoint;
        self.rx_buffer.reset();
        self.tx_buffer.reset();
        Ok(())
    }

    pub fn close(&mut self) {
        self.endpoint = Endpoint::Unspecified;
    }

    pub fn is_open(&self) -> bool {
        self.endpoint != Endpoint::Unspecified
    }

    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        assert_ne!(hop_limit, Some(0));
        self.hop_limit = hop_limit;
    }

    pub fn hop_limit(&self) -> Option<u8> {
        self.hop_limit
    }

    pub fn can_send(&self) -> bool {
        !self.tx_buffer.is_full()
    }

    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    /// Queues one ICMP packet for `dst_addr`. `data` must be a fully formed
    /// ICMP packet, e.g. the bytes produced by emitting an
    /// [`Icmpv4Repr::EchoRequest`] — dispatch only adds the IP header.
    pub fn send_slice(&mut self, data: &[u8], dst_addr: IpAddress) -> Result<(), SendError> {
        self.tx_buffer
            .enqueue_slice(dst_addr, data)
            .map_err(|_| SendError::BufferFull)
    }

    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<(usize, IpAddress), RecvError> {
        self.rx_buffer
            .dequeue_with(|addr, payload| {
                let n = payload.len().min(data.len());
                data[..n].copy_from_slice(&payload[..n]);
                (n, *addr)
            })
            .map_err(|_| RecvError::Exhausted)
    }

    /// True if this socket should see an Echo Reply carrying `ident` (spec
    /// §4.4: applications bind by echo identifier, matching the kernel ping
    /// socket convention).
    pub fn accepts_ident(&self, ident: u16) -> bool {
        matches!(self.endpoint, Endpoint::Ident(id) if id == ident)
    }

    pub fn process(&mut self, src_addr: IpAddress, repr: &Icmpv4Repr<'_>) {
        if let Icmpv4Repr::EchoReply { data, .. } = repr {
            let _ = self.rx_buffer.enqueue_slice(src_addr, data);
        }
    }

    /// Whether this socket wants a shot at an inbound ICMPv4 message (spec
    /// §4.4: a socket bound by echo identifier only cares about replies
    /// carrying that identifier).
    pub(crate) fn accepts_v4(
        &self,
        _cx: &mut InterfaceInner,
        _ip_repr: &crate::wire::Ipv4Repr,
        repr: &Icmpv4Repr<'_>,
    ) -> bool {
        match repr {
            Icmpv4Repr::EchoReply { ident, .. } => self.accepts_ident(*ident),
            _ => false,
        }
    }

    pub(crate) fn process_v4(
        &mut self,
        _cx: &mut InterfaceInner,
        ip_repr: &crate::wire::Ipv4Repr,
        repr: &Icmpv4Repr<'_>,
    ) {
        self.process(IpAddress::Ipv4(ip_repr.src_addr), repr);
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if !self.tx_buffer.is_empty() {
            PollAt::Now
        } else {
            PollAt::Ingress
        }
    }

    /// Pops one queued outbound echo request, if any. `data` passed to
    /// [`Socket::send_slice`] must be a fully formed ICMP packet (the same
    /// bytes [`Icmpv4Repr::emit`] would produce) so dispatch only has to
    /// wrap it in an IP header, not reconstruct the echo fields.
    pub fn dispatch<F, E>(&mut self, cx: &mut InterfaceInner, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, (IpRepr, IcmpRepr)) -> Result<(), E>,
    {
        let hop_limit = self.hop_limit.unwrap_or(64);
        let checksum_caps = cx.checksum_caps();
        match self.tx_buffer.dequeue_with(|remote_addr, packet_buf| {
            #[allow(irrefutable_let_patterns)]
            let IpAddress::Ipv4(dst_addr) = *remote_addr;
            let icmp_packet = match Icmpv4Packet::new_checked(&packet_buf[..]) {
                Ok(p) => p,
                Err(_) => return Ok(()),
            };
            let icmp_repr = match Icmpv4Repr::parse(&icmp_packet, &checksum_caps) {
                Ok(r) => r,
                Err(_) => return Ok(()),
            };
            let ipv4_repr = Ipv4Repr {
                src_addr: cx.get_source_address_ipv4(&dst_addr).unwrap_or_default(),
                dst_addr,
                next_header: IpProtocol::Icmp,
                payload_len: icmp_repr.buffer_len(),
                hop_limit,
            };
            emit(cx, (IpRepr::Ipv4(ipv4_repr), IcmpRepr::Ipv4(icmp_repr)))
        }) {
            Ok(r) => r,
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_unspecified_rejected() {
        let mut s = Socket::new(PacketBuffer::new(4, 1024), PacketBuffer::new(4, 1024));
        assert_eq!(s.bind(Endpoint::Unspecified), Err(BindError::Unaddressable));
        assert!(s.bind(Endpoint::Ident(42)).is_ok());
        assert!(s.accepts_ident(42));
        assert!(!s.accepts_ident(43));
    }
}
