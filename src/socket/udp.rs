//! UDP sockets: per-port datagram queues with no connection state (spec
//! §4.5). Each socket owns one rx queue and one tx queue of whole datagrams;
//! delivery is matched against the stack's port table rather than found by
//! scanning every socket on every packet.

use crate::iface::InterfaceInner;
use crate::phy::{ChecksumCapabilities, PacketMeta};
use crate::socket::PollAt;
use crate::wire::{IpAddress, IpEndpoint, IpListenEndpoint, IpProtocol, IpRepr, UdpRepr};

/// A UDP packet ring buffer.
pub type PacketBuffer<'a> = crate::storage::PacketBuffer<'a, UdpMetadata>;

/// Metadata for a sent or received UDP packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct UdpMetadata {
    /// The IP endpoint from which an incoming datagram was received, or to which an outgoing
    /// datagram will be sent.
    pub endpoint: IpEndpoint,
    /// The IP address to which an incoming datagram was sent, or from which an outgoing datagram
    /// will be sent. Incoming datagrams always have this set.
    pub local_address: Option<IpAddress>,
    pub meta: PacketMeta,
}

/// Errors returned by [`Socket::send_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Unaddressable,
    BufferFull,
}

/// Errors returned by [`Socket::recv_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Exhausted,
}

/// Errors returned by [`Socket::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    Unaddressable,
}

/// A User Datagram Protocol socket.
///
/// A UDP socket is bound to a specific endpoint, and owns transmit and receive
/// packet buffers. Binding to port 0 is rejected: there is no ephemeral
/// port auto-assignment by the socket layer itself.
#[derive(Debug)]
pub struct Socket<'a> {
    endpoint: IpListenEndpoint,
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: PacketBuffer<'a>,
    hop_limit: Option<u8>,
    /// Whether sends to broadcast/multicast destinations are permitted.
    broadcast: bool,
}

impl<'a> Socket<'a> {
    /// Create an UDP socket with the given buffers.
    pub fn new(rx_buffer: PacketBuffer<'a>, tx_buffer: PacketBuffer<'a>) -> Socket<'a> {
        Socket {
            endpoint: IpListenEndpoint::default(),
            rx_buffer,
            tx_buffer,
            hop_limit: None,
            broadcast: false,
        }
    }

    pub fn endpoint(&self) -> IpListenEndpoint {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.port != 0
    }

    pub fn bind<T: Into<IpListenEndpoint>>(&mut self, endpoint: T) -> Result<(), BindError> {
        let endpoint = endpoint.into();
        if endpoint.port == 0 {
            return Err(BindError::Unaddressable);
        }
        self.endpoint = endpoint;
        self.rx_buffer.reset();
        self.tx_buffer.reset();
        Ok(())
    }

    pub fn close(&mut self) {
        self.endpoint = IpListenEndpoint::default();
        self.rx_buffer.reset();
        self.tx_buffer.reset();
    }

    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        assert_ne!(hop_limit, Some(0));
        self.hop_limit = hop_limit;
    }

    pub fn hop_limit(&self) -> Option<u8> {
        self.hop_limit
    }

    pub fn allow_broadcast(&mut self, allow: bool) {
        self.broadcast = allow;
    }

    pub fn can_send(&self) -> bool {
        !self.tx_buffer.is_full()
    }

    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    /// Enqueues a datagram to be sent via [`Socket::dispatch`]. Fails if the
    /// destination is a broadcast address and broadcast sending hasn't been
    /// enabled, or if the tx queue has no room.
    pub fn send_slice(&mut self, data: &[u8], meta: UdpMetadata) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Unaddressable);
        }
        if meta.endpoint.addr.is_broadcast() && !self.broadcast {
            return Err(SendError::Unaddressable);
        }
        self.tx_buffer
            .enqueue_slice(meta, data)
            .map_err(|_| SendError::BufferFull)
    }

    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<(usize, UdpMetadata), RecvError> {
        self.rx_buffer
            .dequeue_with(|meta, payload| {
                let n = payload.len().min(data.len());
                data[..n].copy_from_slice(&payload[..n]);
                (n, *meta)
            })
            .map_err(|_| RecvError::Exhausted)
    }

    /// Returns true if an incoming datagram addressed to `local_addr:dst_port`
    /// should be delivered to this socket: the bound port matches, and
    /// either it's bound to INADDR_ANY or to the exact address.
    pub fn accepts(&self, local_addr: &IpAddress, dst_port: u16) -> bool {
        if self.endpoint.port != dst_port {
            return false;
        }
        match self.endpoint.addr {
            Some(addr) => addr == *local_addr,
            None => true,
        }
    }

    /// Processes an inbound UDP datagram already matched to this socket by
    /// port lookup. Drops it silently if the receive queue has no room,
    /// since UDP delivery is not guaranteed.
    pub fn process(&mut self, ip_repr: &IpRepr, repr: &UdpRepr, payload: &[u8], meta: PacketMeta) {
        let metadata = UdpMetadata {
            endpoint: IpEndpoint::new(ip_repr.src_addr(), repr.src_port),
            local_address: Some(ip_repr.dst_addr()),
            meta,
        };
        let _ = self.rx_buffer.enqueue_slice(metadata, payload);
    }

    /// Pops one queued outbound datagram, if any, and hands its repr/payload
    /// to `emit` to be wrapped in an IP header and transmitted.
    pub fn dispatch<F, E>(
        &mut self,
        _checksum_caps: &ChecksumCapabilities,
        mut emit: F,
    ) -> Result<(), E>
    where
        F: FnMut(IpRepr, UdpRepr, &[u8]) -> Result<(), E>,
    {
        let hop_limit = self.hop_limit.unwrap_or(64);
        let endpoint = self.endpoint;
        match self.tx_buffer.dequeue_with(|meta, payload| {
            let src_addr = meta.local_address.unwrap_or(meta.endpoint.addr);
            let repr = UdpRepr {
                src_port: endpoint.port,
                dst_port: meta.endpoint.port,
            };
            let ip_repr = IpRepr::new(
                src_addr,
                meta.endpoint.addr,
                IpProtocol::Udp,
                repr.header_len() + payload.len(),
                hop_limit,
            );
            emit(ip_repr, repr, payload)
        }) {
            Ok(r) => r,
            Err(_) => Ok(()),
        }
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if !self.tx_buffer.is_empty() {
            PollAt::Now
        } else {
            PollAt::Ingress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket() -> Socket<'static> {
        Socket::new(PacketBuffer::new(4, 4096), PacketBuffer::new(4, 4096))
    }

    #[test]
    fn bind_rejects_port_zero() {
        let mut s = socket();
        assert_eq!(s.bind(0u16), Err(BindError::Unaddressable));
    }

    #[test]
    fn accepts_matches_port_and_any_address() {
        let mut s = socket();
        s.bind(53u16).unwrap();
        assert!(s.accepts(&IpAddress::v4(10, 0, 0, 1), 53));
        assert!(!s.accepts(&IpAddress::v4(10, 0, 0, 1), 54));
    }

    #[test]
    fn send_without_broadcast_allowed_is_rejected() {
        let mut s = socket();
        s.bind(9000u16).unwrap();
        let meta = UdpMetadata {
            endpoint: IpEndpoint::new(IpAddress::v4(255, 255, 255, 255), 9000),
            local_address: None,
            meta: PacketMeta::default(),
        };
        assert_eq!(s.send_slice(b"hi", meta), Err(SendError::Unaddressable));
        s.allow_broadcast(true);
        assert!(s.send_slice(b"hi", meta).is_ok());
    }
}
