//! The socket types an application hands to an [`Interface`](crate::iface::Interface):
//! ICMP echo, UDP and TCP. Each protocol module is self-contained and only
//! knows how to process one inbound segment and produce one outbound
//! segment at a time; the interface drives all of them the same way
//! through the [`Socket`] enum below.

pub mod icmp;
pub mod tcp;
pub mod udp;

use crate::iface::InterfaceInner;
use crate::time::Instant;

/// How soon a socket would like [`crate::iface::Interface::poll`] called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAt {
    /// The socket needs to be polled immediately.
    Now,
    /// The socket needs to be polled at the given time.
    Time(Instant),
    /// The socket does not need to be polled until a new packet for it arrives.
    Ingress,
}

/// A network socket of any supported protocol.
#[derive(Debug)]
pub enum Socket<'a> {
    Icmp(icmp::Socket<'a>),
    Udp(udp::Socket<'a>),
    Tcp(tcp::Socket<'a>),
}

impl<'a> Socket<'a> {
    pub(crate) fn poll_at(&self, cx: &mut InterfaceInner) -> PollAt {
        match self {
            Socket::Icmp(s) => s.poll_at(cx),
            Socket::Udp(s) => s.poll_at(cx),
            Socket::Tcp(s) => s.poll_at(cx),
        }
    }
}

impl<'a> From<icmp::Socket<'a>> for Socket<'a> {
    fn from(socket: icmp::Socket<'a>) -> Self {
        Socket::Icmp(socket)
    }
}

impl<'a> From<udp::Socket<'a>> for Socket<'a> {
    fn from(socket: udp::Socket<'a>) -> Self {
        Socket::Udp(socket)
    }
}

impl<'a> From<tcp::Socket<'a>> for Socket<'a> {
    fn from(socket: tcp::Socket<'a>) -> Self {
        Socket::Tcp(socket)
    }
}

/// Lets socket-set code go from the dynamically-typed [`Socket`] enum back to
/// a concrete protocol type, e.g. to filter the set down to every ICMP
/// socket when deciding who gets a shot at an inbound Echo Reply.
pub trait AnySocket<'a>: Sized {
    fn downcast(socket: &Socket<'a>) -> Option<&Self>;
    fn downcast_mut(socket: &mut Socket<'a>) -> Option<&mut Self>;
}

macro_rules! any_socket {
    ($variant:ident, $ty:ty) => {
        impl<'a> AnySocket<'a> for $ty {
            fn downcast(socket: &Socket<'a>) -> Option<&Self> {
                match socket {
                    Socket::$variant(s) => Some(s),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }

            fn downcast_mut(socket: &mut Socket<'a>) -> Option<&mut Self> {
                match socket {
                    Socket::$variant(s) => Some(s),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

any_socket!(Icmp, icmp::Socket<'a>);
any_socket!(Udp, udp::Socket<'a>);
any_socket!(Tcp, tcp::Socket<'a>);
