//! Crate-wide error taxonomy.
//!
//! Errors are grouped by *outcome*, not by origin: configuration
//! errors abort before the link layer is touched, initialization failures
//! unwind everything they set up, and everything past that point is either
//! a counter increment or a socket close-reason, never a panic.

use core::fmt;

/// Why a TCP socket was torn down. Mirrors `TcpSocket::closeReason` in the
/// source this stack's semantics were drawn from: 0 meant "closed cleanly",
/// small positive integers meant something went wrong.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseReason {
    /// Clean FIN/ACK exchange into TIME_WAIT, or a local close of an
    /// already-CLOSED socket.
    Clean,
    /// A RST was received and accepted.
    Reset,
    /// `TCP_CLOSE_TIMEOUT` elapsed waiting for a natural TIME_WAIT.
    CloseTimedOut,
    /// The retransmission count on the head-of-line segment exceeded the
    /// retry budget.
    RetriesExhausted,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CloseReason::Clean => "closed",
            CloseReason::Reset => "connection reset",
            CloseReason::CloseTimedOut => "close timed out",
            CloseReason::RetriesExhausted => "retransmission retries exhausted",
        };
        f.write_str(s)
    }
}

/// Failure categories for stack initialization. Init is all-or-nothing:
/// any of these causes every prior step to be undone.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InitError {
    /// The host link driver could not be opened or attached.
    LinkUnavailable,
    /// The packet buffer pool could not be allocated at the requested size.
    BufferAllocFailed,
    /// ARP self-probe saw a reply for our own address: somebody else is
    /// already using it.
    AddressConflict,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            InitError::LinkUnavailable => "packet driver not present",
            InitError::BufferAllocFailed => "buffer pool allocation failed",
            InitError::AddressConflict => "ARP self-probe detected an address conflict",
        };
        f.write_str(s)
    }
}

impl std::error::Error for InitError {}
impl std::error::Error for CloseReason {}

/// Resolver outcomes, once a pending DNS query terminates.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DnsError {
    Timeout,
    /// The server replied with a non-zero RCODE.
    ServerError(u8),
    Unknown,
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DnsError::Timeout => write!(f, "query timed out"),
            DnsError::ServerError(code) => write!(f, "server returned rcode {code}"),
            DnsError::Unknown => write!(f, "unknown resolver error"),
        }
    }
}

impl std::error::Error for DnsError {}
