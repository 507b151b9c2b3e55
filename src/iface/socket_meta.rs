//! Per-socket bookkeeping that lives alongside each socket in a [`super::SocketSet`]
//! but isn't part of the socket's own protocol state: which slot it occupies,
//! and whether egress is currently being held back waiting on ARP.

use super::socket_set::SocketHandle;
use crate::socket::PollAt;
use crate::time::{Duration, Instant};
use crate::wire::IpAddress;

/// How long a socket should back off from dispatching after neighbor
/// discovery fails, before trying again (mirrors the interval between ARP
/// request retries).
const DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NeighborState {
    Active,
    Pending { expires_at: Instant },
}

/// Metadata attached to each socket in a [`super::SocketSet`].
#[derive(Debug, Clone)]
pub struct Meta {
    pub(crate) handle: SocketHandle,
    neighbor_state: NeighborState,
}

impl Meta {
    pub(crate) fn new(handle: SocketHandle) -> Self {
        Meta {
            handle,
            neighbor_state: NeighborState::Active,
        }
    }

    /// Whether this socket is allowed to dispatch a packet right now: not
    /// while we're backed off waiting for a pending ARP resolution that
    /// hasn't yet had a chance to retry.
    pub(crate) fn egress_permitted(
        &self,
        now: Instant,
        has_neighbor: impl Fn(IpAddress) -> bool,
    ) -> bool {
        let _ = has_neighbor;
        match self.neighbor_state {
            NeighborState::Active => true,
            NeighborState::Pending { expires_at } => now >= expires_at,
        }
    }

    /// Called when dispatch failed because the destination's hardware
    /// address hasn't been resolved yet. Backs this socket off so the
    /// interface doesn't spin retrying it every poll while ARP resolves.
    pub(crate) fn neighbor_missing(&mut self, now: Instant, neighbor_addr: IpAddress) {
        net_debug!("{}: neighbor missing, backing off egress", neighbor_addr);
        self.neighbor_state = NeighborState::Pending {
            expires_at: now + DISCOVERY_RETRY_INTERVAL,
        };
    }

    /// Combines the socket's own requested poll time with any neighbor
    /// discovery backoff still in effect.
    pub(crate) fn poll_at(
        &self,
        socket_poll_at: PollAt,
        has_neighbor: impl Fn(IpAddress) -> bool,
    ) -> PollAt {
        let _ = has_neighbor;
        match self.neighbor_state {
            NeighborState::Active => socket_poll_at,
            NeighborState::Pending { expires_at } => match socket_poll_at {
                PollAt::Ingress => PollAt::Time(expires_at),
                PollAt::Now => PollAt::Time(expires_at),
                PollAt::Time(t) if t < expires_at => PollAt::Time(t),
                PollAt::Time(_) => PollAt::Time(expires_at),
            },
        }
    }
}
