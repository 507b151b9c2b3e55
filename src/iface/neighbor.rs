//! The IPv4-to-hardware-address cache ARP fills and the interface's egress
//! path consults before it can hand a frame to the device.
//!
//! A lookup miss kicks off a request and immediately rate-limits further
//! requests for the same address, so a burst of sends to an unresolved
//! address produces one ARP request, not one per packet.

use heapless::LinearMap;

use crate::config::IFACE_NEIGHBOR_CACHE_COUNT;
use crate::time::{Duration, Instant};
use crate::wire::{HardwareAddress, IpAddress};

/// Minimum time between ARP requests for the same unresolved address.
const SILENT_TIME: Duration = Duration::from_millis(1_000);

/// How long a resolved mapping is trusted before it must be re-resolved.
const ENTRY_LIFETIME: Duration = Duration::from_millis(60_000);

/// The outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// The address is cached and mapped to this hardware address.
    Found(HardwareAddress),
    /// The address isn't cached, but a request was sent recently enough
    /// that another shouldn't go out yet.
    RateLimited,
    /// The address isn't cached and a new request may be sent.
    NotFound,
}

impl Answer {
    pub(crate) fn found(&self) -> bool {
        matches!(self, Answer::Found(_))
    }
}

/// A cached neighbor mapping: a protocol address resolved to a hardware
/// address, plus the timestamp past which the mapping should be discarded.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    hardware_addr: HardwareAddress,
    expires_at: Instant,
}

/// A neighbor cache backed by a fixed-capacity map.
#[derive(Debug)]
pub struct Cache {
    storage: LinearMap<IpAddress, Neighbor, IFACE_NEIGHBOR_CACHE_COUNT>,
    silent_until: Instant,
}

impl Cache {
    /// Create a cache.
    pub fn new() -> Self {
        Self {
            storage: LinearMap::new(),
            silent_until: Instant::from_millis(0),
        }
    }

    pub(crate) fn flush(&mut self) {
        self.storage.clear()
    }

    /// Records or refreshes a mapping, evicting the entry closest to expiry
    /// first if the fixed-size cache is full.
    pub(crate) fn fill(
        &mut self,
        addr: IpAddress,
        hardware_addr: HardwareAddress,
        timestamp: Instant,
    ) {
        if let Some(entry) = self.storage.get_mut(&addr) {
            entry.hardware_addr = hardware_addr;
            entry.expires_at = timestamp + ENTRY_LIFETIME;
            return;
        }

        if self.storage.len() >= IFACE_NEIGHBOR_CACHE_COUNT {
            if let Some((&oldest, _)) = self
                .storage
                .iter()
                .min_by_key(|(_, n)| n.expires_at.total_millis())
            {
                self.storage.remove(&oldest);
            }
        }

        let _ = self.storage.insert(
            addr,
            Neighbor {
                hardware_addr,
                expires_at: timestamp + ENTRY_LIFETIME,
            },
        );
    }

    /// Refreshes the expiry of an already-cached mapping without creating a
    /// new one, used when a unicast packet from a known peer arrives (spec
    /// §4.2: a fresh ARP isn't needed just because the old one hasn't timed
    /// out yet).
    pub(crate) fn reset_expiry_if_existing(
        &mut self,
        addr: IpAddress,
        hardware_addr: HardwareAddress,
        timestamp: Instant,
    ) {
        if let Some(entry) = self.storage.get_mut(&addr) {
            entry.hardware_addr = hardware_addr;
            entry.expires_at = timestamp + ENTRY_LIFETIME;
        }
    }

    pub(crate) fn lookup(&self, addr: &IpAddress, timestamp: Instant) -> Answer {
        if let Some(entry) = self.storage.get(addr) {
            if entry.expires_at.after(timestamp) {
                return Answer::Found(entry.hardware_addr);
            }
        }

        if self.silent_until.after(timestamp) {
            Answer::RateLimited
        } else {
            Answer::NotFound
        }
    }

    /// Called right after a new request has been dispatched, so repeated
    /// lookups for the same still-unresolved address don't each trigger
    /// their own request.
    pub(crate) fn limit_rate(&mut self, timestamp: Instant) {
        self.silent_until = timestamp + SILENT_TIME;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EthernetAddress;

    fn mac(b: u8) -> HardwareAddress {
        HardwareAddress::Ethernet(EthernetAddress::from_bytes(&[0, 0, 0, 0, 0, b]))
    }

    #[test]
    fn fill_then_lookup_finds_entry() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(10, 0, 0, 1);
        cache.fill(addr, mac(1), Instant::from_millis(0));
        assert_eq!(
            cache.lookup(&addr, Instant::from_millis(1)),
            Answer::Found(mac(1))
        );
    }

    #[test]
    fn unknown_address_not_found_until_rate_limited() {
        let cache = Cache::new();
        let addr = IpAddress::v4(10, 0, 0, 2);
        assert_eq!(cache.lookup(&addr, Instant::from_millis(0)), Answer::NotFound);
    }

    #[test]
    fn limit_rate_suppresses_repeat_lookups() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(10, 0, 0, 3);
        cache.limit_rate(Instant::from_millis(0));
        assert_eq!(
            cache.lookup(&addr, Instant::from_millis(1)),
            Answer::RateLimited
        );
        assert_eq!(
            cache.lookup(&addr, Instant::from_millis(2_000)),
            Answer::NotFound
        );
    }

    #[test]
    fn entry_expires_after_lifetime() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(10, 0, 0, 4);
        cache.fill(addr, mac(4), Instant::from_millis(0));
        assert_eq!(
            cache.lookup(&addr, Instant::from_millis(ENTRY_LIFETIME.total_millis() + 1)),
            Answer::NotFound
        );
    }
}
