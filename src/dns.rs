//! Recursive DNS resolver client.
//!
//! Grounded in `TCPLIB/DNS.CPP`: a UDP socket bound to a fixed local port,
//! a name -> address cache with LRU eviction, and a single outstanding
//! query at a time (no parallel resolutions, `Dns::pendingQuery`). The
//! resolver owns a [`SocketHandle`] into the caller's [`SocketSet`] rather
//! than a private `Udp::registerCallback` slot, but the one-socket,
//! one-query-at-a-time shape is unchanged.
//!
//! Like every other socket in this stack, nothing here drives the device
//! directly: the caller's own poll loop calls [`Interface::poll`] to move
//! bytes, and calls [`Resolver::poll`] alongside it to drive queries and
//! pick up answers.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::error::DnsError;
use crate::iface::{SocketHandle, SocketSet};
use crate::rand::Rand;
use crate::socket::udp;
use crate::time::{Duration, Instant};
use crate::wire::dns::{self, NameBuf, Packet, QueryType, Record, Repr, ResponseCode};
use crate::wire::{IpAddress, IpEndpoint};

/// The fixed local UDP port the resolver binds to, matching
/// `DNS_HANDLER_PORT` in the source this was distilled from.
pub const CLIENT_PORT: u16 = 1000;
/// The well-known DNS server port every request targets.
pub const SERVER_PORT: u16 = 53;

/// How long to wait, with no response, before resending the pending query
/// at the current nameserver (`DNS_RETRY_THRESHOLD`).
const RETRY_THRESHOLD: Duration = Duration::from_millis(2_000);
/// Total time budget for a single resolution before it is abandoned
/// (`DNS_TIMEOUT`).
const QUERY_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Depth of the nameserver/name stack iterative mode walks on referral.
const NAME_STACK_DEPTH: usize = 4;

/// Recursive (the default, and only fully-supported, mode) vs. iterative
/// resolution. Spec §4.7 and the Open Questions section call iterative
/// mode out as a known simplification: on a referral with no glue record
/// it restarts at the root rather than resuming the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverMode {
    Recursive,
    Iterative,
}

/// The immediate outcome of calling [`Resolver::resolve`]. Mirrors the
/// small non-negative return codes `Dns::resolve` used, spelled out as an
/// enum instead of magic numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Already known: a numeric dotted quad, a cache hit, or a hosts-file
    /// hit. The address is returned directly, no packet is sent.
    Resolved(Ipv4Addr),
    /// No local answer; a request was sent to the nameserver. Call
    /// [`Resolver::poll`] and re-check later.
    Sent,
    /// Another resolution is already in flight; this stack never chases
    /// two names at once.
    Busy,
    /// No local answer, and `send_request` was false, so nothing was sent.
    WillNotSend,
    /// The name was empty or too long.
    BadName,
    /// No nameserver has been configured.
    NotConfigured,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    addr: Ipv4Addr,
    updated: Instant,
}

#[derive(Debug, Clone)]
struct PendingQuery {
    ident: u16,
    /// What the caller originally asked for; this is what gets cached once
    /// an answer arrives, even if a CNAME chain or referral changed the
    /// name actually on the wire (so a later lookup of the original name
    /// is a cache hit without re-resolving the chain).
    original_target: String,
    /// Iterative mode's stack of names still to resolve, current query at
    /// the top. Recursive mode keeps exactly one entry, rewritten in place
    /// on each CNAME.
    name_stack: Vec<String>,
    nameserver: Ipv4Addr,
    start: Instant,
    last_update: Instant,
}

impl PendingQuery {
    fn current_name(&self) -> &str {
        self.name_stack.last().map(String::as_str).unwrap_or(&self.original_target)
    }
}

/// A recursive DNS client layered on one UDP socket.
pub struct Resolver {
    socket: SocketHandle,
    nameserver: Option<Ipv4Addr>,
    domain: Option<String>,
    hosts_path: Option<PathBuf>,
    mode: ResolverMode,
    cache: Vec<CacheEntry>,
    cache_cap: usize,
    pending: Option<PendingQuery>,
    rand: Rand,
}

impl Resolver {
    /// Creates a resolver and registers its UDP socket (bound to
    /// [`CLIENT_PORT`]) in `sockets`.
    pub fn new(sockets: &mut SocketSet<'static>, cache_cap: usize, rand_seed: u64) -> Resolver {
        let rx_buffer = udp::PacketBuffer::new(4, 2048);
        let tx_buffer = udp::PacketBuffer::new(4, 2048);
        let mut socket = udp::Socket::new(rx_buffer, tx_buffer);
        socket.bind(CLIENT_PORT).expect("DNS client port is nonzero");
        let socket = sockets.add(socket);

        Resolver {
            socket,
            nameserver: None,
            domain: None,
            hosts_path: None,
            mode: ResolverMode::Recursive,
            cache: Vec::new(),
            cache_cap: cache_cap.max(1),
            pending: None,
            rand: Rand::new(rand_seed),
        }
    }

    pub fn set_nameserver(&mut self, addr: Ipv4Addr) {
        self.nameserver = Some(addr);
    }

    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = Some(domain.into());
    }

    pub fn set_hosts_file(&mut self, path: impl AsRef<Path>) {
        self.hosts_path = Some(path.as_ref().to_path_buf());
    }

    pub fn set_mode(&mut self, mode: ResolverMode) {
        self.mode = mode;
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    fn cache_find(&self, name: &str) -> Option<Ipv4Addr> {
        self.cache
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.addr)
    }

    /// Inserts or refreshes a cache entry, evicting the least-recently
    /// updated one if the table is full.
    fn cache_put(&mut self, name: &str, addr: Ipv4Addr, now: Instant) {
        if let Some(entry) = self.cache.iter_mut().find(|e| e.name.eq_ignore_ascii_case(name)) {
            entry.addr = addr;
            entry.updated = now;
            return;
        }
        if self.cache.len() >= self.cache_cap {
            if let Some((idx, _)) =
                self.cache.iter().enumerate().min_by_key(|(_, e)| e.updated.total_millis())
            {
                self.cache.remove(idx);
            }
        }
        self.cache.push(CacheEntry {
            name: name.to_string(),
            addr,
            updated: now,
        });
    }

    /// Scans the configured hosts file, if any, for `name1` or `name2` (the
    /// original and domain-expanded forms are both tried, grounded in
    /// `Dns::scanHostsFile`'s two-name-argument interface). This is a flat
    /// linear file scan on every miss — slow by design, not hot.
    fn scan_hosts_file(&self, name1: &str, name2: &str) -> Option<Ipv4Addr> {
        let path = self.hosts_path.as_ref()?;
        let text = fs::read_to_string(path).ok()?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let addr: Ipv4Addr = tokens.next()?.parse().ok()?;
            for alias in tokens {
                if alias.eq_ignore_ascii_case(name1) || alias.eq_ignore_ascii_case(name2) {
                    return Some(addr);
                }
            }
        }
        None
    }

    /// Attempts to resolve `name`, returning an immediate local answer
    /// (numeric address / cache / hosts file) or kicking off a request.
    /// `send_request` mirrors `Dns::resolve`'s `sendReq` flag: `false` asks
    /// only "do you already know this", never touching the network.
    pub fn resolve(
        &mut self,
        sockets: &mut SocketSet<'_>,
        name: &str,
        send_request: bool,
        now: Instant,
    ) -> ResolveOutcome {
        if name.is_empty() {
            return ResolveOutcome::BadName;
        }
        if name.len() >= dns::alloc_free::MAX_NAME_LEN {
            return ResolveOutcome::BadName;
        }

        if let Ok(addr) = name.parse::<Ipv4Addr>() {
            return ResolveOutcome::Resolved(addr);
        }

        let Some(nameserver) = self.nameserver else {
            return ResolveOutcome::NotConfigured;
        };

        if let Some(addr) = self.cache_find(name) {
            return ResolveOutcome::Resolved(addr);
        }

        let has_dot = name.contains('.');
        let expanded = if !has_dot {
            self.domain.as_ref().map(|d| format!("{name}.{d}"))
        } else {
            None
        };
        if let Some(expanded) = &expanded {
            if let Some(addr) = self.cache_find(expanded) {
                return ResolveOutcome::Resolved(addr);
            }
        }

        let query_name = expanded.unwrap_or_else(|| name.to_string());

        if let Some(addr) = self.scan_hosts_file(name, &query_name) {
            self.cache_put(name, addr, now);
            return ResolveOutcome::Resolved(addr);
        }

        if self.pending.is_some() {
            return ResolveOutcome::Busy;
        }
        if !send_request {
            return ResolveOutcome::WillNotSend;
        }

        let ident = self.rand.rand_u16();
        let pending = PendingQuery {
            ident,
            original_target: name.to_string(),
            name_stack: vec![query_name],
            nameserver,
            start: now,
            last_update: now,
        };
        let current = pending.current_name().to_string();
        self.pending = Some(pending);
        self.send_query(sockets, nameserver, &current, ident);
        ResolveOutcome::Sent
    }

    fn send_query(&mut self, sockets: &mut SocketSet<'_>, nameserver: Ipv4Addr, qname: &str, ident: u16) {
        let mut question = NameBuf::new();
        for label in qname.split('.') {
            if !label.is_empty() {
                let _ = question.push_label(label.as_bytes());
            }
        }
        let repr = Repr {
            id: ident,
            is_response: false,
            response_code: ResponseCode::NoError,
            question,
            query_type: QueryType::A,
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet);
        }

        let socket = sockets.get_mut::<udp::Socket>(self.socket);
        let meta = udp::UdpMetadata {
            endpoint: IpEndpoint::new(IpAddress::Ipv4(nameserver), SERVER_PORT),
            local_address: None,
            meta: Default::default(),
        };
        let _ = socket.send_slice(&buf, meta);
    }

    /// Drives the pending query: drains any responses already queued on the
    /// resolver's UDP socket, then applies the retry/timeout schedule if it
    /// is still waiting. Returns `(original_name, result)` the instant a
    /// query terminates (successfully or not), same as the moment
    /// `Dns::queryPending` drops back to zero in the original stack.
    pub fn poll(&mut self, sockets: &mut SocketSet<'_>, now: Instant) -> Option<(String, Result<Ipv4Addr, DnsError>)> {
        loop {
            let socket = sockets.get_mut::<udp::Socket>(self.socket);
            if !socket.can_recv() {
                break;
            }
            let mut buf = [0u8; 1500];
            let Ok((len, _meta)) = socket.recv_slice(&mut buf) else {
                break;
            };
            if let Some(outcome) = self.handle_response(sockets, &buf[..len], now) {
                return Some(outcome);
            }
        }

        let pending = self.pending.as_ref()?;
        if now.checked_duration_since(pending.last_update) < RETRY_THRESHOLD {
            return None;
        }
        if now.checked_duration_since(pending.start) > QUERY_TIMEOUT {
            let name = pending.original_target.clone();
            self.pending = None;
            return Some((name, Err(DnsError::Timeout)));
        }

        let nameserver = pending.nameserver;
        let qname = pending.current_name().to_string();
        let ident = pending.ident.wrapping_add(1);
        if let Some(p) = self.pending.as_mut() {
            p.ident = ident;
            p.last_update = now;
        }
        self.send_query(sockets, nameserver, &qname, ident);
        None
    }

    /// Parses one UDP reply and advances (or finishes) the pending query.
    /// Grounded in `Dns::udpHandler`'s answer/authority/additional walk,
    /// narrowed to the A/CNAME/NS records the resolver acts on.
    fn handle_response(
        &mut self,
        sockets: &mut SocketSet<'_>,
        data: &[u8],
        now: Instant,
    ) -> Option<(String, Result<Ipv4Addr, DnsError>)> {
        let packet = Packet::new_checked(data).ok()?;
        if !packet.is_response() {
            return None;
        }
        let pending = self.pending.as_ref()?;
        if packet.id() != pending.ident {
            return None; // stale or foreign reply; ignore and keep waiting
        }
        let original_target = pending.original_target.clone();
        let response_code = packet.response_code();

        if response_code != ResponseCode::NoError {
            self.pending = None;
            return Some((original_target, Err(DnsError::ServerError(u8::from(response_code)))));
        }

        let current_name = pending.current_name().to_string();
        let mode = self.mode;

        let mut resolved: Option<Ipv4Addr> = None;
        let mut renamed: Option<String> = None;
        let mut referral: Option<String> = None;
        let mut glue: Option<(String, Ipv4Addr)> = None;

        let _ = dns::for_each_record(&packet, |rec| {
            if resolved.is_some() {
                return;
            }
            match rec {
                Record::A { name, addr, .. } => {
                    let name = name.as_str();
                    if name.eq_ignore_ascii_case(&current_name) {
                        resolved = Some(addr);
                    } else if mode == ResolverMode::Iterative {
                        glue.get_or_insert((name.to_string(), addr));
                    }
                }
                Record::Cname { name, target, .. } => {
                    if name.as_str().eq_ignore_ascii_case(&current_name) {
                        renamed = Some(target.as_str().to_string());
                    }
                }
                Record::Ns { target, .. } => {
                    if mode == ResolverMode::Iterative {
                        referral.get_or_insert(target.as_str().to_string());
                    }
                }
                Record::Other => {}
            }
        });

        if let Some(addr) = resolved {
            self.cache_put(&original_target, addr, now);
            self.pending = None;
            return Some((original_target, Ok(addr)));
        }

        if let Some(target) = renamed {
            if let Some(p) = self.pending.as_mut() {
                *p.name_stack.last_mut().unwrap() = target.clone();
                p.last_update = now;
            }
            let ident = self.rand.rand_u16();
            if let Some(p) = self.pending.as_mut() {
                p.ident = ident;
            }
            let nameserver = self.pending.as_ref().unwrap().nameserver;
            self.send_query(sockets, nameserver, &target, ident);
            return None;
        }

        if self.mode == ResolverMode::Iterative {
            if let Some((glue_name, glue_addr)) = glue {
                self.cache_put(&glue_name, glue_addr, now);
                if let Some(p) = self.pending.as_mut() {
                    p.nameserver = glue_addr;
                    p.last_update = now;
                }
                let ident = self.rand.rand_u16();
                if let Some(p) = self.pending.as_mut() {
                    p.ident = ident;
                }
                let qname = self.pending.as_ref().unwrap().current_name().to_string();
                self.send_query(sockets, glue_addr, &qname, ident);
                return None;
            }
            if let Some(ns_name) = referral {
                // No glue for the referred nameserver: restart at the
                // configured root rather than resolving `ns_name` itself
                // and resuming the walk.
                let root = self.nameserver?;
                if let Some(p) = self.pending.as_mut() {
                    if p.name_stack.len() < NAME_STACK_DEPTH {
                        p.name_stack.push(ns_name);
                    }
                    p.nameserver = root;
                    p.last_update = now;
                }
                let ident = self.rand.rand_u16();
                if let Some(p) = self.pending.as_mut() {
                    p.ident = ident;
                }
                let qname = self.pending.as_ref().unwrap().current_name().to_string();
                self.send_query(sockets, root, &qname, ident);
                return None;
            }
        }

        // Response code was clean but nothing usable came back.
        self.pending = None;
        Some((original_target, Err(DnsError::Unknown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sockets() -> SocketSet<'static> {
        SocketSet::new(Vec::new())
    }

    #[test]
    fn numeric_dotted_quad_bypasses_network() {
        let mut sockets = sockets();
        let mut r = Resolver::new(&mut sockets, 4, 1);
        r.set_nameserver(Ipv4Addr::new(8, 8, 8, 8));
        let outcome = r.resolve(&mut sockets, "10.0.0.5", true, Instant::ZERO);
        assert_eq!(outcome, ResolveOutcome::Resolved(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!r.is_busy());
    }

    #[test]
    fn no_nameserver_is_reported() {
        let mut sockets = sockets();
        let mut r = Resolver::new(&mut sockets, 4, 1);
        let outcome = r.resolve(&mut sockets, "example.com", true, Instant::ZERO);
        assert_eq!(outcome, ResolveOutcome::NotConfigured);
    }

    #[test]
    fn second_resolve_while_pending_is_busy() {
        let mut sockets = sockets();
        let mut r = Resolver::new(&mut sockets, 4, 1);
        r.set_nameserver(Ipv4Addr::new(8, 8, 8, 8));
        let first = r.resolve(&mut sockets, "example.com", true, Instant::ZERO);
        assert_eq!(first, ResolveOutcome::Sent);
        let second = r.resolve(&mut sockets, "other.com", true, Instant::ZERO);
        assert_eq!(second, ResolveOutcome::Busy);
    }

    #[test]
    fn cache_is_case_insensitive() {
        let mut sockets = sockets();
        let mut r = Resolver::new(&mut sockets, 4, 1);
        r.set_nameserver(Ipv4Addr::new(8, 8, 8, 8));
        r.cache_put("Example.COM", Ipv4Addr::new(1, 2, 3, 4), Instant::ZERO);
        let outcome = r.resolve(&mut sockets, "example.com", false, Instant::ZERO);
        assert_eq!(outcome, ResolveOutcome::Resolved(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn query_times_out() {
        let mut sockets = sockets();
        let mut r = Resolver::new(&mut sockets, 4, 1);
        r.set_nameserver(Ipv4Addr::new(8, 8, 8, 8));
        r.resolve(&mut sockets, "example.com", true, Instant::ZERO);
        let result = r.poll(&mut sockets, Instant::from_millis(QUERY_TIMEOUT.total_millis() + 1));
        assert_eq!(result, Some(("example.com".to_string(), Err(DnsError::Timeout))));
        assert!(!r.is_busy());
    }
}
