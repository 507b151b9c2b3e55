//! The Transmission Control Protocol state machine — the largest single
//! module in this stack. A socket owns one 4-tuple's-worth of send and
//! receive byte streams and drives itself forward one segment at a time
//! via [`Socket::process`] (inbound) and [`Socket::dispatch`] (outbound),
//! the same two-method shape every socket type in this crate uses.
//!
//! Out-of-order segments are never buffered: a segment that doesn't land
//! exactly at `rcv_nxt` is dropped without an ack, so the peer's own
//! retransmit timer refills the gap ("play dead"). This keeps the receive
//! side a plain ring rather than a reassembly structure.

use crate::error::CloseReason;
use crate::iface::InterfaceInner;
use crate::socket::PollAt;
use crate::storage::RingBuffer;
use crate::time::{Duration, Instant};
use crate::wire::{
    IpEndpoint, IpListenEndpoint, IpProtocol, IpRepr, TcpControl, TcpRepr, TcpSeqNumber,
};

/// Initial retransmission timeout, before any RTT sample exists.
const RTO_INITIAL: Duration = Duration::from_millis(1000);
/// Ceiling applied to the doubling-on-retransmit backoff.
const RTO_MAX: Duration = Duration::from_millis(60_000);
const DEFAULT_MSS: usize = 536;
/// Consecutive out-of-window segments before the advertised window clamps
/// to one MSS (the small-window flag).
const SMALL_WINDOW_TRIGGER: u8 = 3;
/// Consecutive well-formed segments needed to lift the small-window clamp.
const SMALL_WINDOW_CLEAR: u8 = 3;
/// How many unanswered retransmissions are tolerated before the connection
/// is aborted outright.
const MAX_RETRIES: u8 = 7;
const TIME_WAIT_TIMEOUT: Duration = Duration::from_millis(2 * 60_000);

/// The state of a TCP socket.
///
/// In addition to the eleven states of [RFC 793], this stack has three
/// pending-FIN pseudo-states: the local application has requested a close,
/// but the FIN segment announcing it has not yet actually gone out on the
/// wire (so an inbound packet can still be processed, and a retransmit of
/// old data can still go out, before the FIN itself is sent). Each collapses
/// into its corresponding standard state as soon as `dispatch` transmits the
/// FIN.
///
/// [RFC 793]: https://tools.ietf.org/html/rfc793
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    /// Established, close() called, FIN not yet transmitted. Becomes
    /// `FinWait1` once it is.
    PendingFin1,
    FinWait1,
    FinWait2,
    CloseWait,
    /// CloseWait, close() called, FIN not yet transmitted. Becomes
    /// `LastAck` once it is.
    PendingFin2,
    LastAck,
    /// FinWait1, peer's FIN already received (simultaneous close), local
    /// FIN not yet transmitted. Becomes `Closing` once it is.
    PendingFin3,
    Closing,
    TimeWait,
}

impl State {
    fn is_open(&self) -> bool {
        !matches!(self, State::Closed | State::TimeWait)
    }
}

/// Jacobson/Karn RTT estimation using only integer arithmetic:
/// `SRTT=(8*SRTT+4*RTT)/10`, `RTT_dev=(8*RTT_dev+4*dev)/10`, and an
/// overdue threshold of `SRTT + 4*RTT_dev` plus two ticks of slack.
#[derive(Debug, Clone, Copy)]
struct RttEstimator {
    measured: bool,
    srtt_ms: u32,
    rttvar_ms: u32,
}

impl RttEstimator {
    fn new() -> RttEstimator {
        RttEstimator {
            measured: false,
            srtt_ms: RTO_INITIAL.total_millis(),
            rttvar_ms: 0,
        }
    }

    /// Records one RTT sample. Per Karn's algorithm the caller must not call
    /// this for a segment that was ever retransmitted.
    fn sample(&mut self, rtt: Duration) {
        let rtt_ms = rtt.total_millis();
        if !self.measured {
            self.srtt_ms = rtt_ms;
            self.rttvar_ms = rtt_ms / 2;
            self.measured = true;
        } else {
            let dev = rtt_ms.abs_diff(self.srtt_ms);
            self.srtt_ms = (8 * self.srtt_ms + 4 * rtt_ms) / 10;
            self.rttvar_ms = (8 * self.rttvar_ms + 4 * dev) / 10;
        }
    }

    /// The instant by which an unacknowledged segment sent at `sent_at` is
    /// considered overdue for retransmission.
    fn overdue_at(&self, sent_at: Instant, tick: Duration) -> Instant {
        sent_at
            + Duration::from_millis(self.srtt_ms)
            + Duration::from_millis(4 * self.rttvar_ms)
            + tick
            + tick
    }

    /// A retransmission timed out: Karn's algorithm forbids trusting the RTT
    /// of whatever gets acked next, and the estimate itself backs off by
    /// doubling (capped), same as the classic exponential-backoff rule.
    fn on_retransmit(&mut self) {
        self.srtt_ms = (self.srtt_ms * 2).min(RTO_MAX.total_millis());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tuple {
    local: IpEndpoint,
    remote: IpEndpoint,
}

/// A TCP socket ring buffer.
pub type SocketBuffer<'a> = RingBuffer<'a, u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Unaddressable,
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenError {
    Unaddressable,
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    InvalidState,
    Finished,
}

/// Which half of the connection [`Socket::shutdown`] tears down, matching
/// the three-way granularity of `shutdown(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

/// A Transmission Control Protocol socket.
///
/// A TCP socket may passively listen for connections or actively connect to
/// another endpoint. There is no backlog: a listening socket becomes a
/// single established connection on its first valid SYN, and to accept
/// further connections concurrently, further sockets must be listening on
/// the same local endpoint.
#[derive(Debug)]
pub struct Socket<'a> {
    state: State,
    rtte: RttEstimator,
    rx_buffer: SocketBuffer<'a>,
    rx_fin_received: bool,
    rd_shutdown: bool,
    tx_buffer: SocketBuffer<'a>,
    wr_shutdown: bool,
    timeout: Option<Duration>,
    hop_limit: Option<u8>,
    listen_endpoint: IpListenEndpoint,
    tuple: Option<Tuple>,

    /// Sequence number of the first byte of `tx_buffer` (a.k.a. `snd_una`).
    local_seq_no: TcpSeqNumber,
    /// Sequence number of the first byte of `rx_buffer` (a.k.a. `rcv_nxt`
    /// minus what's already been read by the application — since this
    /// stack never reorders, `rcv_nxt` is simply `remote_seq_no +
    /// rx_buffer.len()`).
    remote_seq_no: TcpSeqNumber,
    /// Sequence number one past the last octet actually transmitted so far
    /// (`snd_nxt`); always `<= local_seq_no + tx_buffer.len()`.
    snd_nxt: TcpSeqNumber,
    /// The peer's advertised window, as an absolute sequence number:
    /// we may send up to `remote_win_edge - 1`.
    remote_win_edge: TcpSeqNumber,
    remote_mss: usize,

    /// Instant the oldest unacknowledged segment was (re)transmitted, for
    /// the overdue/retransmit check.
    retransmit_sent_at: Option<Instant>,
    retransmit_count: u8,
    /// Set once any segment has had to be retransmitted; Karn's algorithm
    /// then skips the next RTT sample, since it can't tell which copy was
    /// actually acked.
    retransmit_in_flight: bool,

    /// Consecutive segments rejected as out-of-window.
    seq_error_streak: u8,
    /// Consecutive well-formed segments since the last error.
    good_streak: u8,
    /// Clamps the advertised window to one MSS.
    small_window: bool,

    /// The application asked to close the connection, but (in the
    /// `PendingFin*` states) the FIN hasn't gone out yet.
    close_requested: bool,
    /// An ack is due even if there's no data to piggyback it on.
    ack_pending: bool,

    /// Why the socket last tore down: RST, retransmit exhaustion, or a
    /// forced close-timeout each set a distinct reason the application can
    /// read after the socket goes back to CLOSED. Cleared on every fresh
    /// `listen`/`connect`.
    close_reason: Option<CloseReason>,
}

impl<'a> Socket<'a> {
    pub fn new<T>(rx_buffer: T, tx_buffer: T) -> Socket<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        Socket {
            state: State::Closed,
            rtte: RttEstimator::new(),
            rx_buffer: rx_buffer.into(),
            rx_fin_received: false,
            rd_shutdown: false,
            tx_buffer: tx_buffer.into(),
            wr_shutdown: false,
            timeout: None,
            hop_limit: None,
            listen_endpoint: IpListenEndpoint::default(),
            tuple: None,
            local_seq_no: TcpSeqNumber::default(),
            remote_seq_no: TcpSeqNumber::default(),
            snd_nxt: TcpSeqNumber::default(),
            remote_win_edge: TcpSeqNumber::default(),
            remote_mss: DEFAULT_MSS,
            retransmit_sent_at: None,
            retransmit_count: 0,
            retransmit_in_flight: false,
            seq_error_streak: 0,
            good_streak: 0,
            small_window: false,
            close_requested: false,
            ack_pending: false,
            close_reason: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Why the socket last closed, if it wasn't a clean request from the
    /// application. `None` while open, or after a local `close`/`abort`.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, State::Closed | State::Listen)
    }

    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        assert_ne!(hop_limit, Some(0));
        self.hop_limit = hop_limit;
    }

    pub fn set_timeout(&mut self, duration: Option<Duration>) {
        self.timeout = duration;
    }

    fn reset(&mut self) {
        self.state = State::Closed;
        self.tuple = None;
        self.rx_buffer.clear();
        self.rx_fin_received = false;
        self.rd_shutdown = false;
        self.tx_buffer.clear();
        self.wr_shutdown = false;
        self.rtte = RttEstimator::new();
        self.retransmit_sent_at = None;
        self.retransmit_count = 0;
        self.retransmit_in_flight = false;
        self.seq_error_streak = 0;
        self.good_streak = 0;
        self.small_window = false;
        self.close_requested = false;
        self.ack_pending = false;
        self.close_reason = None;
    }

    /// Starts listening for connections on `local_endpoint`.
    pub fn listen<T: Into<IpListenEndpoint>>(
        &mut self,
        local_endpoint: T,
    ) -> Result<(), ListenError> {
        let local_endpoint = local_endpoint.into();
        if local_endpoint.port == 0 {
            return Err(ListenError::Unaddressable);
        }
        if self.is_open() {
            return Err(ListenError::InvalidState);
        }
        self.reset();
        self.listen_endpoint = local_endpoint;
        self.state = State::Listen;
        Ok(())
    }

    /// Actively opens a connection to `remote`, choosing `local_port` as our
    /// side of the 4-tuple. `isn` is the initial sequence number, supplied
    /// by the caller (the interface layer draws it from its RNG).
    pub fn connect<T, U>(
        &mut self,
        local_addr: U,
        remote_endpoint: T,
        local_port: u16,
        isn: TcpSeqNumber,
    ) -> Result<(), ConnectError>
    where
        T: Into<IpEndpoint>,
        U: Into<crate::wire::IpAddress>,
    {
        let remote_endpoint = remote_endpoint.into();
        if remote_endpoint.port == 0 {
            return Err(ConnectError::Unaddressable);
        }
        if self.is_open() {
            return Err(ConnectError::InvalidState);
        }
        self.reset();
        self.tuple = Some(Tuple {
            local: IpEndpoint::new(local_addr.into(), local_port),
            remote: remote_endpoint,
        });
        self.local_seq_no = isn;
        self.snd_nxt = isn;
        self.state = State::SynSent;
        Ok(())
    }

    pub fn can_send(&self) -> bool {
        self.is_active() && !self.tx_buffer.is_full() && !self.wr_shutdown
    }

    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty() || (self.rx_fin_received && self.is_active())
    }

    pub fn send_slice(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if self.wr_shutdown || !self.is_active() {
            return Err(SendError::InvalidState);
        }
        Ok(self.tx_buffer.enqueue_slice(data))
    }

    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<usize, RecvError> {
        if !self.is_active() && self.rx_buffer.is_empty() {
            return Err(RecvError::InvalidState);
        }
        let n = self.rx_buffer.dequeue_slice(data);
        self.remote_seq_no = self.remote_seq_no + n;
        if n == 0 && self.rx_fin_received {
            return Err(RecvError::Finished);
        }
        Ok(n)
    }

    /// Requests a graceful close. Moves to the matching pending-FIN state;
    /// the FIN itself goes out on the next [`Socket::dispatch`].
    pub fn close(&mut self) {
        self.wr_shutdown = true;
        self.close_requested = true;
        self.state = match self.state {
            State::Listen | State::SynSent | State::Closed => State::Closed,
            State::SynReceived | State::Established => State::PendingFin1,
            State::CloseWait => State::PendingFin2,
            State::FinWait1 if self.rx_fin_received => State::PendingFin3,
            other => other,
        };
    }

    /// Shuts down one or both halves of the connection, widening the plain
    /// close semantics to `shutdown(2)`'s read/write/both granularity.
    pub fn shutdown(&mut self, how: Shutdown) {
        match how {
            Shutdown::Read => self.rd_shutdown = true,
            Shutdown::Write => self.close(),
            Shutdown::Both => {
                self.rd_shutdown = true;
                self.close();
            }
        }
    }

    /// Aborts the connection immediately: no FIN, an RST may go out instead
    /// via the interface's housekeeping, and the socket returns to CLOSED.
    pub fn abort(&mut self) {
        self.reset();
    }

    /// Whether an inbound segment addressed to `local` (and, if the
    /// connection is already established, coming from `remote`) belongs to
    /// this socket.
    pub fn accepts(&self, local: &IpEndpoint, remote: &IpEndpoint) -> bool {
        match self.tuple {
            Some(tuple) => tuple.local == *local && tuple.remote == *remote,
            None => {
                self.state == State::Listen
                    && self.listen_endpoint.port == local.port
                    && self
                        .listen_endpoint
                        .addr
                        .map_or(true, |addr| addr == local.addr)
            }
        }
    }

    fn advertised_window(&self) -> u16 {
        let free = self.rx_buffer.window();
        let window = if self.small_window {
            free.min(self.remote_mss)
        } else {
            free
        };
        window.min(u16::MAX as usize) as u16
    }

    fn note_seq_error(&mut self) {
        self.good_streak = 0;
        self.seq_error_streak = self.seq_error_streak.saturating_add(1);
        if self.seq_error_streak >= SMALL_WINDOW_TRIGGER {
            self.small_window = true;
        }
    }

    fn note_good_segment(&mut self) {
        self.seq_error_streak = 0;
        self.good_streak = self.good_streak.saturating_add(1);
        if self.small_window && self.good_streak >= SMALL_WINDOW_CLEAR {
            self.small_window = false;
            self.good_streak = 0;
        }
    }

    /// Processes one inbound segment already matched to this socket's
    /// 4-tuple (or LISTEN endpoint). Returns an immediate reply segment when
    /// the state machine demands one be sent right away (SYN-ACK, RST,
    /// duplicate challenge ACK) distinct from whatever `dispatch` would
    /// otherwise have emitted this tick.
    pub fn process(
        &mut self,
        now: Instant,
        ip_repr: &IpRepr,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        let src = IpEndpoint::new(ip_repr.src_addr(), repr.src_port);
        let dst = IpEndpoint::new(ip_repr.dst_addr(), repr.dst_port);

        if repr.control == TcpControl::Rst {
            return self.process_rst(&dst, &src, repr);
        }

        match self.state {
            State::Closed => self.rst_reply(&dst, &src, repr),
            State::Listen => self.process_listen(now, dst, src, repr),
            State::SynSent => self.process_syn_sent(now, &dst, &src, repr),
            _ => self.process_established_like(now, &dst, &src, repr),
        }
    }

    fn process_rst(
        &mut self,
        _dst: &IpEndpoint,
        _src: &IpEndpoint,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        // Strict-ack-match: an RST is only honored if its sequence number
        // lands inside our receive window.
        let rcv_nxt = self.remote_seq_no + self.rx_buffer.len();
        if self.tuple.is_some() && repr.seq_number != rcv_nxt {
            return None;
        }
        self.reset();
        self.close_reason = Some(CloseReason::Reset);
        None
    }

    fn rst_reply(
        &self,
        local: &IpEndpoint,
        remote: &IpEndpoint,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        let (seq, ack) = if let Some(ack) = repr.ack_number {
            (ack, None)
        } else {
            (
                TcpSeqNumber::default(),
                Some(repr.seq_number + repr.payload.len().max(repr.control.len())),
            )
        };
        Some(self.build(*local, *remote, TcpControl::Rst, seq, ack, 0, None, &[]))
    }

    /// Consumes this listening socket into the new connection: its own
    /// ring buffers become the connection's buffers and it leaves LISTEN
    /// for good, rather than a separate socket being allocated and this one
    /// staying put. There's no spare buffer storage to hand a freshly
    /// allocated socket at SYN time, so a backlog means pre-provisioning
    /// more than one socket listening on the same port (see DESIGN.md).
    fn process_listen(
        &mut self,
        now: Instant,
        local: IpEndpoint,
        remote: IpEndpoint,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        if repr.control != TcpControl::Syn {
            return None;
        }
        self.tuple = Some(Tuple { local, remote });
        self.remote_seq_no = repr.seq_number + 1;
        self.remote_mss = repr.max_seg_size.map(|m| m as usize).unwrap_or(DEFAULT_MSS);
        self.remote_win_edge = self.local_seq_no + repr.window_len as usize;
        // ISN: derived from the current clock, same cheap source the
        // original stack used in the absence of a cryptographic RNG.
        self.local_seq_no = TcpSeqNumber(now.total_millis() as i32);
        self.snd_nxt = self.local_seq_no;
        self.state = State::SynReceived;
        self.ack_pending = true;
        None
    }

    fn process_syn_sent(
        &mut self,
        now: Instant,
        local: &IpEndpoint,
        remote: &IpEndpoint,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        match (repr.control, repr.ack_number) {
            (TcpControl::Syn, Some(ack)) if ack == self.local_seq_no + 1 => {
                self.local_seq_no = self.local_seq_no + 1;
                self.remote_seq_no = repr.seq_number + 1;
                self.remote_mss = repr.max_seg_size.map(|m| m as usize).unwrap_or(DEFAULT_MSS);
                self.remote_win_edge = self.local_seq_no + repr.window_len as usize;
                self.state = State::Established;
                self.ack_pending = true;
                self.retransmit_sent_at = None;
                self.retransmit_in_flight = false;
                None
            }
            // Simultaneous open: peer also sent a bare SYN.
            (TcpControl::Syn, None) => {
                self.remote_seq_no = repr.seq_number + 1;
                self.remote_mss = repr.max_seg_size.map(|m| m as usize).unwrap_or(DEFAULT_MSS);
                self.remote_win_edge = self.local_seq_no + repr.window_len as usize;
                self.state = State::SynReceived;
                self.ack_pending = true;
                None
            }
            _ => self.rst_reply(local, remote, repr),
        }
    }

    fn process_established_like(
        &mut self,
        now: Instant,
        local: &IpEndpoint,
        remote: &IpEndpoint,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        let rcv_nxt = self.remote_seq_no + self.rx_buffer.len();

        // Acceptability check (RFC 793 §3.3): the segment must start
        // exactly at rcv_nxt, since out-of-order data is never buffered.
        if repr.seq_number != rcv_nxt {
            self.note_seq_error();
            // Answer with a challenge ACK so a confused peer can resync,
            // but otherwise drop the segment silently ("play dead").
            return Some(self.ack_now(*local, *remote));
        }
        self.note_good_segment();

        if let Some(ack) = repr.ack_number {
            self.process_ack(now, ack, repr.window_len);
        }

        if self.state == State::SynReceived {
            if repr.ack_number.is_some() {
                self.state = State::Established;
            } else {
                return None;
            }
        }

        if !repr.payload.is_empty() && !self.rd_shutdown {
            let room = self.rx_buffer.window();
            // Data that doesn't fit is dropped wholesale rather than
            // partially buffered, so the peer retransmits the whole
            // segment once room frees up ("play dead").
            if repr.payload.len() <= room {
                self.rx_buffer.enqueue_slice(repr.payload);
                self.ack_pending = true;
            }
        }

        if repr.control == TcpControl::Fin && !self.rx_fin_received {
            let fin_seq = repr.seq_number + repr.payload.len();
            if fin_seq == self.remote_seq_no + self.rx_buffer.len() {
                self.rx_fin_received = true;
                self.ack_pending = true;
                self.state = match self.state {
                    State::Established => State::CloseWait,
                    State::PendingFin1 => State::PendingFin3,
                    State::FinWait1 => State::Closing,
                    State::FinWait2 => State::TimeWait,
                    other => other,
                };
            }
        }

        None
    }

    fn process_ack(&mut self, now: Instant, ack: TcpSeqNumber, window_len: u16) {
        let una = self.local_seq_no;
        let nxt = self.snd_nxt;
        // Reject acks of data we never sent; re-ack our current state.
        if ack > nxt {
            return;
        }
        if ack <= una {
            // Pure duplicate ack of already-acknowledged data: used only
            // for window updates.
            self.update_window(ack, window_len);
            return;
        }

        let newly_acked = ack - una;
        let have_control = matches!(
            self.state,
            State::SynSent | State::SynReceived
        );
        let control_len = if have_control { 1 } else { 0 };
        let data_acked = newly_acked.saturating_sub(control_len);
        self.tx_buffer.advance(data_acked.min(self.tx_buffer.len()));
        self.local_seq_no = ack;
        self.update_window(ack, window_len);

        if !self.retransmit_in_flight {
            if let Some(sent_at) = self.retransmit_sent_at {
                self.rtte.sample(now.checked_duration_since(sent_at));
            }
        } else {
            self.retransmit_in_flight = false;
        }
        self.retransmit_count = 0;
        self.retransmit_sent_at = if self.local_seq_no == self.snd_nxt {
            None
        } else {
            Some(now)
        };

        match self.state {
            State::FinWait1 if ack == self.snd_nxt => self.state = State::FinWait2,
            State::Closing if ack == self.snd_nxt => self.state = State::TimeWait,
            State::LastAck if ack == self.snd_nxt => {
                self.state = State::Closed;
                self.close_reason = Some(CloseReason::Clean);
            }
            _ => {}
        }
    }

    /// Slides the edge of the peer's receive window, relative to the ack
    /// field that accompanied it (RFC 793 §3.7 "Managing the Window"). A
    /// peer is free to shrink as well as grow its advertised window, so
    /// this is an unconditional move rather than a monotonic one.
    ///
    /// (Window scaling/SACK are out of scope.)
    fn update_window(&mut self, ack_base: TcpSeqNumber, window_len: u16) {
        self.remote_win_edge = ack_base + window_len as usize;
    }

    fn ack_now(&self, local: IpEndpoint, remote: IpEndpoint) -> (IpRepr, TcpRepr<'static>) {
        self.build(
            local,
            remote,
            TcpControl::None,
            self.snd_nxt,
            Some(self.remote_seq_no + self.rx_buffer.len()),
            self.advertised_window(),
            None,
            &[],
        )
    }

    fn build<'b>(
        &self,
        local: IpEndpoint,
        remote: IpEndpoint,
        control: TcpControl,
        seq: TcpSeqNumber,
        ack: Option<TcpSeqNumber>,
        window_len: u16,
        max_seg_size: Option<u16>,
        payload: &'b [u8],
    ) -> (IpRepr, TcpRepr<'b>) {
        let repr = TcpRepr {
            src_port: local.port,
            dst_port: remote.port,
            control,
            seq_number: seq,
            ack_number: ack,
            window_len,
            max_seg_size,
            payload,
        };
        let ip_repr = IpRepr::new(
            local.addr,
            remote.addr,
            IpProtocol::Tcp,
            repr.header_len(),
            self.hop_limit.unwrap_or(64),
        );
        (ip_repr, repr)
    }

    /// Whether the socket has anything to say this tick: new data, a FIN to
    /// send, a pending ack, a zero-window probe, or an overdue
    /// retransmission.
    fn has_work(&self, now: Instant) -> bool {
        if self.tuple.is_none() {
            return false;
        }
        if self.ack_pending {
            return true;
        }
        if matches!(
            self.state,
            State::PendingFin1 | State::PendingFin2 | State::PendingFin3
        ) {
            return true;
        }
        if self.local_seq_no != self.snd_nxt {
            if let Some(sent_at) = self.retransmit_sent_at {
                if now.after(self.rtte.overdue_at(sent_at, crate::time::ticks_to_duration(1))) {
                    return true;
                }
            }
        }
        // Zero-window probe: the peer has no room, but we still owe it
        // data, so there is work even though nothing fits in its window.
        if self.snd_nxt >= self.remote_win_edge && self.tx_buffer.len() > 0 {
            return true;
        }
        let unsent = (self.local_seq_no + self.tx_buffer.len()) - self.snd_nxt;
        unsent > 0 && self.snd_nxt < self.remote_win_edge
    }

    /// Emits at most one outbound segment, calling `emit` with the IP/TCP
    /// reprs and payload bytes to transmit. Retransmission re-reads
    /// already-sent-but-unacked bytes out of `tx_buffer` rather than
    /// tracking a separate copy.
    pub fn dispatch<F, E>(&mut self, now: Instant, mut emit: F) -> Result<(), E>
    where
        F: FnMut(IpRepr, TcpRepr) -> Result<(), E>,
    {
        let Some(tuple) = self.tuple else { return Ok(()) };
        if !self.has_work(now) {
            return Ok(());
        }

        match self.state {
            State::SynSent if self.retransmit_sent_at.is_none() => {
                let (ip, repr) = self.build(
                    tuple.local,
                    tuple.remote,
                    TcpControl::Syn,
                    self.local_seq_no,
                    None,
                    self.advertised_window(),
                    Some(self.remote_mss.min(u16::MAX as usize) as u16),
                    &[],
                );
                self.snd_nxt = self.local_seq_no + 1;
                self.retransmit_sent_at = Some(now);
                return emit(ip, repr);
            }
            State::SynReceived if self.retransmit_sent_at.is_none() => {
                let (ip, repr) = self.build(
                    tuple.local,
                    tuple.remote,
                    TcpControl::Syn,
                    self.local_seq_no,
                    Some(self.remote_seq_no),
                    self.advertised_window(),
                    Some(self.remote_mss.min(u16::MAX as usize) as u16),
                    &[],
                );
                self.snd_nxt = self.local_seq_no + 1;
                self.retransmit_sent_at = Some(now);
                self.ack_pending = false;
                return emit(ip, repr);
            }
            _ => {}
        }

        // Overdue retransmission: re-send from snd_una, doubling the RTT
        // estimate and counting toward the abort threshold.
        if self.local_seq_no != self.snd_nxt {
            if let Some(sent_at) = self.retransmit_sent_at {
                if now.after(self.rtte.overdue_at(sent_at, crate::time::ticks_to_duration(1))) {
                    if self.retransmit_count >= MAX_RETRIES {
                        self.reset();
                        self.close_reason = Some(CloseReason::RetriesExhausted);
                        return Ok(());
                    }
                    self.retransmit_count += 1;
                    self.retransmit_in_flight = true;
                    self.rtte.on_retransmit();
                    self.snd_nxt = self.local_seq_no;
                }
            }
        }

        // Zero-window probe: peer has no room, but we still have unsent
        // data. Re-send the single byte just before our current send edge
        // so the peer's ack reveals whether its window has opened.
        if self.snd_nxt >= self.remote_win_edge && self.tx_buffer.len() > 0 {
            let probe_seq = self.snd_nxt - 1;
            let (ip, repr) = self.build(
                tuple.local,
                tuple.remote,
                TcpControl::None,
                probe_seq,
                Some(self.remote_seq_no + self.rx_buffer.len()),
                self.advertised_window(),
                None,
                &[],
            );
            return emit(ip, repr);
        }

        // Data (re)transmission, piggybacking the ack: this is also how a
        // pure ACK gets elided — if there's data to send, the ack rides
        // along on it instead of going out as its own segment first.
        let offset = self.snd_nxt - self.local_seq_no;
        let window_allows = (self.remote_win_edge - self.local_seq_no).saturating_sub(offset);
        let available = self.tx_buffer.len().saturating_sub(offset);
        let to_send = available.min(window_allows).min(self.remote_mss);

        let sending_fin = to_send == 0
            && available == 0
            && matches!(
                self.state,
                State::PendingFin1 | State::PendingFin2 | State::PendingFin3
            );

        if to_send > 0 || sending_fin {
            let control = if sending_fin {
                TcpControl::Fin
            } else {
                TcpControl::None
            };
            // Computed and applied before borrowing tx_buffer below, since
            // the repr's payload borrows self and would otherwise overlap
            // with these field writes.
            let seq = self.snd_nxt;
            let ack = Some(self.remote_seq_no + self.rx_buffer.len());
            let window = self.advertised_window();
            self.snd_nxt = self.snd_nxt + to_send + control.len();
            if self.retransmit_sent_at.is_none() {
                self.retransmit_sent_at = Some(now);
            }
            self.ack_pending = false;
            if sending_fin {
                self.state = match self.state {
                    State::PendingFin1 => State::FinWait1,
                    State::PendingFin2 => State::LastAck,
                    State::PendingFin3 => State::Closing,
                    other => other,
                };
            }
            let data = self.tx_buffer.get_unallocated(offset, to_send);
            let (ip, repr) = self.build(
                tuple.local,
                tuple.remote,
                control,
                seq,
                ack,
                window,
                None,
                data,
            );
            return emit(ip, repr);
        }

        if self.ack_pending {
            self.ack_pending = false;
            let (ip, repr) = self.ack_now(tuple.local, tuple.remote);
            return emit(ip, repr);
        }

        Ok(())
    }

    /// Housekeeping independent of any inbound segment: applies the
    /// connection-wide idle timeout and the TIME_WAIT expiry. Returns
    /// `true` if the socket should be torn down.
    pub fn poll_housekeeping(&mut self, now: Instant, last_activity: Instant) -> bool {
        if self.state == State::TimeWait {
            if let Some(entered) = self.retransmit_sent_at {
                if now.checked_duration_since(entered) >= TIME_WAIT_TIMEOUT {
                    self.reset();
                    self.close_reason = Some(CloseReason::Clean);
                    return true;
                }
            } else {
                self.retransmit_sent_at = Some(now);
            }
        }
        if let Some(timeout) = self.timeout {
            if self.is_active() && now.checked_duration_since(last_activity) >= timeout {
                self.reset();
                self.close_reason = Some(CloseReason::CloseTimedOut);
                return true;
            }
        }
        false
    }

    /// When the interface should call [`Socket::dispatch`] on this socket
    /// again: immediately if it has work queued, at the next overdue-
    /// retransmission instant if one is pending, or not until a new segment
    /// arrives otherwise.
    pub(crate) fn poll_at(&self, cx: &mut InterfaceInner) -> PollAt {
        if self.tuple.is_none() {
            return PollAt::Ingress;
        }
        let now = cx.now();
        if self.has_work(now) {
            return PollAt::Now;
        }
        if let Some(sent_at) = self.retransmit_sent_at {
            return PollAt::Time(self.rtte.overdue_at(sent_at, crate::time::ticks_to_duration(1)));
        }
        PollAt::Ingress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::IpAddress;

    fn endpoints() -> (IpEndpoint, IpEndpoint) {
        (
            IpEndpoint::new(IpAddress::v4(10, 0, 0, 1), 80),
            IpEndpoint::new(IpAddress::v4(10, 0, 0, 2), 4000),
        )
    }

    fn socket() -> Socket<'static> {
        Socket::new(
            RingBuffer::new(Box::leak(Box::new([0u8; 2048]))),
            RingBuffer::new(Box::leak(Box::new([0u8; 2048]))),
        )
    }

    #[test]
    fn listen_rejects_port_zero() {
        let mut s = socket();
        assert_eq!(s.listen(0u16), Err(ListenError::Unaddressable));
    }

    #[test]
    fn passive_open_completes_three_way_handshake() {
        let (local, remote) = endpoints();
        let mut s = socket();
        s.listen(local).unwrap();

        let syn = TcpRepr {
            src_port: remote.port,
            dst_port: local.port,
            control: TcpControl::Syn,
            seq_number: TcpSeqNumber(1000),
            ack_number: None,
            window_len: 4096,
            max_seg_size: Some(1460),
            payload: &[],
        };
        let ip_repr = IpRepr::new(remote.addr, local.addr, IpProtocol::Tcp, 0, 64);
        assert!(s.process(Instant::ZERO, &ip_repr, &syn).is_none());
        assert_eq!(s.state(), State::SynReceived);

        let mut sent = None;
        s.dispatch(Instant::ZERO, |ip, repr| {
            sent = Some((ip, repr.control, repr.ack_number));
            Ok::<(), ()>(())
        })
        .unwrap();
        let (_, control, ack) = sent.unwrap();
        assert_eq!(control, TcpControl::Syn);
        assert_eq!(ack, Some(TcpSeqNumber(1001)));

        let ack_seg = TcpRepr {
            src_port: remote.port,
            dst_port: local.port,
            control: TcpControl::None,
            seq_number: TcpSeqNumber(1001),
            ack_number: Some(s.local_seq_no + 1),
            window_len: 4096,
            max_seg_size: None,
            payload: &[],
        };
        s.process(Instant::ZERO, &ip_repr, &ack_seg);
        assert_eq!(s.state(), State::Established);
    }

    #[test]
    fn close_on_established_moves_to_pending_fin() {
        let mut s = socket();
        s.state = State::Established;
        s.tuple = Some(Tuple {
            local: endpoints().0,
            remote: endpoints().1,
        });
        s.close();
        assert_eq!(s.state(), State::PendingFin1);
        assert!(s.wr_shutdown);
    }

    #[test]
    fn out_of_window_segment_is_dropped_not_buffered() {
        let (local, remote) = endpoints();
        let mut s = socket();
        s.state = State::Established;
        s.tuple = Some(Tuple { local, remote });
        s.remote_seq_no = TcpSeqNumber(500);
        s.remote_win_edge = s.local_seq_no + 4096;

        let stale = TcpRepr {
            src_port: remote.port,
            dst_port: local.port,
            control: TcpControl::None,
            seq_number: TcpSeqNumber(400),
            ack_number: Some(s.local_seq_no),
            window_len: 4096,
            max_seg_size: None,
            payload: b"late",
        };
        let ip_repr = IpRepr::new(remote.addr, local.addr, IpProtocol::Tcp, 0, 64);
        s.process(Instant::ZERO, &ip_repr, &stale);
        assert!(s.rx_buffer.is_empty());
        assert_eq!(s.seq_error_streak, 1);
    }

    #[test]
    fn ack_updates_remote_window_edge() {
        let (local, remote) = endpoints();
        let mut s = socket();
        s.state = State::Established;
        s.tuple = Some(Tuple { local, remote });
        s.remote_seq_no = TcpSeqNumber(500);
        s.local_seq_no = TcpSeqNumber(1000);
        s.snd_nxt = TcpSeqNumber(1000);
        s.remote_win_edge = s.local_seq_no + 4096;

        // The peer shrinks its advertised window on a later pure ack; the
        // socket must track that instead of keeping the handshake's value.
        let shrunk = TcpRepr {
            src_port: remote.port,
            dst_port: local.port,
            control: TcpControl::None,
            seq_number: TcpSeqNumber(500),
            ack_number: Some(TcpSeqNumber(1000)),
            window_len: 128,
            max_seg_size: None,
            payload: &[],
        };
        let ip_repr = IpRepr::new(remote.addr, local.addr, IpProtocol::Tcp, 0, 64);
        s.process(Instant::ZERO, &ip_repr, &shrunk);
        assert_eq!(s.remote_win_edge, TcpSeqNumber(1000) + 128);
    }
}
