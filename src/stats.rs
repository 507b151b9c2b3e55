//! Operational counters.
//!
//! The original stack kept these as file-scope globals (`Packets_dropped`,
//! `Tcp::Packets_Retransmitted`, ...) dumped on demand by `*_dumpStats`.
//! Per the design notes, stack-wide mutable state is instead held in one
//! explicitly-owned structure rather than reached for as a file-scope
//! variable; callers thread a `&mut Stats` (or embed it in `StackContext`)
//! instead of touching statics.

use core::fmt;

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketStats {
    pub sent: u64,
    pub received: u64,
    pub dropped_no_buffer: u64,
    pub dropped_oversized: u64,
    pub send_retries: u64,
    pub send_errors: u64,
    pub low_free_count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IpStats {
    pub checksum_errors: u64,
    pub fragments_reassembled: u64,
    pub fragments_timed_out: u64,
    pub fragments_overlap_aborted: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpStats {
    pub sent: u64,
    pub received: u64,
    pub retransmitted: u64,
    pub seq_or_ack_errors: u64,
    pub dropped_no_space: u64,
    pub window_reopened: u64,
    pub zero_window_probes_sent: u64,
    pub checksum_errors: u64,
    pub sockets_destroyed: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub packet: PacketStats,
    pub ip: IpStats,
    pub tcp: TcpStats,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Pkt: sent {} rcvd {} dropped(nobuf) {} dropped(oversize) {} low_free {} retries {} errs {}",
            self.packet.sent,
            self.packet.received,
            self.packet.dropped_no_buffer,
            self.packet.dropped_oversized,
            self.packet.low_free_count,
            self.packet.send_retries,
            self.packet.send_errors,
        )?;
        writeln!(
            f,
            "Ip: chksum_errs {} frags_done {} frags_timeout {} frags_overlap {}",
            self.ip.checksum_errors,
            self.ip.fragments_reassembled,
            self.ip.fragments_timed_out,
            self.ip.fragments_overlap_aborted,
        )?;
        write!(
            f,
            "Tcp: sent {} rcvd {} retrans {} seq/ack_errs {} dropped(nospace) {} win_reopen {} probes {} chksum_errs {} destroyed {}",
            self.tcp.sent,
            self.tcp.received,
            self.tcp.retransmitted,
            self.tcp.seq_or_ack_errors,
            self.tcp.dropped_no_space,
            self.tcp.window_reopened,
            self.tcp.zero_window_probes_sent,
            self.tcp.checksum_errors,
            self.tcp.sockets_destroyed,
        )
    }
}
