use byteorder::{ByteOrder, NetworkEndian};
use core::cmp::Ordering;
use core::fmt;
use core::ops;

use super::ip::checksum;
use super::{Error, IpAddress, IpProtocol, Result};
use crate::phy::ChecksumCapabilities;

/// A TCP sequence number, with wraparound-correct arithmetic and ordering
/// (RFC 793 §3.3). Comparisons use modular distance, exactly like the
/// `SEQ_LT`/`SEQ_GT`/... macros in the source this stack's window logic was
/// distilled from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeqNumber(pub i32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;
    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;
    fn sub(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::Sub<SeqNumber> for SeqNumber {
    type Output = usize;
    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        assert!(result >= 0, "seq number subtraction wrapped: {self} - {rhs}");
        result as usize
    }
}

impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

impl SeqNumber {
    /// Whether `self` falls within `(start, end)`, exclusive, under modular
    /// arithmetic. Used by the acceptability tests in RFC 793 §3.3.
    pub fn in_window(&self, start: SeqNumber, end: SeqNumber) -> bool {
        let pos = (*self - start) as i32;
        let len = (end - start) as i32;
        pos > 0 && pos < len
    }

    pub fn in_window_inclusive(&self, start: SeqNumber, end: SeqNumber) -> bool {
        *self == start || self.in_window(start, end) || *self == end
    }
}

enum_with_unknown! {
    /// TCP control flags combination, as understood by this stack: a
    /// segment carries at most one of SYN/FIN/RST (never combined with each
    /// other, matching the subset of RFC 793 this stack implements).
    pub enum Control(u8) {
        None = 0x00,
        Syn  = 0x01,
        Fin  = 0x02,
        Rst  = 0x03
    }
}

impl Control {
    /// Number of sequence numbers this control flag itself occupies.
    pub const fn len(self) -> usize {
        match self {
            Control::Syn | Control::Fin => 1,
            _ => 0,
        }
    }
}

mod field {
    use crate::wire::field::*;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const OPT_END: u8 = 0x00;
    pub const OPT_NOP: u8 = 0x01;
    pub const OPT_MSS: u8 = 0x02;
}

pub const HEADER_LEN: usize = field::URGENT.end;

const FLAG_FIN: u16 = 0x001;
const FLAG_SYN: u16 = 0x002;
const FLAG_RST: u16 = 0x004;
const FLAG_PSH: u16 = 0x008;
const FLAG_ACK: u16 = 0x010;
const FLAG_URG: u16 = 0x020;

/// A TCP header option. This stack negotiates MSS only; SACK, window
/// scaling, and timestamps are out of scope.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    Unknown { kind: u8, length: u8 },
}

impl TcpOption {
    pub fn parse(buffer: &[u8]) -> Result<(&[u8], TcpOption)> {
        let (length, option);
        match buffer.first() {
            Some(&field::OPT_END) => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            Some(&field::OPT_NOP) => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            Some(&kind) => {
                length = *buffer.get(1).ok_or(Error)? as usize;
                let data = buffer.get(2..length).ok_or(Error)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) => {
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data))
                    }
                    (_, _) => option = TcpOption::Unknown { kind, length: length as u8 },
                }
            }
            None => return Err(Error),
        }
        Ok((&buffer[length..], option))
    }

    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::Unknown { length, .. } => *length as usize,
        }
    }

    pub fn emit<'a>(&self, buffer: &'a mut [u8]) -> &'a mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                buffer[0] = field::OPT_END;
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = field::OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                length = 4;
                buffer[0] = field::OPT_MSS;
                buffer[1] = length as u8;
                NetworkEndian::write_u16(&mut buffer[2..4], value);
            }
            TcpOption::Unknown { kind, length: len } => {
                length = len as usize;
                buffer[0] = kind;
                buffer[1] = len;
            }
        }
        &mut buffer[length..]
    }
}

/// A read/write wrapper around a TCP segment buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error);
        }
        let header_len = self.header_len() as usize;
        if len < header_len || header_len < HEADER_LEN {
            return Err(Error);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    /// Data offset, in octets.
    pub fn header_len(&self) -> u16 {
        ((self.buffer.as_ref()[field::FLAGS.start] >> 4) * 4) as u16
    }

    fn raw_flags(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]) & 0x0fff
    }

    pub fn fin(&self) -> bool {
        self.raw_flags() & FLAG_FIN != 0
    }

    pub fn syn(&self) -> bool {
        self.raw_flags() & FLAG_SYN != 0
    }

    pub fn rst(&self) -> bool {
        self.raw_flags() & FLAG_RST != 0
    }

    pub fn psh(&self) -> bool {
        self.raw_flags() & FLAG_PSH != 0
    }

    pub fn ack(&self) -> bool {
        self.raw_flags() & FLAG_ACK != 0
    }

    pub fn urg(&self) -> bool {
        self.raw_flags() & FLAG_URG != 0
    }

    /// Which of SYN/FIN/RST this segment carries, if any. This stack never
    /// sees more than one set at a time.
    pub fn control(&self) -> Control {
        if self.rst() {
            Control::Rst
        } else if self.syn() {
            Control::Syn
        } else if self.fin() {
            Control::Fin
        } else {
            Control::None
        }
    }

    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WINDOW])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    pub fn verify_checksum(&self, src_addr: &IpAddress, dst_addr: &IpAddress) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
            checksum::data(data),
        ]) == !0
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer.as_ref()[self.header_len() as usize..]
    }

    pub fn options(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::URGENT.end..self.header_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value);
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value);
    }

    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.0);
    }

    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::ACK_NUM], value.0);
    }

    pub fn set_header_len(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        data[field::FLAGS.start] = ((value / 4) as u8) << 4;
    }

    fn set_raw_flags(&mut self, flags: u16) {
        let data = self.buffer.as_mut();
        let raw = ((data[field::FLAGS.start] as u16) << 8) & 0xf000 | (flags & 0x0fff);
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw);
    }

    pub fn set_control(&mut self, control: Control, ack: bool) {
        let mut flags = if ack { FLAG_ACK } else { 0 };
        flags |= match control {
            Control::Syn => FLAG_SYN,
            Control::Fin => FLAG_FIN,
            Control::Rst => FLAG_RST,
            Control::None => 0,
            Control::Unknown(_) => 0,
        };
        self.set_raw_flags(flags);
    }

    pub fn set_psh(&mut self, value: bool) {
        let flags = self.raw_flags();
        let flags = if value { flags | FLAG_PSH } else { flags & !FLAG_PSH };
        self.set_raw_flags(flags);
    }

    pub fn set_ack(&mut self, value: bool) {
        let flags = self.raw_flags();
        let flags = if value { flags | FLAG_ACK } else { flags & !FLAG_ACK };
        self.set_raw_flags(flags);
    }

    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WINDOW], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value);
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[field::URGENT.end..header_len]
    }

    pub fn fill_checksum(&mut self, src_addr: &IpAddress, dst_addr: &IpAddress) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
                checksum::data(data),
            ])
        };
        self.set_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[header_len..]
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP src={} dst={} seq={} ack={} win={}",
            self.src_port(),
            self.dst_port(),
            self.seq_number(),
            self.ack_number(),
            self.window_len()
        )
    }
}

/// Default MSS assumed when a peer's SYN carries none (RFC 879).
pub const DEFAULT_MSS: u16 = 536;

/// A high-level representation of a TCP segment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub control: Control,
    pub seq_number: SeqNumber,
    pub ack_number: Option<SeqNumber>,
    pub window_len: u16,
    pub max_seg_size: Option<u16>,
    pub payload: &'a [u8],
}

impl<'a> Repr<'a> {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&'a T>,
        src_addr: &IpAddress,
        dst_addr: &IpAddress,
        checksum_caps: &ChecksumCapabilities,
    ) -> Result<Repr<'a>> {
        if packet.dst_port() == 0 {
            return Err(Error);
        }
        if checksum_caps.tcp.rx() && !packet.verify_checksum(src_addr, dst_addr) {
            return Err(Error);
        }

        let ack_number = if packet.ack() {
            Some(packet.ack_number())
        } else {
            None
        };
        // At most one of SYN/FIN/RST may be set; this stack never produces
        // and does not expect a segment that claims more than one.
        if u8::from(packet.syn()) + u8::from(packet.fin()) + u8::from(packet.rst()) > 1 {
            return Err(Error);
        }

        let mut max_seg_size = None;
        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            if let TcpOption::MaxSegmentSize(value) = option {
                max_seg_size = Some(value);
            }
            if matches!(option, TcpOption::EndOfList) {
                break;
            }
            options = next_options;
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            control: packet.control(),
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            max_seg_size,
            payload: packet.payload(),
        })
    }

    /// Header length, including the MSS option this stack emits only on
    /// SYN segments.
    pub fn header_len(&self) -> usize {
        let mut length = field::URGENT.end;
        if self.max_seg_size.is_some() {
            length += 4;
        }
        length
    }

    pub fn buffer_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]> + ?Sized>(
        &self,
        packet: &mut Packet<&mut T>,
        src_addr: &IpAddress,
        dst_addr: &IpAddress,
        checksum_caps: &ChecksumCapabilities,
    ) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_header_len(self.header_len() as u16);
        packet.set_control(self.control, self.ack_number.is_some());
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(0);

        if let Some(mss) = self.max_seg_size {
            let mut options = packet.options_mut();
            options = TcpOption::MaxSegmentSize(mss).emit(options);
            TcpOption::EndOfList.emit(options);
        }

        packet.payload_mut().copy_from_slice(self.payload);

        if checksum_caps.tcp.tx() {
            packet.fill_checksum(src_addr, dst_addr);
        } else {
            packet.set_checksum(0);
        }
    }
}

impl fmt::Display for Repr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP src={} dst={} seq={}",
            self.src_port, self.dst_port, self.seq_number
        )?;
        if let Some(ack) = self.ack_number {
            write!(f, " ack={ack}")?;
        }
        write!(f, " win={}", self.window_len)?;
        match self.control {
            Control::Syn => write!(f, " syn")?,
            Control::Fin => write!(f, " fin")?,
            Control::Rst => write!(f, " rst")?,
            _ => {}
        }
        if !self.payload.is_empty() {
            write!(f, " len={}", self.payload.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Ipv4Address;

    fn addrs() -> (IpAddress, IpAddress) {
        (
            IpAddress::Ipv4(Ipv4Address::new(192, 168, 1, 1)),
            IpAddress::Ipv4(Ipv4Address::new(192, 168, 1, 2)),
        )
    }

    #[test]
    fn seq_number_wraparound_ordering() {
        let a = SeqNumber(i32::MAX);
        let b = a + 10;
        assert!(b > a);
        assert_eq!(b - a, 10);
    }

    #[test]
    fn syn_with_mss_roundtrip() {
        let (src, dst) = addrs();
        let repr = Repr {
            src_port: 1000,
            dst_port: 80,
            control: Control::Syn,
            seq_number: SeqNumber(1000),
            ack_number: None,
            window_len: 4096,
            max_seg_size: Some(1460),
            payload: &[],
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        let caps = ChecksumCapabilities::default();
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet, &src, &dst, &caps);
        }
        let packet = Packet::new_checked(&buf[..]).unwrap();
        let parsed = Repr::parse(&packet, &src, &dst, &caps).unwrap();
        assert_eq!(parsed.max_seg_size, Some(1460));
        assert_eq!(parsed.control, Control::Syn);
    }

    #[test]
    fn data_segment_with_ack_roundtrip() {
        let (src, dst) = addrs();
        let payload = b"hello";
        let repr = Repr {
            src_port: 1000,
            dst_port: 80,
            control: Control::None,
            seq_number: SeqNumber(2000),
            ack_number: Some(SeqNumber(500)),
            window_len: 8192,
            max_seg_size: None,
            payload,
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        let caps = ChecksumCapabilities::default();
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet, &src, &dst, &caps);
        }
        let packet = Packet::new_checked(&buf[..]).unwrap();
        let parsed = Repr::parse(&packet, &src, &dst, &caps).unwrap();
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.ack_number, Some(SeqNumber(500)));
    }
}
