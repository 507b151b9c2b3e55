use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::ip::checksum;
use super::ipv4::Packet as Ipv4Packet;
use super::{Error, Ipv4Repr, Result};

/// Writes the quoted original datagram an ICMPv4 error carries: the
/// offending IP header followed by as much of its payload as fits
/// (RFC 792 "internet header + 64 bits of data").
fn emit_error_payload(
    buf: &mut [u8],
    header: &Ipv4Repr,
    data: &[u8],
    checksum_caps: &crate::phy::ChecksumCapabilities,
) {
    let header_len = header.buffer_len();
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut buf[..header_len]);
    header.emit(&mut ip_packet, checksum_caps);
    buf[header_len..header_len + data.len()].copy_from_slice(data);
}

enum_with_unknown! {
    /// ICMPv4 message type.
    pub enum Message(u8) {
        EchoReply       = 0,
        DstUnreachable  = 3,
        Redirect        = 5,
        EchoRequest     = 8,
        TimeExceeded    = 11,
        ParamProblem    = 12
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::EchoReply => write!(f, "echo reply"),
            Message::DstUnreachable => write!(f, "destination unreachable"),
            Message::Redirect => write!(f, "redirect"),
            Message::EchoRequest => write!(f, "echo request"),
            Message::TimeExceeded => write!(f, "time exceeded"),
            Message::ParamProblem => write!(f, "parameter problem"),
            Message::Unknown(id) => write!(f, "{id}"),
        }
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Destination Unreachable".
    pub enum DstUnreachable(u8) {
        /// Destination network unreachable
        NetUnreachable   =  0,
        /// Destination host unreachable
        HostUnreachable  =  1,
        /// Destination protocol unreachable
        ProtoUnreachable =  2,
        /// Destination port unreachable
        PortUnreachable  =  3,
        /// Fragmentation required, and DF flag set
        FragRequired     =  4,
        /// Source route failed
        SrcRouteFailed   =  5,
        /// Destination network unknown
        DstNetUnknown    =  6,
        /// Destination host unknown
        DstHostUnknown   =  7,
        /// Source host isolated
        SrcHostIsolated  =  8,
        /// Network administratively prohibited
        NetProhibited    =  9,
        /// Host administratively prohibited
        HostProhibited   = 10,
        /// Network unreachable for ToS
        NetUnreachToS    = 11,
        /// Host unreachable for ToS
        HostUnreachToS   = 12,
        /// Communication administratively prohibited
        CommProhibited   = 13,
        /// Host precedence violation
        HostPrecedViol   = 14,
        /// Precedence cutoff in effect
        PrecedCutoff     = 15
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Time Exceeded".
    pub enum TimeExceeded(u8) {
        /// TTL expired in transit
        TtlExpired  = 0,
        /// Fragment reassembly time exceeded
        FragExpired = 1
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Redirect".
    pub enum Redirect(u8) {
        Network       = 0,
        Host          = 1,
        TosNetwork    = 2,
        TosHost       = 3
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Parameter Problem".
    pub enum ParamProblem(u8) {
        AtPointer        = 0,
        MissingOption    = 1,
        BadLength        = 2
    }
}

mod field {
    use crate::wire::field::*;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: Field = 2..4;

    pub const ECHO_IDENT: Field = 4..6;
    pub const ECHO_SEQNO: Field = 6..8;
    pub const ECHO_PAYLOAD: Rest = 8..;
}

pub const HEADER_LEN: usize = field::ECHO_PAYLOAD.start;

/// A read/write wrapper around an ICMPv4 packet buffer.
///
/// This stack only ever parses inbound Echo Request/Reply messages; it never
/// reacts to an inbound Destination Unreachable or Time Exceeded. It does
/// emit Destination Unreachable itself (`Repr::emit`), to tell a peer their
/// datagram landed on a closed port or unhandled protocol.
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
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn msg_type(&self) -> Message {
        Message::from(self.buffer.as_ref()[field::TYPE])
    }

    pub fn msg_code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ECHO_IDENT])
    }

    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ECHO_SEQNO])
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::data(self.buffer.as_ref()) == 0xffff
    }
}

impl<T: AsRef<[u8]> + ?Sized> Packet<&T> {
    pub fn echo_payload(&self) -> &[u8] {
        &self.buffer.as_ref()[field::ECHO_PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_msg_type(&mut self, value: Message) {
        self.buffer.as_mut()[field::TYPE] = value.into();
    }

    pub fn set_msg_code(&mut self, value: u8) {
        self.buffer.as_mut()[field::CODE] = value;
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_echo_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ECHO_IDENT], value);
    }

    pub fn set_echo_seq_no(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ECHO_SEQNO], value);
    }

    pub fn echo_payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::ECHO_PAYLOAD]
    }

    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = !checksum::data(self.buffer.as_ref());
        self.set_checksum(checksum);
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ICMPv4 type={} code={}", self.msg_type(), self.msg_code())
    }
}

/// A high-level representation of an Internet Control Message Protocol version 4 packet header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum Repr<'a> {
    EchoRequest {
        ident: u16,
        seq_no: u16,
        data: &'a [u8],
    },
    EchoReply {
        ident: u16,
        seq_no: u16,
        data: &'a [u8],
    },
    DstUnreachable {
        reason: DstUnreachable,
        header: Ipv4Repr,
        data: &'a [u8],
    },
    TimeExceeded {
        reason: TimeExceeded,
        header: Ipv4Repr,
        data: &'a [u8],
    },
}

impl<'a> Repr<'a> {
    /// Parses an Echo Request/Reply. Any other message type is out of scope
    /// for this stack and returns `Err` rather than a `Repr` the rest of the
    /// code has no handler for.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&'a T>,
        checksum_caps: &crate::phy::ChecksumCapabilities,
    ) -> Result<Repr<'a>> {
        if matches!(
            checksum_caps.icmpv4,
            crate::phy::Checksum::Both | crate::phy::Checksum::Rx
        ) && !packet.verify_checksum()
        {
            return Err(Error);
        }

        match (packet.msg_type(), packet.msg_code()) {
            (Message::EchoRequest, 0) => Ok(Repr::EchoRequest {
                ident: packet.echo_ident(),
                seq_no: packet.echo_seq_no(),
                data: packet.echo_payload(),
            }),
            (Message::EchoReply, 0) => Ok(Repr::EchoReply {
                ident: packet.echo_ident(),
                seq_no: packet.echo_seq_no(),
                data: packet.echo_payload(),
            }),
            _ => Err(Error),
        }
    }

    pub const fn buffer_len(&self) -> usize {
        match self {
            Repr::EchoRequest { data, .. } | Repr::EchoReply { data, .. } => {
                HEADER_LEN + data.len()
            }
            Repr::DstUnreachable { header, data, .. } | Repr::TimeExceeded { header, data, .. } => {
                HEADER_LEN + header.buffer_len() + data.len()
            }
        }
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]> + ?Sized>(
        &self,
        packet: &mut Packet<&mut T>,
        checksum_caps: &crate::phy::ChecksumCapabilities,
    ) {
        match *self {
            Repr::EchoRequest {
                ident,
                seq_no,
                data,
            } => {
                packet.set_msg_type(Message::EchoRequest);
                packet.set_msg_code(0);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
                packet.echo_payload_mut().copy_from_slice(data);
            }
            Repr::EchoReply {
                ident,
                seq_no,
                data,
            } => {
                packet.set_msg_type(Message::EchoReply);
                packet.set_msg_code(0);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
                packet.echo_payload_mut().copy_from_slice(data);
            }
            Repr::DstUnreachable {
                reason,
                header,
                data,
            } => {
                packet.set_msg_type(Message::DstUnreachable);
                packet.set_msg_code(reason.into());
                packet.set_echo_ident(0);
                packet.set_echo_seq_no(0);
                emit_error_payload(packet.echo_payload_mut(), &header, data, checksum_caps);
            }
            Repr::TimeExceeded {
                reason,
                header,
                data,
            } => {
                packet.set_msg_type(Message::TimeExceeded);
                packet.set_msg_code(reason.into());
                packet.set_echo_ident(0);
                packet.set_echo_seq_no(0);
                emit_error_payload(packet.echo_payload_mut(), &header, data, checksum_caps);
            }
        }

        if matches!(
            checksum_caps.icmpv4,
            crate::phy::Checksum::Both | crate::phy::Checksum::Tx
        ) {
            packet.fill_checksum();
        } else {
            packet.set_checksum(0);
        }
    }
}

impl fmt::Display for Repr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Repr::EchoRequest { ident, seq_no, .. } => {
                write!(f, "ICMPv4 echo request id={ident} seq={seq_no}")
            }
            Repr::EchoReply { ident, seq_no, .. } => {
                write!(f, "ICMPv4 echo reply id={ident} seq={seq_no}")
            }
            Repr::DstUnreachable { reason, .. } => write!(f, "ICMPv4 dst unreachable {reason:?}"),
            Repr::TimeExceeded { reason, .. } => write!(f, "ICMPv4 time exceeded {reason:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::ChecksumCapabilities;

    #[test]
    fn echo_request_roundtrip() {
        let data = [1, 2, 3, 4];
        let repr = Repr::EchoRequest {
            ident: 42,
            seq_no: 7,
            data: &data,
        };
        let mut buf = [0u8; HEADER_LEN + 4];
        let checksum_caps = ChecksumCapabilities::default();
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet, &checksum_caps);
        }
        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert_eq!(Repr::parse(&packet, &checksum_caps).unwrap(), repr);
    }

    #[test]
    fn non_echo_message_is_rejected() {
        let mut buf = [0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buf[..]);
        packet.set_msg_type(Message::TimeExceeded);
        packet.set_msg_code(0);
        packet.fill_checksum();
        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert!(Repr::parse(&packet, &ChecksumCapabilities::default()).is_err());
    }

    #[test]
    fn dst_unreachable_emit_quotes_original_header() {
        use crate::wire::ip::Protocol;
        use crate::wire::ipv4::Address as Ipv4Address;

        let quoted_data = [0xaa, 0xbb, 0xcc, 0xdd];
        let header = Ipv4Repr {
            src_addr: Ipv4Address::new(192, 168, 1, 1),
            dst_addr: Ipv4Address::new(192, 168, 1, 2),
            next_header: Protocol::Udp,
            payload_len: quoted_data.len(),
            hop_limit: 64,
        };
        let repr = Repr::DstUnreachable {
            reason: DstUnreachable::PortUnreachable,
            header,
            data: &quoted_data,
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        let checksum_caps = ChecksumCapabilities::default();
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet, &checksum_caps);
        }
        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert_eq!(packet.msg_type(), Message::DstUnreachable);
        assert_eq!(packet.msg_code(), u8::from(DstUnreachable::PortUnreachable));
        assert!(packet.verify_checksum());
        let quoted = &packet.echo_payload()[header.buffer_len()..];
        assert_eq!(quoted, &quoted_data);
    }
}
