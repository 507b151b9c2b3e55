//! RFC 1035 message format: just enough to build an A-record query and walk
//! a response's question/answer/authority sections. Grounded in the
//! resolver's on-wire needs (A, CNAME, NS records; no compression-pointer
//! writing, only following pointers on read, since this stack never emits
//! a response of its own).

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;
use core::net::Ipv4Addr;

use super::{Error, Result};

mod field {
    use crate::wire::field::*;

    pub const ID: Field = 0..2;
    pub const FLAGS: Field = 2..4;
    pub const QDCOUNT: Field = 4..6;
    pub const ANCOUNT: Field = 6..8;
    pub const NSCOUNT: Field = 8..10;
    pub const ARCOUNT: Field = 10..12;
}

pub const HEADER_LEN: usize = field::ARCOUNT.end;

enum_with_unknown! {
    pub enum QueryType(u16) {
        A     = 1,
        Ns    = 2,
        Cname = 5
    }
}

enum_with_unknown! {
    pub enum ResponseCode(u8) {
        NoError        = 0,
        FormatError    = 1,
        ServerFailure  = 2,
        NameError      = 3,
        NotImplemented = 4,
        Refused        = 5
    }
}

/// A read-only wrapper around a DNS message buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        if packet.buffer.as_ref().len() < HEADER_LEN {
            return Err(Error);
        }
        Ok(packet)
    }

    pub fn id(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ID])
    }

    pub fn is_response(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]) & 0x8000 != 0
    }

    pub fn recursion_available(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]) & 0x0080 != 0
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from((NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]) & 0x000f) as u8)
    }

    pub fn question_count(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::QDCOUNT])
    }

    pub fn answer_count(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ANCOUNT])
    }

    pub fn authority_count(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::NSCOUNT])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_id(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ID], value);
    }

    /// Sets the standard-query, recursion-desired flag combination. This
    /// stack only ever emits that one flag pattern: recursive resolution is
    /// the default mode.
    pub fn set_standard_query_flags(&mut self) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLAGS], 0x0100);
    }

    pub fn set_question_count(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::QDCOUNT], value);
    }

    pub fn set_answer_count(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ANCOUNT], value);
    }

    pub fn set_authority_count(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::NSCOUNT], value);
    }

    pub fn set_additional_count(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ARCOUNT], value);
    }
}

/// Writes a DNS name label sequence (no compression), returning the number
/// of bytes written.
fn emit_name(buffer: &mut [u8], name: &str) -> usize {
    let mut pos = 0;
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        buffer[pos] = label.len() as u8;
        pos += 1;
        buffer[pos..pos + label.len()].copy_from_slice(label.as_bytes());
        pos += label.len();
    }
    buffer[pos] = 0;
    pos + 1
}

fn name_len(name: &str) -> usize {
    name.split('.').filter(|l| !l.is_empty()).map(|l| l.len() + 1).sum::<usize>() + 1
}

/// Reads a (possibly compressed) name starting at `pos` in `buffer`,
/// appending dotted labels to `out`. Returns the offset just past the name
/// as it appears at `pos` (not following any pointer it may contain).
fn read_name(buffer: &[u8], mut pos: usize, out: &mut alloc_free::NameBuf) -> Result<usize> {
    let start = pos;
    let mut jumped = false;
    let mut after_pointer = 0;
    let mut guard = 0;

    loop {
        guard += 1;
        if guard > 128 {
            return Err(Error); // pointer loop guard
        }
        let len = *buffer.get(pos).ok_or(Error)?;
        if len == 0 {
            pos += 1;
            break;
        } else if len & 0xc0 == 0xc0 {
            let b2 = *buffer.get(pos + 1).ok_or(Error)? as usize;
            let target = (((len as usize) & 0x3f) << 8) | b2;
            if !jumped {
                after_pointer = pos + 2;
                jumped = true;
            }
            pos = target;
            continue;
        } else {
            let len = len as usize;
            let label = buffer.get(pos + 1..pos + 1 + len).ok_or(Error)?;
            out.push_label(label)?;
            pos += 1 + len;
        }
    }

    Ok(if jumped { after_pointer } else { pos.max(start + 1) })
}

/// A fixed-capacity name buffer, avoiding a heap allocation for the common
/// case of short DNS names.
pub mod alloc_free {
    use super::Error;
    use core::fmt;

    pub const MAX_NAME_LEN: usize = 255;

    #[derive(Clone, Copy)]
    pub struct NameBuf {
        buf: [u8; MAX_NAME_LEN],
        len: usize,
    }

    impl NameBuf {
        pub const fn new() -> NameBuf {
            NameBuf {
                buf: [0; MAX_NAME_LEN],
                len: 0,
            }
        }

        pub fn push_label(&mut self, label: &[u8]) -> Result<(), Error> {
            if self.len != 0 {
                *self.buf.get_mut(self.len).ok_or(Error)? = b'.';
                self.len += 1;
            }
            let end = self.len + label.len();
            self.buf.get_mut(self.len..end).ok_or(Error)?.copy_from_slice(label);
            self.len = end;
            Ok(())
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }

    impl Default for NameBuf {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Display for NameBuf {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl fmt::Debug for NameBuf {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "NameBuf({:?})", self.as_str())
        }
    }

    impl PartialEq for NameBuf {
        fn eq(&self, other: &Self) -> bool {
            self.as_str().eq_ignore_ascii_case(other.as_str())
        }
    }
    impl Eq for NameBuf {}
}

pub use alloc_free::NameBuf;

/// A parsed answer record, narrowed to the record types the resolver acts
/// on: A, CNAME, NS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    A { name: NameBuf, addr: Ipv4Addr, ttl: u32 },
    Cname { name: NameBuf, target: NameBuf, ttl: u32 },
    Ns { name: NameBuf, target: NameBuf, ttl: u32 },
    Other,
}

/// A high-level representation of a DNS message: the single question this
/// stack ever sends, and every answer/authority record in a response.
#[derive(Debug, Clone)]
pub struct Repr {
    pub id: u16,
    pub is_response: bool,
    pub response_code: ResponseCode,
    pub question: NameBuf,
    pub query_type: QueryType,
}

impl Repr {
    /// Parses only the header and question section; answer walking is done
    /// by [`answers`] since the caller needs a scratch `NameBuf` per record
    /// and a `#[no_std]`-friendly iterator is clearer than a `Vec`.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        let data = packet.buffer.as_ref();
        if packet.question_count() == 0 {
            return Err(Error);
        }
        let mut name = NameBuf::new();
        let after_name = read_name(data, HEADER_LEN, &mut name)?;
        let qtype = NetworkEndian::read_u16(data.get(after_name..after_name + 2).ok_or(Error)?);

        Ok(Repr {
            id: packet.id(),
            is_response: packet.is_response(),
            response_code: packet.response_code(),
            question: name,
            query_type: QueryType::from(qtype),
        })
    }

    pub fn buffer_len(&self) -> usize {
        HEADER_LEN + name_len(self.question.as_str()) + 4
    }

    /// Emits a single-question, recursion-desired query. This stack never
    /// emits a response (it is a resolver, not a server).
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]> + ?Sized>(&self, packet: &mut Packet<&mut T>) {
        packet.set_id(self.id);
        packet.set_standard_query_flags();
        packet.set_question_count(1);
        packet.set_answer_count(0);
        packet.set_authority_count(0);
        packet.set_additional_count(0);

        let data = packet.buffer.as_mut();
        let mut pos = HEADER_LEN;
        pos += emit_name(&mut data[pos..], self.question.as_str());
        NetworkEndian::write_u16(&mut data[pos..pos + 2], self.query_type.into());
        NetworkEndian::write_u16(&mut data[pos + 2..pos + 4], 1); // IN class
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DNS id={} qname={}", self.id, self.question)
    }
}

/// Walks the answer (then authority) section of a response packet,
/// invoking `visit` with each record recognized as A/CNAME/NS. Records of
/// other types are reported as `Record::Other` so the caller's counters
/// stay accurate without needing to understand every RR type on the wire.
pub fn for_each_record<T: AsRef<[u8]> + ?Sized>(
    packet: &Packet<&T>,
    mut visit: impl FnMut(Record),
) -> Result<()> {
    let data = packet.buffer.as_ref();
    let mut pos = HEADER_LEN;

    // Skip the question section.
    for _ in 0..packet.question_count() {
        let mut scratch = NameBuf::new();
        pos = read_name(data, pos, &mut scratch)?;
        pos += 4; // qtype + qclass
    }

    let total = packet.answer_count() as u32 + packet.authority_count() as u32;
    for _ in 0..total {
        let mut name = NameBuf::new();
        pos = read_name(data, pos, &mut name)?;
        let rtype = NetworkEndian::read_u16(data.get(pos..pos + 2).ok_or(Error)?);
        let ttl = NetworkEndian::read_u32(data.get(pos + 4..pos + 8).ok_or(Error)?);
        let rdlength = NetworkEndian::read_u16(data.get(pos + 8..pos + 10).ok_or(Error)?) as usize;
        let rdata_start = pos + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > data.len() {
            return Err(Error);
        }

        match QueryType::from(rtype) {
            QueryType::A if rdlength == 4 => {
                let octets = &data[rdata_start..rdata_end];
                visit(Record::A {
                    name,
                    addr: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                    ttl,
                });
            }
            QueryType::Cname => {
                let mut target = NameBuf::new();
                read_name(data, rdata_start, &mut target)?;
                visit(Record::Cname { name, target, ttl });
            }
            QueryType::Ns => {
                let mut target = NameBuf::new();
                read_name(data, rdata_start, &mut target)?;
                visit(Record::Ns { name, target, ttl });
            }
            _ => visit(Record::Other),
        }

        pos = rdata_end;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(name: &str) -> NameBuf {
        let mut n = NameBuf::new();
        for label in name.split('.') {
            n.push_label(label.as_bytes()).unwrap();
        }
        n
    }

    #[test]
    fn emit_and_parse_query() {
        let repr = Repr {
            id: 0x1234,
            is_response: false,
            response_code: ResponseCode::NoError,
            question: question("example.com"),
            query_type: QueryType::A,
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            repr.emit(&mut packet);
        }
        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert_eq!(packet.id(), 0x1234);
        assert_eq!(packet.question_count(), 1);
        assert!(!packet.is_response());

        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.question, question("example.com"));
    }

    #[test]
    fn parse_response_with_a_record() {
        let mut buf = vec![0u8; HEADER_LEN];
        {
            let mut packet = Packet::new_unchecked(&mut buf[..]);
            packet.set_id(1);
            packet.set_question_count(1);
            packet.set_answer_count(1);
        }
        // flags: response bit set
        NetworkEndian::write_u16(&mut buf[field::FLAGS], 0x8180);

        // question: "a.com" A IN
        let mut q = vec![1, b'a', 3, b'c', b'o', b'm', 0];
        q.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
        q.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
        buf.extend_from_slice(&q);

        // answer: name pointer to question name, A record
        let name_ptr: u16 = 0xc000 | HEADER_LEN as u16;
        buf.extend_from_slice(&name_ptr.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
        buf.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
        buf.extend_from_slice(&300u32.to_be_bytes()); // TTL
        buf.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
        buf.extend_from_slice(&[10, 0, 0, 5]);

        let packet = Packet::new_checked(&buf[..]).unwrap();
        let mut seen = None;
        for_each_record(&packet, |rec| {
            if let Record::A { addr, .. } = rec {
                seen = Some(addr);
            }
        })
        .unwrap();
        assert_eq!(seen, Some(Ipv4Addr::new(10, 0, 0, 5)));
    }
}
