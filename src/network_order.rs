//! All functions/trait to convert DNS structures to network order back & forth.
//!
//! Parsing reads big-endian fields through a `Cursor`; every failure maps to
//! one `WireError` category so a malformed packet tells you exactly which
//! check it tripped. Serializing writes into a plain `Vec<u8>`, which cannot
//! fail for I/O reasons: the only emit-side errors are the protocol's own
//! (`LabelTooLong`, and `Oversize` at the message level).
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use std::str;

use log::warn;

use crate::error::WireError;
use crate::rfc1035::{
    DNSMessage, DNSPacketFlags, DNSPacketHeader, DNSQuestion, DNSResourceRecord, DomainName,
    PacketType, MAX_DNS_PACKET_SIZE,
};

// A label must begin with two zero bits because labels are restricted to 63
// octets or less (RFC1035 section 4.1.4); anything above is a compression
// pointer, which this plane does not honor.
const MAX_LABEL_SIZE: usize = 63;

const HEADER_SIZE: usize = 12;

// functions to convert or build DNS structures
pub trait ToFromNetworkOrder {
    // copy structure data to a network-order buffer
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError>;

    // copy from a network-order buffer to a structure
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError>;
}

impl ToFromNetworkOrder for u8 {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        buffer.push(*self);
        Ok(1)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        *self = buffer.read_u8().map_err(|_| WireError::Truncated)?;
        Ok(())
    }
}

impl ToFromNetworkOrder for u16 {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        buffer.extend_from_slice(&self.to_be_bytes());
        Ok(2)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        *self = buffer
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::Truncated)?;
        Ok(())
    }
}

impl ToFromNetworkOrder for u32 {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        buffer.extend_from_slice(&self.to_be_bytes());
        Ok(4)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        *self = buffer
            .read_u32::<BigEndian>()
            .map_err(|_| WireError::Truncated)?;
        Ok(())
    }
}

impl ToFromNetworkOrder for DNSPacketFlags {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        // combine all flags according to structure
        //                               1  1  1  1  1  1
        // 0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        // |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        let mut flags = (self.packet_type as u16) << 15;
        flags |= ((self.op_code & 0b1111) as u16) << 11;
        flags |= (self.authoritative_answer as u16) << 10;
        flags |= (self.truncated as u16) << 9;
        flags |= (self.recursion_desired as u16) << 8;
        flags |= (self.recursion_available as u16) << 7;
        flags |= ((self.z & 0b111) as u16) << 4;
        flags |= (self.response_code & 0b1111) as u16;

        flags.to_network_bytes(buffer)?;
        Ok(2)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        let mut flags = 0u16;
        flags.from_network_bytes(buffer)?;

        // decode all flags according to structure
        //                               1  1  1  1  1  1
        // 0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        // |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        self.packet_type = if flags >> 15 == 1 {
            PacketType::Response
        } else {
            PacketType::Query
        };
        self.op_code = (flags >> 11 & 0b1111) as u8;
        self.authoritative_answer = (flags >> 10) & 1 == 1;
        self.truncated = (flags >> 9) & 1 == 1;
        self.recursion_desired = (flags >> 8) & 1 == 1;
        self.recursion_available = (flags >> 7) & 1 == 1;
        self.z = (flags >> 4 & 0b111) as u8;
        self.response_code = (flags & 0b1111) as u8;

        // the z field is reserved and must be zero in all queries and responses
        if self.z != 0 {
            return Err(WireError::ReservedBits);
        }

        Ok(())
    }
}

impl ToFromNetworkOrder for DNSPacketHeader {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        self.id.to_network_bytes(buffer)?;
        self.flags.to_network_bytes(buffer)?;
        self.qd_count.to_network_bytes(buffer)?;
        self.an_count.to_network_bytes(buffer)?;
        self.ns_count.to_network_bytes(buffer)?;
        self.ar_count.to_network_bytes(buffer)?;
        Ok(HEADER_SIZE)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        self.id.from_network_bytes(buffer)?;
        self.flags.from_network_bytes(buffer)?;
        self.qd_count.from_network_bytes(buffer)?;
        self.an_count.from_network_bytes(buffer)?;
        self.ns_count.from_network_bytes(buffer)?;
        self.ar_count.from_network_bytes(buffer)?;
        Ok(())
    }
}

impl ToFromNetworkOrder for DomainName {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        let mut length = 0usize;

        for label in &self.labels {
            // the length prefix is a single octet
            if label.len() >= 256 {
                return Err(WireError::LabelTooLong);
            }
            buffer.push(label.len() as u8);
            buffer.extend_from_slice(label.as_bytes());
            length += label.len() + 1;
        }

        // add sentinel 0x00
        buffer.push(0);

        Ok(length + 1)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        self.labels.clear();

        // a sequence of length-prefixed labels ending in a zero octet
        loop {
            let size = buffer.read_u8().map_err(|_| WireError::BadLabel)? as usize;
            if size == 0 {
                break;
            }
            if size > MAX_LABEL_SIZE {
                return Err(WireError::BadLabel);
            }

            let start = buffer.position() as usize;
            let end = start + size;
            if end > buffer.get_ref().len() {
                return Err(WireError::BadLabel);
            }

            let label = str::from_utf8(&buffer.get_ref()[start..end])
                .map_err(|_| WireError::BadLabel)?;
            self.labels.push(label.to_string());
            buffer.set_position(end as u64);
        }

        Ok(())
    }
}

impl ToFromNetworkOrder for DNSQuestion {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        let mut length = self.name.to_network_bytes(buffer)?;
        length += self.r#type.to_network_bytes(buffer)?;
        length += self.class.to_network_bytes(buffer)?;
        Ok(length)
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        self.name.from_network_bytes(buffer)?;
        self.r#type.from_network_bytes(buffer)?;
        self.class.from_network_bytes(buffer)?;
        Ok(())
    }
}

impl ToFromNetworkOrder for DNSResourceRecord {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize, WireError> {
        let mut length = self.name.to_network_bytes(buffer)?;
        length += self.r#type.to_network_bytes(buffer)?;
        length += self.class.to_network_bytes(buffer)?;
        length += self.ttl.to_network_bytes(buffer)?;
        length += self.rd_length.to_network_bytes(buffer)?;
        buffer.extend_from_slice(&self.rd_data);
        Ok(length + self.rd_data.len())
    }

    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        self.name.from_network_bytes(buffer)?;
        self.r#type.from_network_bytes(buffer)?;
        self.class.from_network_bytes(buffer)?;
        self.ttl.from_network_bytes(buffer)?;
        self.rd_length.from_network_bytes(buffer)?;

        let start = buffer.position() as usize;
        let end = start + self.rd_length as usize;
        if end > buffer.get_ref().len() {
            return Err(WireError::Truncated);
        }
        self.rd_data = buffer.get_ref()[start..end].to_vec();
        buffer.set_position(end as u64);

        Ok(())
    }
}

impl DNSMessage {
    /// Decode one UDP payload: the fixed header, then at most one question
    /// and, when `an_count` says so, at most one answer record. Whatever
    /// follows the parsed sections (extra questions, authority/additional
    /// records, compression pointers) is warned about and discarded.
    pub fn from_wire(packet: &[u8]) -> Result<DNSMessage, WireError> {
        if packet.len() < HEADER_SIZE {
            return Err(WireError::ShortPacket);
        }

        let mut buffer = Cursor::new(packet);
        let mut message = DNSMessage::default();
        message.header.from_network_bytes(&mut buffer)?;

        if message.header.qd_count >= 1 {
            let mut question = DNSQuestion::default();
            question.from_network_bytes(&mut buffer)?;
            message.question = Some(question);
        }

        if message.header.an_count >= 1 {
            let mut answer = DNSResourceRecord::default();
            answer.from_network_bytes(&mut buffer)?;
            message.answer = Some(answer);
        }

        let consumed = buffer.position() as usize;
        if consumed < packet.len() {
            warn!(
                "discarding {} trailing bytes after the first question/answer",
                packet.len() - consumed
            );
        }

        Ok(message)
    }

    /// Encode for the wire. Responses must fit the classic 512-byte UDP limit.
    pub fn to_wire(&self) -> Result<Vec<u8>, WireError> {
        let mut buffer: Vec<u8> = Vec::with_capacity(MAX_DNS_PACKET_SIZE);

        self.header.to_network_bytes(&mut buffer)?;
        if let Some(question) = &self.question {
            question.to_network_bytes(&mut buffer)?;
        }
        if let Some(answer) = &self.answer {
            answer.to_network_bytes(&mut buffer)?;
        }

        if buffer.len() > MAX_DNS_PACKET_SIZE {
            return Err(WireError::Oversize);
        }

        Ok(buffer)
    }
}
