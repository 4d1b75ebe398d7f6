//! Base structures for DNS messages, taken from https://datatracker.ietf.org/doc/html/rfc1035
//! and restricted to what an authoritative replica-selection responder needs:
//! one question in, one A answer out.
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{CdnError, CdnResult};

// DNS packets are called "messages" in RFC1035:
// "All communications inside of the domain protocol are carried in a single format called a message"
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSMessage {
    pub header: DNSPacketHeader,
    pub question: Option<DNSQuestion>,
    pub answer: Option<DNSResourceRecord>,
}

pub const MAX_DNS_PACKET_SIZE: usize = 512;

// The only record type/class this plane ever answers with
pub const QTYPE_A: u16 = 1;
pub const QCLASS_IN: u16 = 1;

// DNS packet header: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSPacketHeader {
    pub id: u16, // A 16 bit identifier assigned by the program that
    //   generates any kind of query.  This identifier is copied into
    //   the corresponding reply and can be used by the requester
    //   to match up replies to outstanding queries.
    pub flags: DNSPacketFlags,
    pub qd_count: u16, // an unsigned 16 bit integer specifying the number of
    //    entries in the question section.
    pub an_count: u16, // an unsigned 16 bit integer specifying the number of
    // resource records in the answer section.
    pub ns_count: u16, // an unsigned 16 bit integer specifying the number of name
    // server resource records in the authority records section.
    pub ar_count: u16, // an unsigned 16 bit integer specifying the number of
                       // resource records in the additional records section.
}

// Flags: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
//
// The op code and response code stay raw 4-bit integers: the responder
// echoes opcodes verbatim and never interprets them, so an enum with holes
// for the unassigned values would only add failure paths.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSPacketFlags {
    pub packet_type: PacketType, // A one bit field that specifies whether this message is a query (0), or a response (1).
    pub op_code: u8,             // A four bit field that specifies kind of query in this
    //  message.  This value is set by the originator of a query
    //  and copied into the response.
    pub authoritative_answer: bool, // Authoritative Answer - this bit is valid in responses,
    // and specifies that the responding name server is an
    // authority for the domain name in question section.
    pub truncated: bool, // TrunCation - specifies that this message was truncated
    // due to length greater than that permitted on the
    // transmission channel.
    pub recursion_desired: bool, // Recursion Desired - this bit may be set in a query and
    // is copied into the response.
    pub recursion_available: bool, // Recursion Available - denotes whether recursive query
    // support is available in the name server. Never, here.
    pub z: u8, // Reserved for future use.  Must be zero in all queries and responses.
    pub response_code: u8, // Response code - this 4 bit field is set as part of responses.
}

/// The flags' first bit is 0 or 1 meaning a question or a response. Better is to use an enum which is
/// both clearer and type oriented.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    Query = 0,
    Response = 1,
}

impl Default for PacketType {
    fn default() -> Self {
        PacketType::Query
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PacketType::Query => write!(f, "QUERY"),
            PacketType::Response => write!(f, "RESPONSE"),
        }
    }
}

// Domain name: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
//
// Owned labels rather than borrowed slices: names outlive the transient UDP
// receive buffer they were parsed from.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DomainName {
    pub labels: Vec<String>,
}

impl DomainName {
    /// Name comparison is case-insensitive (RFC1035 section 2.3.3).
    pub fn eq_ignore_case(&self, other: &DomainName) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

/// ```
/// use cdnlib::rfc1035::DomainName;
///
/// let dn = DomainName::try_from("cdn.example.com").unwrap();
/// assert_eq!(dn.labels, &["cdn", "example", "com"]);
/// assert_eq!(dn.to_string(), "cdn.example.com");
///
/// // a trailing root dot is accepted and ignored
/// let dn = DomainName::try_from("cdn.example.com.").unwrap();
/// assert_eq!(dn.labels.len(), 3);
///
/// assert!(DomainName::try_from("").is_err());
/// ```
impl TryFrom<&str> for DomainName {
    type Error = CdnError;

    fn try_from(domain: &str) -> Result<Self, Self::Error> {
        let labels: Vec<_> = domain
            .split('.')
            .filter(|x| !x.is_empty())
            .map(String::from)
            .collect();

        if labels.is_empty() {
            return Err(CdnError::new("empty domain name"));
        }

        Ok(DomainName { labels })
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}

//--------------------------------------------------------------------------------
// Question structure: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.2
//--------------------------------------------------------------------------------
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSQuestion {
    pub name: DomainName,
    pub r#type: u16,
    pub class: u16,
}

//------------------------------------------------------------------------
// Definition of a resource record in the RFC1035
//------------------------------------------------------------------------
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSResourceRecord {
    pub name: DomainName, // an owner name, i.e., the name of the node to which this resource record pertains.
    pub r#type: u16,      // two octets containing one of the RR TYPE codes.
    pub class: u16,       // two octets containing one of the RR CLASS codes.
    pub ttl: u32, // a 32 bit unsigned integer that specifies the time interval
    // that the resource record may be cached.  Zero values are
    // interpreted to mean that the RR can only be used for the
    // transaction in progress, and should not be cached.
    pub rd_length: u16, // an unsigned 16 bit integer that specifies the length in octets of the RDATA field.
    pub rd_data: Vec<u8>, // a variable length string of octets that describes the resource.
}

impl DNSMessage {
    /// Build the authoritative reply to this query, carrying `addr` as a
    /// single A record. The id and question are echoed; every other header
    /// field is pinned: qr=1, aa=1, opcode=0, tc=0, ra=0, z=0, rcode=0,
    /// one question, one answer, nothing in the other sections. The answer
    /// carries a zero TTL so nothing downstream caches a routing decision.
    pub fn answer_a(&self, addr: Ipv4Addr) -> CdnResult<DNSMessage> {
        let question = self
            .question
            .clone()
            .ok_or_else(|| CdnError::new("query carries no question to answer"))?;

        let answer = DNSResourceRecord {
            name: question.name.clone(),
            r#type: QTYPE_A,
            class: QCLASS_IN,
            ttl: 0,
            rd_length: 4,
            rd_data: addr.octets().to_vec(),
        };

        let header = DNSPacketHeader {
            id: self.header.id,
            flags: DNSPacketFlags {
                packet_type: PacketType::Response,
                op_code: 0,
                authoritative_answer: true,
                truncated: false,
                recursion_desired: self.header.flags.recursion_desired,
                recursion_available: false,
                z: 0,
                response_code: 0,
            },
            qd_count: 1,
            an_count: 1,
            ns_count: 0,
            ar_count: 0,
        };

        Ok(DNSMessage {
            header,
            question: Some(question),
            answer: Some(answer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_case_insensitive_eq() {
        let a = DomainName::try_from("CDN.Example.COM").unwrap();
        let b = DomainName::try_from("cdn.example.com").unwrap();
        let c = DomainName::try_from("other.example.com").unwrap();
        assert!(a.eq_ignore_case(&b));
        assert!(!a.eq_ignore_case(&c));
    }

    #[test]
    fn answer_a_echoes_query() {
        let mut query = DNSMessage::default();
        query.header.id = 0x7686;
        query.header.qd_count = 1;
        query.header.flags.recursion_desired = true;
        query.question = Some(DNSQuestion {
            name: DomainName::try_from("cdn.example.com").unwrap(),
            r#type: QTYPE_A,
            class: QCLASS_IN,
        });

        let reply = query.answer_a(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
        assert_eq!(reply.header.id, 0x7686);
        assert_eq!(reply.header.flags.packet_type, PacketType::Response);
        assert!(reply.header.flags.authoritative_answer);
        assert_eq!(reply.header.flags.z, 0);
        assert_eq!(reply.header.qd_count, 1);
        assert_eq!(reply.header.an_count, 1);

        let answer = reply.answer.unwrap();
        assert_eq!(answer.r#type, QTYPE_A);
        assert_eq!(answer.class, QCLASS_IN);
        assert_eq!(answer.ttl, 0);
        assert_eq!(answer.rd_length, 4);
        assert_eq!(answer.rd_data, vec![10, 1, 2, 3]);
        assert!(answer.name.eq_ignore_case(&reply.question.unwrap().name));
    }

    #[test]
    fn answer_a_without_question_fails() {
        let query = DNSMessage::default();
        assert!(query.answer_a(Ipv4Addr::LOCALHOST).is_err());
    }
}
