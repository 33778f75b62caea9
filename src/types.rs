//! Basic types for the relay

use std::fmt;
use std::net::Ipv4Addr;

pub const HEADER_LEN: usize = 12;
pub const QR_MASK: u8 = 0x80;
pub const TYPE_A: u16 = 1;
pub const CLASS_IN: u16 = 1;
pub const MAX_LABEL_LEN: u8 = 63;
pub const POINTER_MASK: u8 = 0xC0;

/// A domain name as its sequence of raw labels, without the root label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainName { labels: Vec<Vec<u8>> }

impl DomainName {
    pub fn new(labels: Vec<Vec<u8>>) -> Self { Self { labels } }
    pub fn is_root(&self) -> bool { self.labels.is_empty() }
}

/// Presentation form. Label bytes that are not printable ASCII, and the
/// `.`, `\` and `#` characters, are written as `\DDD`, so the text never
/// contains whitespace or comment markers.
impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() { return f.write_str("."); }
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 { f.write_str(".")?; }
            for &b in label {
                if b.is_ascii_graphic() && !matches!(b, b'.' | b'\\' | b'#') {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "\\{:03}", b)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question { pub name: DomainName, pub qtype: u16, pub qclass: u16 }

/// An answer record. The owner name is skipped during decoding and not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord { pub rtype: u16, pub class: u16, pub ttl: u32, pub rdata: Vec<u8> }

impl ResourceRecord {
    /// The IPv4 address carried by an IN A record, if this is one.
    pub fn address(&self) -> Option<Ipv4Addr> {
        if self.rtype != TYPE_A || self.class != CLASS_IN { return None; }
        let octets: [u8; 4] = self.rdata.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u16,
    pub is_response: bool,
    pub question: Question,
    pub answers: Vec<ResourceRecord>,
}

impl Message {
    pub fn answer_count(&self) -> u16 { self.answers.len() as u16 }

    /// Addresses of every A answer, in wire order.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.answers.iter().filter_map(ResourceRecord::address).collect()
    }
}
