//! Wire codec for the single-question, A-record subset of DNS.
//!
//! Decoding never follows compression pointers. A pointer inside the
//! question name is rejected; a pointer used as the owner name of an
//! answer record is skipped over, since owner names are not kept.

use crate::types::{
    DomainName, Message, Question, ResourceRecord, CLASS_IN, HEADER_LEN, MAX_LABEL_LEN,
    POINTER_MASK, QR_MASK, TYPE_A,
};
use std::net::Ipv4Addr;
use thiserror::Error;

/// TTL stamped on every synthesized answer record.
pub const ANSWER_TTL: u32 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram of {len} bytes is shorter than a DNS header")]
    MalformedHeader { len: usize },
    #[error("message truncated at offset {offset}")]
    TruncatedMessage { offset: usize },
    #[error("compression pointer at offset {offset} is not supported")]
    CompressionUnsupported { offset: usize },
    #[error("reserved label length {len:#04x} at offset {offset}")]
    InvalidLabelLength { offset: usize, len: u8 },
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self { Self { buf, pos } }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::TruncatedMessage { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> { Ok(self.take(1)?[0]) }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decodes the header, the question and, for responses, every answer record.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::MalformedHeader { len: bytes.len() });
    }
    let id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let is_response = bytes[2] & QR_MASK != 0;
    // QDCOUNT is not validated, exactly one question is assumed.
    let ancount = if is_response { u16::from_be_bytes([bytes[6], bytes[7]]) } else { 0 };

    let mut cur = Cursor::new(bytes, HEADER_LEN);
    let name = read_name(&mut cur)?;
    let qtype = cur.u16()?;
    let qclass = cur.u16()?;

    let mut answers = Vec::with_capacity(usize::from(ancount).min(64));
    for _ in 0..ancount {
        answers.push(read_record(&mut cur)?);
    }

    Ok(Message { id, is_response, question: Question { name, qtype, qclass }, answers })
}

/// Offset one past the QTYPE/QCLASS of the question section.
pub fn question_end(bytes: &[u8]) -> Result<usize, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::MalformedHeader { len: bytes.len() });
    }
    let mut cur = Cursor::new(bytes, HEADER_LEN);
    read_name(&mut cur)?;
    cur.take(4)?;
    Ok(cur.pos)
}

/// Builds a response to `query` carrying one A record per address.
///
/// The header and question bytes are copied from `query` with QR set and
/// ANCOUNT rewritten. NSCOUNT and ARCOUNT are cleared because anything
/// after the question section is dropped.
pub fn encode_answer(query: &[u8], addresses: &[Ipv4Addr]) -> Result<Vec<u8>, DecodeError> {
    let end = question_end(query)?;
    let count = addresses.len().min(usize::from(u16::MAX));

    let mut out = Vec::with_capacity(end + count * 16);
    out.extend_from_slice(&query[..end]);
    out[2] |= QR_MASK;
    out[6..8].copy_from_slice(&(count as u16).to_be_bytes());
    out[8..12].fill(0);

    for addr in &addresses[..count] {
        out.extend_from_slice(&[POINTER_MASK, HEADER_LEN as u8]);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&addr.octets());
    }
    Ok(out)
}

fn read_name(cur: &mut Cursor<'_>) -> Result<DomainName, DecodeError> {
    let mut labels = Vec::new();
    loop {
        let offset = cur.pos;
        match cur.u8()? {
            0 => return Ok(DomainName::new(labels)),
            len if len & POINTER_MASK == POINTER_MASK => {
                return Err(DecodeError::CompressionUnsupported { offset });
            }
            len if len > MAX_LABEL_LEN => {
                return Err(DecodeError::InvalidLabelLength { offset, len });
            }
            len => {
                let label = cur.take(usize::from(len))?;
                labels.push(label.to_vec());
            }
        }
    }
}

fn skip_owner(cur: &mut Cursor<'_>) -> Result<(), DecodeError> {
    loop {
        let offset = cur.pos;
        match cur.u8()? {
            0 => return Ok(()),
            len if len & POINTER_MASK == POINTER_MASK => {
                cur.take(1)?;
                return Ok(());
            }
            len if len > MAX_LABEL_LEN => {
                return Err(DecodeError::InvalidLabelLength { offset, len });
            }
            len => { cur.take(usize::from(len))?; }
        }
    }
}

fn read_record(cur: &mut Cursor<'_>) -> Result<ResourceRecord, DecodeError> {
    skip_owner(cur)?;
    let rtype = cur.u16()?;
    let class = cur.u16()?;
    let ttl = cur.u32()?;
    let rdlength = cur.u16()?;
    let rdata = cur.take(usize::from(rdlength))?.to_vec();
    Ok(ResourceRecord { rtype, class, ttl, rdata })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{CLASS_IN, TYPE_A};
    use std::net::Ipv4Addr;

    pub const TYPE_CNAME: u16 = 5;

    fn encode_name(out: &mut Vec<u8>, name: &str) {
        for label in name.split('.').filter(|l| !l.is_empty()) {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    /// A standard recursive A query as `dig` would send it, without EDNS.
    pub fn query(id: u16, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        encode_name(&mut out, name);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out
    }

    /// An upstream response whose records use a pointer to the question name.
    pub fn response(id: u16, name: &str, records: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = query(id, name);
        out[2] = 0x81;
        out[3] = 0x80;
        out[6..8].copy_from_slice(&(records.len() as u16).to_be_bytes());
        for (rtype, rdata) in records {
            out.extend_from_slice(&[0xC0, 0x0C]);
            out.extend_from_slice(&rtype.to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
            out.extend_from_slice(&300u32.to_be_bytes());
            out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(rdata);
        }
        out
    }

    pub fn a_response(id: u16, name: &str, addrs: &[Ipv4Addr]) -> Vec<u8> {
        let records: Vec<_> = addrs.iter().map(|a| (TYPE_A, a.octets().to_vec())).collect();
        response(id, name, &records)
    }
}
