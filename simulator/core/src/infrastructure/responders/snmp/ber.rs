// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Minimal BER codec for SNMPv1/v2c messages.
//!
//! Covers what Get/GetNext traffic needs: definite lengths (short and long
//! form), INTEGER, OCTET STRING, NULL, OBJECT IDENTIFIER, SEQUENCE, the
//! application types TimeTicks/Counter32/Gauge32 and the v2c exception values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub const PDU_GET: u8 = 0xa0;
pub const PDU_GET_NEXT: u8 = 0xa1;
pub const PDU_RESPONSE: u8 = 0xa2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BerError {
    #[error("message truncated")]
    Truncated,

    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("unsupported length encoding")]
    BadLength,

    #[error("malformed object identifier")]
    BadOid,

    #[error("integer does not fit in 64 bits")]
    IntegerOverflow,
}

/// Object identifier as a list of arcs. Ordered lexicographically, which is
/// the order GetNext walks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    fn encode_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let (first, rest) = match self.0.as_slice() {
            [a, b, rest @ ..] => (a * 40 + b, rest),
            [a] => (a * 40, &[][..]),
            [] => return out,
        };
        push_base128(&mut out, first);
        for arc in rest {
            push_base128(&mut out, *arc);
        }
        out
    }

    fn decode_content(content: &[u8]) -> Result<Self, BerError> {
        if content.is_empty() {
            return Err(BerError::BadOid);
        }
        let mut subids = Vec::new();
        let mut value: u32 = 0;
        let mut in_progress = false;
        for &byte in content {
            value = value
                .checked_mul(128)
                .ok_or(BerError::BadOid)?
                | u32::from(byte & 0x7f);
            in_progress = byte & 0x80 != 0;
            if !in_progress {
                subids.push(value);
                value = 0;
            }
        }
        if in_progress {
            return Err(BerError::BadOid);
        }

        let first = subids[0];
        let mut arcs = match first {
            0..=39 => vec![0, first],
            40..=79 => vec![1, first - 40],
            _ => vec![2, first - 80],
        };
        arcs.extend_from_slice(&subids[1..]);
        Ok(Self(arcs))
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

impl FromStr for Oid {
    type Err = BerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>().map_err(|_| BerError::BadOid))
            .collect::<Result<Vec<_>, _>>()?;
        if arcs.len() < 2 {
            return Err(BerError::BadOid);
        }
        Ok(Self(arcs))
    }
}

fn push_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut chunk = [0u8; 5];
    let mut len = 0;
    loop {
        chunk[len] = (value & 0x7f) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..len).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(chunk[i] | continuation);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Integer(v) => write_tlv(out, TAG_INTEGER, &encode_integer(*v)),
            Value::OctetString(bytes) => write_tlv(out, TAG_OCTET_STRING, bytes),
            Value::Null => write_tlv(out, TAG_NULL, &[]),
            Value::ObjectId(oid) => write_tlv(out, TAG_OID, &oid.encode_content()),
            Value::Counter32(v) => write_tlv(out, TAG_COUNTER32, &encode_integer(i64::from(*v))),
            Value::Gauge32(v) => write_tlv(out, TAG_GAUGE32, &encode_integer(i64::from(*v))),
            Value::TimeTicks(v) => write_tlv(out, TAG_TIMETICKS, &encode_integer(i64::from(*v))),
            Value::NoSuchObject => write_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
            Value::NoSuchInstance => write_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
            Value::EndOfMibView => write_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
        }
    }

    fn decode(tag: u8, content: &[u8]) -> Result<Self, BerError> {
        Ok(match tag {
            TAG_INTEGER => Value::Integer(decode_integer(content)?),
            TAG_OCTET_STRING => Value::OctetString(content.to_vec()),
            TAG_OID => Value::ObjectId(Oid::decode_content(content)?),
            TAG_COUNTER32 => Value::Counter32(decode_unsigned(content)?),
            TAG_GAUGE32 => Value::Gauge32(decode_unsigned(content)?),
            TAG_TIMETICKS => Value::TimeTicks(decode_unsigned(content)?),
            TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
            TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
            TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
            // Requests carry NULL; anything unfamiliar is treated the same way.
            _ => Value::Null,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: u8,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Oid, Value)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 0 = SNMPv1, 1 = SNMPv2c
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn decode(data: &[u8]) -> Result<Self, BerError> {
        let mut outer = Reader::new(data);
        let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);

        let version = decode_integer(message.expect(TAG_INTEGER)?)?;
        let community = message.expect(TAG_OCTET_STRING)?.to_vec();

        let (pdu_type, pdu_content) = message.read_tlv()?;
        let mut pdu = Reader::new(pdu_content);
        let request_id = decode_integer(pdu.expect(TAG_INTEGER)?)?;
        let error_status = decode_integer(pdu.expect(TAG_INTEGER)?)?;
        let error_index = decode_integer(pdu.expect(TAG_INTEGER)?)?;

        let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
            let oid = Oid::decode_content(varbind.expect(TAG_OID)?)?;
            let (tag, content) = varbind.read_tlv()?;
            varbinds.push((oid, Value::decode(tag, content)?));
        }

        Ok(Self {
            version,
            community,
            pdu: Pdu {
                pdu_type,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut list = Vec::new();
        for (oid, value) in &self.pdu.varbinds {
            let mut varbind = Vec::new();
            write_tlv(&mut varbind, TAG_OID, &oid.encode_content());
            value.encode(&mut varbind);
            write_tlv(&mut list, TAG_SEQUENCE, &varbind);
        }

        let mut pdu = Vec::new();
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.request_id));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.error_status));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.error_index));
        write_tlv(&mut pdu, TAG_SEQUENCE, &list);

        let mut body = Vec::new();
        write_tlv(&mut body, TAG_INTEGER, &encode_integer(self.version));
        write_tlv(&mut body, TAG_OCTET_STRING, &self.community);
        write_tlv(&mut body, self.pdu.pdu_type, &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        write_tlv(&mut out, TAG_SEQUENCE, &body);
        out
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, BerError> {
        let b = *self.buf.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_len(&mut self) -> Result<usize, BerError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        // Indefinite form (0x80) is not valid in SNMP.
        if count == 0 || count > 4 {
            return Err(BerError::BadLength);
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.byte()?;
        let len = self.read_len()?;
        let end = self.pos.checked_add(len).ok_or(BerError::Truncated)?;
        let content = self.buf.get(self.pos..end).ok_or(BerError::Truncated)?;
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.read_tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (4 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() {
        return Err(BerError::Truncated);
    }
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    let negative = content[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u32, BerError> {
    // Unsigned 32-bit values may carry a leading zero octet.
    let trimmed = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if trimmed.is_empty() || trimmed.len() > 4 {
        return Err(BerError::IntegerOverflow);
    }
    Ok(trimmed.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}
