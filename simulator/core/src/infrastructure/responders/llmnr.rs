// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLMNR responder (UDP 5355, multicast group 224.0.0.252).
//!
//! Answers A/ANY queries for the device hostname with the snapshot address.
//! Anything else is silently ignored. No caching.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{bind_udp, expect_udp, join_multicast};
use crate::domain::device_config::ResponderKind;
use crate::domain::identity::IdentitySnapshot;
use crate::domain::responder::{Listener, Responder, ResponderError, ResponderSettings};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 252);

const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const OPCODE_MASK: u16 = 0x7800;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const ANSWER_TTL: u32 = 30;

pub struct LlmnrResponder {
    settings: ResponderSettings,
}

impl LlmnrResponder {
    pub fn new(settings: ResponderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Responder for LlmnrResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::NameResolution
    }

    async fn bind(&self, port: u16) -> Result<Listener, ResponderError> {
        bind_udp(self.kind(), &self.settings, port).await
    }

    async fn serve(
        &self,
        listener: Listener,
        identity: Arc<IdentitySnapshot>,
        shutdown: CancellationToken,
    ) -> Result<(), ResponderError> {
        let socket = expect_udp(self.kind(), listener)?;
        let joined = join_multicast(&socket, MULTICAST_GROUP, self.kind());
        info!(
            addr = ?socket.local_addr().ok(),
            multicast = joined,
            hostname = %identity.hostname,
            "LLMNR responder serving"
        );

        let mut buf = vec![0u8; 1500];
        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "LLMNR receive failed");
                        continue;
                    }
                },
            };

            let Some(reply) = answer_query(&identity, &buf[..len]) else {
                continue;
            };
            debug!(%peer, "Answering LLMNR query");
            if let Err(e) = socket.send_to(&reply, peer).await {
                warn!(%peer, error = %e, "LLMNR send failed");
            }
        }

        info!("LLMNR responder stopped");
        Ok(())
    }
}

/// Parsed single-question LLMNR query.
#[derive(Debug, PartialEq, Eq)]
struct Query<'a> {
    id: u16,
    name: String,
    qtype: u16,
    qclass: u16,
    /// Raw question section, echoed back in the response
    question: &'a [u8],
}

fn parse_query(packet: &[u8]) -> Option<Query<'_>> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    let word = |at: usize| u16::from_be_bytes([packet[at], packet[at + 1]]);
    let id = word(0);
    let flags = word(2);
    if flags & FLAG_QR != 0 || flags & OPCODE_MASK != 0 || word(4) != 1 {
        return None;
    }

    let mut labels = Vec::new();
    let mut pos = HEADER_LEN;
    loop {
        let len = usize::from(*packet.get(pos)?);
        pos += 1;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a lone question.
        if len > 63 {
            return None;
        }
        let label = packet.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += len;
    }
    let fixed = packet.get(pos..pos + 4)?;
    let qtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);

    Some(Query {
        id,
        name: labels.join("."),
        qtype,
        qclass,
        question: &packet[HEADER_LEN..pos + 4],
    })
}

fn names_match(query: &str, hostname: &str) -> bool {
    let query = query.trim_end_matches('.');
    let hostname = hostname.trim_end_matches('.');
    !query.is_empty() && query.eq_ignore_ascii_case(hostname)
}

/// Response datagram for a query naming this device, otherwise `None`.
pub fn answer_query(identity: &IdentitySnapshot, packet: &[u8]) -> Option<Vec<u8>> {
    let query = parse_query(packet)?;
    if !names_match(&query.name, &identity.hostname) {
        return None;
    }
    if !matches!(query.qtype, TYPE_A | TYPE_ANY) || query.qclass != CLASS_IN {
        return None;
    }

    let name_bytes = &query.question[..query.question.len() - 4];
    let mut out = Vec::with_capacity(HEADER_LEN + query.question.len() * 2 + 14);
    out.extend_from_slice(&query.id.to_be_bytes());
    out.extend_from_slice(&FLAG_QR.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    out.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    out.extend_from_slice(query.question);

    out.extend_from_slice(name_bytes);
    out.extend_from_slice(&TYPE_A.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&identity.ip.octets());
    Some(out)
}
