// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SNMP responder (UDP).
//!
//! Stateless: every datagram is decoded, answered from the [`MibTable`] and
//! forgotten. Any community string is accepted.

pub mod ber;
pub mod mib;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::ber::{Message, Pdu, Value, PDU_GET, PDU_GET_NEXT, PDU_RESPONSE};
use self::mib::MibTable;
use super::{bind_udp, expect_udp};
use crate::domain::device_config::ResponderKind;
use crate::domain::identity::IdentitySnapshot;
use crate::domain::responder::{Listener, Responder, ResponderError, ResponderSettings};

const VERSION_1: i64 = 0;
const VERSION_2C: i64 = 1;
const ERR_NO_SUCH_NAME: i64 = 2;
const MAX_DATAGRAM: usize = 65_535;

pub struct SnmpResponder {
    settings: ResponderSettings,
}

impl SnmpResponder {
    pub fn new(settings: ResponderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Responder for SnmpResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::Snmp
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
        let table = MibTable::from_identity(&identity);
        info!(addr = ?socket.local_addr().ok(), oids = table.len(), "SNMP responder serving");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "SNMP receive failed");
                        continue;
                    }
                },
            };

            let Some(response) = handle_datagram(&table, &buf[..len]) else {
                debug!(%peer, "Dropped SNMP datagram");
                continue;
            };
            if let Err(e) = socket.send_to(&response, peer).await {
                warn!(%peer, error = %e, "SNMP send failed");
            }
        }

        info!("SNMP responder stopped");
        Ok(())
    }
}

/// Build the response for one request datagram, or `None` when it must be dropped.
pub fn handle_datagram(table: &MibTable, data: &[u8]) -> Option<Vec<u8>> {
    let request = match Message::decode(data) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Malformed SNMP message");
            return None;
        }
    };

    if request.version != VERSION_1 && request.version != VERSION_2C {
        debug!(version = request.version, "Unsupported SNMP version");
        return None;
    }

    let op = match request.pdu.pdu_type {
        PDU_GET => "get",
        PDU_GET_NEXT => "get_next",
        other => {
            debug!(pdu_type = other, "Unsupported SNMP PDU");
            return None;
        }
    };
    metrics::counter!("devsim_snmp_requests_total", "op" => op).increment(1);

    let pdu = if request.version == VERSION_2C {
        answer_v2c(table, &request.pdu)
    } else {
        answer_v1(table, &request.pdu)
    };

    Some(
        Message {
            version: request.version,
            community: request.community,
            pdu,
        }
        .encode(),
    )
}

fn answer_v2c(table: &MibTable, request: &Pdu) -> Pdu {
    let varbinds = request
        .varbinds
        .iter()
        .map(|(oid, _)| {
            if request.pdu_type == PDU_GET_NEXT {
                table
                    .next(oid)
                    .unwrap_or_else(|| (oid.clone(), Value::EndOfMibView))
            } else {
                (oid.clone(), table.get(oid).unwrap_or(Value::NoSuchObject))
            }
        })
        .collect();

    response(request, 0, 0, varbinds)
}

fn answer_v1(table: &MibTable, request: &Pdu) -> Pdu {
    let mut varbinds = Vec::with_capacity(request.varbinds.len());
    for (index, (oid, _)) in request.varbinds.iter().enumerate() {
        let found = if request.pdu_type == PDU_GET_NEXT {
            table.next(oid)
        } else {
            table.get(oid).map(|value| (oid.clone(), value))
        };
        match found {
            Some(varbind) => varbinds.push(varbind),
            None => {
                // v1 reports the first failing varbind and echoes the request list.
                return response(
                    request,
                    ERR_NO_SUCH_NAME,
                    index as i64 + 1,
                    request.varbinds.clone(),
                );
            }
        }
    }
    response(request, 0, 0, varbinds)
}

fn response(request: &Pdu, error_status: i64, error_index: i64, varbinds: Vec<(ber::Oid, Value)>) -> Pdu {
    Pdu {
        pdu_type: PDU_RESPONSE,
        request_id: request.request_id,
        error_status,
        error_index,
        varbinds,
    }
}

#[cfg(test)]
mod tests {
    use super::ber::Oid;
    use super::*;
    use crate::domain::identity::IdentityConfig;

    fn table() -> MibTable {
        let config: IdentityConfig = serde_yaml::from_str(
            "hostname: HPLJ-4F2\nip: 10.0.0.40\nserial: CNB8K12345\n",
        )
        .unwrap();
        MibTable::from_identity(&IdentitySnapshot::from_config(&config))
    }

    fn request(version: i64, pdu_type: u8, oids: &[&str]) -> Vec<u8> {
        Message {
            version,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type,
                request_id: 99,
                error_status: 0,
                error_index: 0,
                varbinds: oids
                    .iter()
                    .map(|o| (o.parse::<Oid>().unwrap(), Value::Null))
                    .collect(),
            },
        }
        .encode()
    }

    fn answer(version: i64, pdu_type: u8, oids: &[&str]) -> Message {
        let bytes = handle_datagram(&table(), &request(version, pdu_type, oids)).unwrap();
        Message::decode(&bytes).unwrap()
    }

    #[test]
    fn test_v2c_get_answers_from_identity() {
        let reply = answer(VERSION_2C, PDU_GET, &["1.3.6.1.2.1.43.5.1.1.16.1"]);
        assert_eq!(reply.pdu.pdu_type, PDU_RESPONSE);
        assert_eq!(reply.pdu.request_id, 99);
        assert_eq!(reply.community, b"public");
        assert_eq!(reply.pdu.varbinds[0].1, Value::OctetString(b"CNB8K12345".to_vec()));
    }

    #[test]
    fn test_v2c_unknown_oid_is_no_such_object() {
        let reply = answer(VERSION_2C, PDU_GET, &["1.3.6.1.2.1.1.5.0", "1.3.6.1.9.9.9"]);
        assert_eq!(reply.pdu.error_status, 0);
        assert_eq!(reply.pdu.varbinds[1].1, Value::NoSuchObject);
        assert_eq!(reply.pdu.varbinds[0].1, Value::OctetString(b"HPLJ-4F2".to_vec()));
    }

    #[test]
    fn test_v1_unknown_oid_is_no_such_name() {
        let reply = answer(VERSION_1, PDU_GET, &["1.3.6.1.2.1.1.5.0", "1.3.6.1.9.9.9"]);
        assert_eq!(reply.pdu.error_status, ERR_NO_SUCH_NAME);
        assert_eq!(reply.pdu.error_index, 2);
        assert_eq!(reply.pdu.varbinds[0].1, Value::Null);
    }

    #[test]
    fn test_get_next_and_end_of_view() {
        let reply = answer(VERSION_2C, PDU_GET_NEXT, &["1.3.6.1.2.1.1.4.0"]);
        assert_eq!(reply.pdu.varbinds[0].0.to_string(), "1.3.6.1.2.1.1.5.0");

        let reply = answer(VERSION_2C, PDU_GET_NEXT, &["1.3.6.1.9"]);
        assert_eq!(reply.pdu.varbinds[0].1, Value::EndOfMibView);

        let reply = answer(VERSION_1, PDU_GET_NEXT, &["1.3.6.1.9"]);
        assert_eq!(reply.pdu.error_status, ERR_NO_SUCH_NAME);
    }

    #[test]
    fn test_garbage_and_unsupported_are_dropped() {
        let table = table();
        assert!(handle_datagram(&table, b"\x00\x01garbage").is_none());
        assert!(handle_datagram(&table, &request(3, PDU_GET, &["1.3.6.1.2.1.1.5.0"])).is_none());
        assert!(handle_datagram(&table, &request(VERSION_2C, 0xa3, &["1.3.6.1.2.1.1.5.0"])).is_none());
    }

    #[tokio::test]
    async fn test_serves_over_udp_until_cancelled() {
        let settings = ResponderSettings {
            bind_address: "127.0.0.1".parse().unwrap(),
            idle_timeout: std::time::Duration::from_secs(5),
            shutdown_grace: std::time::Duration::from_secs(1),
            announce: false,
            jobs_dir: std::path::PathBuf::from("unused"),
        };
        let responder = SnmpResponder::new(settings);
        let listener = responder.bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config: IdentityConfig =
            serde_yaml::from_str("hostname: HPLJ-4F2\nip: 10.0.0.40\n").unwrap();
        let identity = Arc::new(IdentitySnapshot::from_config(&config));
        let shutdown = CancellationToken::new();
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { responder.serve(listener, identity, shutdown).await })
        };

        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&request(VERSION_2C, PDU_GET, &["1.3.6.1.2.1.1.5.0"]), addr)
            .await
            .unwrap();
        let mut buf = [0u8; 1500];
        let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::decode(&buf[..len]).unwrap();
        assert_eq!(reply.pdu.varbinds[0].1, Value::OctetString(b"HPLJ-4F2".to_vec()));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
