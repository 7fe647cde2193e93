// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! WS-Discovery responder (UDP 3702, multicast group 239.255.255.250).
//!
//! Answers `Probe` with `ProbeMatches` and `Resolve` (for our own endpoint
//! address) with `ResolveMatches`, unicast to the sender. Sends one `Hello`
//! to the group at startup when announcing is enabled. No per-client state.
//!
//! SOAP envelopes are inspected by local element name only; namespace
//! prefixes vary between stacks and are ignored.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{bind_udp, expect_udp, join_multicast};
use crate::domain::device_config::ResponderKind;
use crate::domain::identity::IdentitySnapshot;
use crate::domain::responder::{Listener, Responder, ResponderError, ResponderSettings};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

const ACTION_PROBE_MATCHES: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches";
const ACTION_RESOLVE_MATCHES: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/ResolveMatches";
const ACTION_HELLO: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Hello";
const TO_ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const TO_DISCOVERY: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";
const DEVICE_TYPES: &str = "wsdp:Device pnpx:PrintDevice";
const SCOPES: &str = "ldap:///ou=printer,o=hp";

pub struct WsDiscoveryResponder {
    settings: ResponderSettings,
}

impl WsDiscoveryResponder {
    pub fn new(settings: ResponderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Responder for WsDiscoveryResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::Discovery
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
        let port = socket.local_addr()?.port();
        let joined = join_multicast(&socket, MULTICAST_GROUP, self.kind());
        info!(port, multicast = joined, uuid = %identity.device_uuid, "WS-Discovery responder serving");

        if self.settings.announce {
            if let Err(e) = socket.set_multicast_ttl_v4(1) {
                debug!(error = %e, "Could not set multicast TTL");
            }
            let target = SocketAddr::from((MULTICAST_GROUP, port));
            match socket.send_to(hello(&identity).as_bytes(), target).await {
                Ok(_) => info!(%target, "Sent Hello announcement"),
                Err(e) => warn!(%target, error = %e, "Hello announcement failed"),
            }
        }

        let mut buf = vec![0u8; 65_535];
        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "WS-Discovery receive failed");
                        continue;
                    }
                },
            };

            let request = String::from_utf8_lossy(&buf[..len]);
            let Some(reply) = handle_message(&identity, &request) else {
                continue;
            };
            debug!(%peer, "Answering discovery request");
            if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                warn!(%peer, error = %e, "WS-Discovery send failed");
            }
        }

        info!("WS-Discovery responder stopped");
        Ok(())
    }
}

/// Response envelope for a request, or `None` when it is not for us.
pub fn handle_message(identity: &IdentitySnapshot, request: &str) -> Option<String> {
    let relates_to = element_text(request, "MessageID")
        .map(|id| xml_unescape(id.trim()))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4()));

    if has_element(request, "Probe") {
        if !types_match(element_text(request, "Types")) {
            return None;
        }
        return Some(envelope(
            ACTION_PROBE_MATCHES,
            TO_ANONYMOUS,
            Some(&relates_to),
            &format!("<wsd:ProbeMatches><wsd:ProbeMatch>{}</wsd:ProbeMatch></wsd:ProbeMatches>", descriptor(identity)),
        ));
    }

    if has_element(request, "Resolve") {
        let address = element_text(request, "Address")?;
        if !address.trim().eq_ignore_ascii_case(&endpoint_address(identity)) {
            return None;
        }
        return Some(envelope(
            ACTION_RESOLVE_MATCHES,
            TO_ANONYMOUS,
            Some(&relates_to),
            &format!(
                "<wsd:ResolveMatches><wsd:ResolveMatch>{}</wsd:ResolveMatch></wsd:ResolveMatches>",
                descriptor(identity)
            ),
        ));
    }

    None
}

/// Unsolicited announcement sent to the multicast group.
pub fn hello(identity: &IdentitySnapshot) -> String {
    envelope(
        ACTION_HELLO,
        TO_DISCOVERY,
        None,
        &format!("<wsd:Hello>{}</wsd:Hello>", descriptor(identity)),
    )
}

fn endpoint_address(identity: &IdentitySnapshot) -> String {
    format!("urn:uuid:{}", identity.device_uuid)
}

fn descriptor(identity: &IdentitySnapshot) -> String {
    format!(
        "<wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference>\
         <wsd:Types>{}</wsd:Types>\
         <wsd:Scopes>{}</wsd:Scopes>\
         <wsd:XAddrs>http://{}:5357/WSDPrinter</wsd:XAddrs>\
         <wsd:MetadataVersion>1</wsd:MetadataVersion>",
        endpoint_address(identity),
        DEVICE_TYPES,
        SCOPES,
        identity.ip
    )
}

fn envelope(action: &str, to: &str, relates_to: Option<&str>, body: &str) -> String {
    let relates = relates_to
        .map(|id| format!("<wsa:RelatesTo>{}</wsa:RelatesTo>", xml_escape(id)))
        .unwrap_or_default();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\" \
         xmlns:wsa=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" \
         xmlns:wsd=\"http://schemas.xmlsoap.org/ws/2005/04/discovery\" \
         xmlns:wsdp=\"http://schemas.xmlsoap.org/ws/2006/02/devprof\" \
         xmlns:pnpx=\"http://schemas.microsoft.com/windows/pnpx/2005/10\">\
         <soap:Header>\
         <wsa:To>{}</wsa:To>\
         <wsa:Action>{}</wsa:Action>\
         <wsa:MessageID>urn:uuid:{}</wsa:MessageID>\
         {}\
         </soap:Header>\
         <soap:Body>{}</soap:Body>\
         </soap:Envelope>",
        to,
        action,
        Uuid::new_v4(),
        relates,
        body
    )
}

/// A Probe without Types matches everything; otherwise one of the listed
/// types must be Device or PrintDevice.
fn types_match(types: Option<&str>) -> bool {
    let Some(types) = types else {
        return true;
    };
    let mut listed = types.split_whitespace().peekable();
    if listed.peek().is_none() {
        return true;
    }
    listed.any(|qname| {
        let local = qname.rsplit(':').next().unwrap_or(qname);
        local == "Device" || local == "PrintDevice"
    })
}

fn has_element(xml: &str, local: &str) -> bool {
    find_open_tag(xml, local).is_some()
}

/// Text content of the first element with the given local name.
fn element_text<'a>(xml: &'a str, local: &str) -> Option<&'a str> {
    let (content_start, self_closing) = find_open_tag(xml, local)?;
    if self_closing {
        return Some("");
    }
    let rest = &xml[content_start..];
    let end = rest.find("</")?;
    Some(&rest[..end])
}

/// Byte offset just past the matching start tag, and whether it was `<x/>`.
fn find_open_tag(xml: &str, local: &str) -> Option<(usize, bool)> {
    let mut offset = 0;
    while let Some(pos) = xml[offset..].find('<') {
        let start = offset + pos + 1;
        let rest = &xml[start..];
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let tag_end = rest.find('>')?;
        offset = start;

        if name.starts_with('/') || name.starts_with('?') || name.starts_with('!') {
            continue;
        }
        let name_local = name.rsplit(':').next().unwrap_or(name);
        if name_local == local {
            let self_closing = rest[..tag_end].ends_with('/');
            return Some((start + tag_end + 1, self_closing));
        }
    }
    None
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityConfig;

    const PROBE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:wsd="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:wsdp="http://schemas.xmlsoap.org/ws/2006/02/devprof">
<soap:Header>
<wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
<wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>
<wsa:MessageID>urn:uuid:0a6dc791-2be6-4991-9af1-454778a1917a</wsa:MessageID>
</soap:Header>
<soap:Body><wsd:Probe><wsd:Types>wsdp:Device</wsd:Types></wsd:Probe></soap:Body>
</soap:Envelope>"#;

    fn identity() -> IdentitySnapshot {
        let config: IdentityConfig = serde_yaml::from_str(
            "hostname: HPLJ\nip: 10.0.0.40\nuuid: 5b2c6c52-6c0e-4b1a-9d1d-2f1e3f0c9a11\n",
        )
        .unwrap();
        IdentitySnapshot::from_config(&config)
    }

    #[test]
    fn test_probe_gets_probe_matches() {
        let reply = handle_message(&identity(), PROBE).unwrap();
        assert!(reply.contains(ACTION_PROBE_MATCHES));
        assert!(reply.contains(
            "<wsa:RelatesTo>urn:uuid:0a6dc791-2be6-4991-9af1-454778a1917a</wsa:RelatesTo>"
        ));
        assert!(reply.contains("urn:uuid:5b2c6c52-6c0e-4b1a-9d1d-2f1e3f0c9a11"));
        assert!(reply.contains("http://10.0.0.40:5357/WSDPrinter"));
    }

    #[test]
    fn test_probe_type_filtering() {
        let untyped = PROBE.replace("<wsd:Types>wsdp:Device</wsd:Types>", "");
        assert!(handle_message(&identity(), &untyped).is_some());

        let printer = PROBE.replace("wsdp:Device<", "pnpx:PrintDevice<");
        assert!(handle_message(&identity(), &printer).is_some());

        let scanner = PROBE.replace("wsdp:Device<", "wscn:ScanDeviceType<");
        assert!(handle_message(&identity(), &scanner).is_none());
    }

    #[test]
    fn test_resolve_only_for_own_address() {
        let resolve = |address: &str| {
            format!(
                "<s:Envelope><s:Header><a:MessageID>urn:uuid:1</a:MessageID></s:Header>\
                 <s:Body><d:Resolve><a:EndpointReference><a:Address>{}</a:Address>\
                 </a:EndpointReference></d:Resolve></s:Body></s:Envelope>",
                address
            )
        };

        let ours = handle_message(&identity(), &resolve("urn:uuid:5B2C6C52-6C0E-4B1A-9D1D-2F1E3F0C9A11"))
            .unwrap();
        assert!(ours.contains(ACTION_RESOLVE_MATCHES));
        assert!(ours.contains("<wsa:RelatesTo>urn:uuid:1</wsa:RelatesTo>"));

        assert!(handle_message(&identity(), &resolve("urn:uuid:00000000-0000-0000-0000-000000000000")).is_none());
    }

    #[test]
    fn test_hello_and_ignored_messages() {
        let announcement = hello(&identity());
        assert!(announcement.contains(ACTION_HELLO));
        assert!(!announcement.contains("RelatesTo"));

        // Our own Hello looping back must not trigger a reply.
        assert!(handle_message(&identity(), &announcement).is_none());
        assert!(handle_message(&identity(), "not xml at all").is_none());
    }

    #[test]
    fn test_relates_to_is_escaped() {
        let hostile = PROBE.replace(
            "urn:uuid:0a6dc791-2be6-4991-9af1-454778a1917a",
            "x&lt;y",
        );
        let reply = handle_message(&identity(), &hostile).unwrap();
        assert!(reply.contains("<wsa:RelatesTo>x&lt;y</wsa:RelatesTo>"));
    }
}
