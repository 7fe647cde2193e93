// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Protocol responders and the helpers they share.
//!
//! | Kind | Transport | Module |
//! |------|-----------|--------|
//! | `snmp` | UDP | [`snmp`] |
//! | `job-ingest` | TCP | [`jetdirect`] |
//! | `discovery` | UDP multicast 239.255.255.250 | [`ws_discovery`] |
//! | `name-resolution` | UDP multicast 224.0.0.252 | [`llmnr`] |

pub mod jetdirect;
pub mod llmnr;
pub mod pjl;
pub mod snmp;
pub mod ws_discovery;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::device_config::ResponderKind;
use crate::domain::responder::{Listener, Responder, ResponderError, ResponderSettings};

/// Responder implementation for a configured kind.
pub fn build_responder(kind: ResponderKind, settings: &ResponderSettings) -> Box<dyn Responder> {
    match kind {
        ResponderKind::Snmp => Box::new(snmp::SnmpResponder::new(settings.clone())),
        ResponderKind::JobIngest => Box::new(jetdirect::JetDirectResponder::new(settings.clone())),
        ResponderKind::Discovery => Box::new(ws_discovery::WsDiscoveryResponder::new(settings.clone())),
        ResponderKind::NameResolution => Box::new(llmnr::LlmnrResponder::new(settings.clone())),
    }
}

pub(crate) async fn bind_tcp(
    kind: ResponderKind,
    settings: &ResponderSettings,
    port: u16,
) -> Result<Listener, ResponderError> {
    let addr = SocketAddr::new(settings.bind_address, port);
    TcpListener::bind(addr)
        .await
        .map(Listener::Tcp)
        .map_err(|source| ResponderError::Bind { kind, port, source })
}

pub(crate) async fn bind_udp(
    kind: ResponderKind,
    settings: &ResponderSettings,
    port: u16,
) -> Result<Listener, ResponderError> {
    let addr = SocketAddr::new(settings.bind_address, port);
    UdpSocket::bind(addr)
        .await
        .map(Listener::Udp)
        .map_err(|source| ResponderError::Bind { kind, port, source })
}

/// Join a multicast group. Failure is logged; the responder keeps serving unicast.
pub(crate) fn join_multicast(socket: &UdpSocket, group: Ipv4Addr, kind: ResponderKind) -> bool {
    match socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
        Ok(()) => {
            debug!(%group, %kind, "Joined multicast group");
            true
        }
        Err(e) => {
            warn!(%group, %kind, error = %e, "Multicast join failed, serving unicast only");
            false
        }
    }
}

pub(crate) fn expect_tcp(kind: ResponderKind, listener: Listener) -> Result<TcpListener, ResponderError> {
    match listener {
        Listener::Tcp(listener) => Ok(listener),
        Listener::Udp(_) => Err(ResponderError::WrongListener { kind, got: "udp" }),
    }
}

pub(crate) fn expect_udp(kind: ResponderKind, listener: Listener) -> Result<UdpSocket, ResponderError> {
    match listener {
        Listener::Udp(socket) => Ok(socket),
        Listener::Tcp(_) => Err(ResponderError::WrongListener { kind, got: "tcp" }),
    }
}

/// Let in-flight tasks finish within `grace`, then abort the rest.
/// Returns how many tasks were aborted.
pub(crate) async fn drain(mut tasks: JoinSet<()>, grace: Duration) -> usize {
    let finished = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if finished.is_ok() {
        return 0;
    }
    let remaining = tasks.len();
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    remaining
}
