// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory operator sessions for the admin gateway.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::domain::session::{PasswordHash, Session, SessionError, SessionToken};

/// Single configured operator credential plus the live session map.
///
/// Sessions never expire; they end with `logout` or when the master exits.
pub struct SessionService {
    username: String,
    password: PasswordHash,
    sessions: Mutex<HashMap<SessionToken, Session>>,
}

impl SessionService {
    pub fn new(username: impl Into<String>, password: PasswordHash) -> Self {
        Self {
            username: username.into(),
            password,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn login(
        &self,
        username: &str,
        password: &str,
        remote: Option<SocketAddr>,
    ) -> Result<Session, SessionError> {
        // Evaluate both checks unconditionally
        let user_ok: bool = username.as_bytes().ct_eq(self.username.as_bytes()).into();
        let pass_ok = self.password.verify(password);

        if !(user_ok & pass_ok) {
            metrics::counter!("devsim_admin_logins_total", "outcome" => "rejected").increment(1);
            warn!(username, remote = ?remote, "Admin login rejected");
            return Err(SessionError::AuthError);
        }

        let session = Session {
            token: SessionToken::generate(),
            username: self.username.clone(),
            created_at: Utc::now(),
            remote_address: remote,
        };
        self.sessions.lock().insert(session.token.clone(), session.clone());

        metrics::counter!("devsim_admin_logins_total", "outcome" => "accepted").increment(1);
        info!(username, remote = ?remote, "Admin session opened");
        Ok(session)
    }

    pub fn validate(&self, token: &SessionToken) -> Result<Session, SessionError> {
        self.sessions
            .lock()
            .get(token)
            .cloned()
            .ok_or(SessionError::Unauthenticated)
    }

    /// Drop a session. Unknown tokens are ignored.
    pub fn logout(&self, token: &SessionToken) {
        if let Some(session) = self.sessions.lock().remove(token) {
            info!(username = %session.username, "Admin session closed");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}
