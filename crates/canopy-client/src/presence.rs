//! Who is online.
//!
//! Clients announce their sessions with `presence/here` META records. The
//! [`SessionList`] remembers every session per user and reports, for each
//! user, the one seen most recently.

use std::collections::HashMap;

use thiserror::Error;

/// Errors from session bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("username is empty")]
    EmptyUsername,

    #[error("session id is empty")]
    EmptySessionId,

    #[error("no session {session_id} for user {username}")]
    UnknownSession { username: String, session_id: String },
}

/// One login session of a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Unix seconds at which the session was last active.
    pub last_seen: i64,
}

/// Known sessions, keyed by username then session id.
#[derive(Debug, Default)]
pub struct SessionList {
    users: HashMap<String, HashMap<String, Session>>,
}

impl SessionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `session` for `username`. A known session id has its
    /// `last_seen` replaced.
    pub fn track(&mut self, username: &str, session: Session) -> Result<(), PresenceError> {
        if username.is_empty() {
            return Err(PresenceError::EmptyUsername);
        }
        if session.id.is_empty() {
            return Err(PresenceError::EmptySessionId);
        }
        self.users
            .entry(username.to_string())
            .or_default()
            .insert(session.id.clone(), session);
        Ok(())
    }

    /// Forget one session. Fails if it was never tracked.
    pub fn remove(&mut self, username: &str, session_id: &str) -> Result<(), PresenceError> {
        if username.is_empty() {
            return Err(PresenceError::EmptyUsername);
        }
        if session_id.is_empty() {
            return Err(PresenceError::EmptySessionId);
        }
        let unknown = || PresenceError::UnknownSession {
            username: username.to_string(),
            session_id: session_id.to_string(),
        };
        let sessions = self.users.get_mut(username).ok_or_else(unknown)?;
        sessions.remove(session_id).ok_or_else(unknown)?;
        if sessions.is_empty() {
            self.users.remove(username);
        }
        Ok(())
    }

    /// Each user's most recently seen session.
    pub fn active_sessions(&self) -> HashMap<String, Session> {
        self.users
            .iter()
            .filter_map(|(user, sessions)| {
                sessions
                    .values()
                    .max_by_key(|s| s.last_seen)
                    .map(|s| (user.clone(), s.clone()))
            })
            .collect()
    }
}
