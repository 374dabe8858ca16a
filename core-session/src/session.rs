//! Authenticated session state.

use chrono::{DateTime, Utc};
use std::fmt;

/// Tokens and identifiers produced by a successful two-step login.
///
/// Immutable once built; reauthentication swaps in a fresh value.
#[derive(Clone)]
pub struct Session {
    pub partner_id: String,
    pub partner_auth_token: String,
    pub user_id: String,
    pub user_auth_token: String,
    /// Server time minus local time, in seconds.
    pub sync_offset: i64,
    /// Account without audio ads.
    pub subscriber: bool,
    pub established_at: DateTime<Utc>,
}

impl Session {
    /// Server-adjusted timestamp for a request sent at `now`.
    pub fn sync_time(&self, now: i64) -> i64 {
        now + self.sync_offset
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("partner_id", &self.partner_id)
            .field("user_id", &self.user_id)
            .field("partner_auth_token", &"[REDACTED]")
            .field("user_auth_token", &"[REDACTED]")
            .field("sync_offset", &self.sync_offset)
            .field("subscriber", &self.subscriber)
            .field("established_at", &self.established_at)
            .finish()
    }
}

/// Listener credentials kept for transparent reauthentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Parse the decrypted partner `syncTime`: a 4-byte prefix followed by
/// ASCII digits and zero padding.
pub(crate) fn parse_sync_time(decrypted: &[u8]) -> Option<i64> {
    let digits: String = decrypted
        .get(4..)?
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .map(|b| *b as char)
        .collect();
    digits.parse().ok()
}
