use crate::config::UserEntry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;

/// Environment variable with extra logins, `user:pass` pairs separated by commas.
pub const USERS_ENV: &str = "DUOCHAT_USERS";

/// Login check consulted before the chat surface is served.
pub trait CredentialGate: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Fixed username → password table.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut c = Self::new();
        for e in entries {
            c.insert(&e.username, &e.password);
        }
        c
    }

    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    /// Merge `user:pass,user2:pass2`. Malformed pairs are skipped with a warning.
    pub fn merge_list(&mut self, raw: &str) {
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once(':') {
                Some((user, pass)) if !user.is_empty() => self.insert(user, pass),
                _ => tracing::warn!(env = USERS_ENV, "ignoring malformed login entry"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialGate for StaticCredentials {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        self.users.get(username).is_some_and(|p| p == password)
    }
}

/// Decode an `Authorization: Basic …` header value into (username, password).
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
