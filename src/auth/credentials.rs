//! Credential storage and management
//!
//! Accounts come from the `users` table of the server configuration; the
//! anonymous accounts are accepted when `allow_anonymous` is set.

use std::collections::HashMap;

use crate::config::ServerConfig;

/// Login names treated as anonymous.
pub const ANONYMOUS_USERS: [&str; 2] = ["anonymous", "ftp"];

/// Read-only account table shared by every session.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
    allow_anonymous: bool,
    max_username_length: usize,
}

impl CredentialStore {
    pub fn new(users: HashMap<String, String>, allow_anonymous: bool, max_username_length: usize) -> Self {
        Self {
            users,
            allow_anonymous,
            max_username_length,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.users.clone(),
            config.allow_anonymous,
            config.max_username_length,
        )
    }

    pub fn is_anonymous(&self, username: &str) -> bool {
        self.allow_anonymous
            && ANONYMOUS_USERS
                .iter()
                .any(|name| name.eq_ignore_ascii_case(username))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.is_anonymous(username) || self.users.contains_key(username)
    }

    pub fn password_for(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(String::as_str)
    }

    pub fn max_username_length(&self) -> usize {
        self.max_username_length
    }
}
