//! Authentication validator
//!
//! Implements FTP user authentication logic, including username and password validation.

use super::credentials::CredentialStore;
use crate::error::AuthError;

const MAX_PASSWORD_LENGTH: usize = 128;

/// Performs basic input sanitation to check for malicious or malformed usernames/passwords.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    !input.trim().is_empty() && input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

/// Validates that the given username exists in the credential store.
pub fn validate_user(username: &str, store: &CredentialStore) -> Result<(), AuthError> {
    // Check for invalid username characters/format
    if username.contains(['@', '#', ',', '%']) || username.starts_with(char::is_numeric) {
        return Err(AuthError::InvalidUsername(username.to_string()));
    }

    if !is_valid_input(username, store.max_username_length()) {
        return Err(AuthError::MalformedInput("Invalid username format".into()));
    }

    if store.contains(username) {
        Ok(())
    } else {
        Err(AuthError::UserNotFound(username.to_string()))
    }
}

/// Validates that the provided password matches the stored password for the username.
///
/// Anonymous accounts accept any password.
pub fn validate_password(
    username: &str,
    password: &str,
    store: &CredentialStore,
) -> Result<(), AuthError> {
    if store.is_anonymous(username) {
        return Ok(());
    }

    if !is_valid_input(password, MAX_PASSWORD_LENGTH) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }

    match store.password_for(username) {
        Some(stored) if stored == password => Ok(()),
        Some(_) => Err(AuthError::InvalidPassword(username.to_string())),
        None => Err(AuthError::UserNotFound(username.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store(allow_anonymous: bool) -> CredentialStore {
        let users = HashMap::from([("alice".to_string(), "alice123".to_string())]);
        CredentialStore::new(users, allow_anonymous, 32)
    }

    #[test]
    fn configured_user_needs_matching_password() {
        let store = store(false);
        assert!(validate_user("alice", &store).is_ok());
        assert!(validate_password("alice", "alice123", &store).is_ok());
        assert!(matches!(
            validate_password("alice", "nope", &store),
            Err(AuthError::InvalidPassword(_))
        ));
        assert!(matches!(
            validate_user("mallory", &store),
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[test]
    fn anonymous_only_when_enabled() {
        assert!(validate_user("anonymous", &store(true)).is_ok());
        assert!(validate_password("FTP", "guest@example", &store(true)).is_ok());
        assert!(matches!(
            validate_user("anonymous", &store(false)),
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[test]
    fn rejects_malformed_names() {
        let store = store(true);
        assert!(matches!(
            validate_user("9lives", &store),
            Err(AuthError::InvalidUsername(_))
        ));
        let long = "a".repeat(40);
        assert!(matches!(
            validate_user(&long, &store),
            Err(AuthError::MalformedInput(_))
        ));
    }
}
