//! Client result types
//!
//! Defines result structures returned by client operations.

use std::fmt;

use crate::error::FtpError;
use crate::protocol::Reply;
use crate::transfer::TransferReport;

/// Result of a directory listing
#[derive(Debug, Clone)]
pub struct ListingResult {
    /// Listing bytes exactly as they crossed the data channel.
    pub data: Vec<u8>,
    pub report: TransferReport,
}

impl ListingResult {
    /// Non-empty listing lines with line endings removed.
    pub fn entries(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.data)
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl fmt::Display for ListingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} entries)", self.report, self.entries().len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// What the console layer shows for one user-level operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub status: OutcomeStatus,
    pub detail: String,
    /// Code of the peer reply that refused the operation, if one did.
    pub reply_code: Option<u16>,
}

impl OperationOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: detail.into(),
            reply_code: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            detail: detail.into(),
            reply_code: None,
        }
    }

    pub fn from_result<T: fmt::Display>(operation: &str, result: &Result<T, FtpError>) -> Self {
        match result {
            Ok(value) => Self::success(format!("{}: {}", operation, value)),
            Err(e) => Self {
                reply_code: e.reply().map(Reply::code),
                ..Self::failure(format!("{} failed: {}", operation, e))
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Reply;
    use crate::transfer::TransferKind;

    #[test]
    fn outcome_carries_reply_or_error_text() {
        let ok: Result<Reply, FtpError> = Ok(Reply::new(250, "Directory changed"));
        let outcome = OperationOutcome::from_result("cd", &ok);
        assert!(outcome.is_success());
        assert_eq!(outcome.detail, "cd: 250 Directory changed");

        let failed: Result<Reply, FtpError> = Err(FtpError::NoDataChannel);
        let outcome = OperationOutcome::from_result("ls", &failed);
        assert_eq!(outcome.status, OutcomeStatus::Failure);
        assert!(outcome.detail.starts_with("ls failed: No data channel"));
        assert_eq!(outcome.reply_code, None);

        let refused: Result<Reply, FtpError> = Err(FtpError::CommandRejected {
            command: "CWD".into(),
            reply: Reply::new(550, "No such directory"),
        });
        let outcome = OperationOutcome::from_result("cd", &refused);
        assert!(!outcome.is_success());
        assert_eq!(outcome.reply_code, Some(550));
    }

    #[test]
    fn listing_entries_drop_line_endings() {
        let listing = ListingResult {
            data: b"a.txt\r\nsub\r\n\r\n".to_vec(),
            report: TransferReport {
                kind: TransferKind::Listing,
                bytes: 14,
                expected_size: None,
                reply: None,
            },
        };
        assert_eq!(listing.entries(), vec!["a.txt", "sub"]);
    }
}
