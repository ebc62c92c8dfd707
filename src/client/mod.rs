//! Client role
//!
//! One control connection driven by explicit, sequential operations.

pub mod results;
pub mod session;

pub use results::{ListingResult, OperationOutcome, OutcomeStatus};
pub use session::FtpClient;
