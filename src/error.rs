//! Caller-side errors
//!
//! The actors themselves never return errors: every request ends in a reply or in
//! silence. These errors only exist on the caller's side of a handle or inbox.

use std::time::Duration;

use thiserror::Error;

use crate::actors::worker::WorkerId;

/// Result type alias for handle and inbox operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors a caller can observe when talking to a worker
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The target worker has stopped and its mailbox no longer accepts messages
    #[error("mailbox of worker {worker} is closed")]
    MailboxClosed { worker: WorkerId },

    /// No reply arrived within the caller's bound
    #[error("no reply within {after:?}")]
    Timeout { after: Duration },

    /// A reply arrived, but not the one the caller was waiting for
    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
}

impl RegistryError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::MailboxClosed { .. } => "mailbox_closed",
            RegistryError::Timeout { .. } => "reply_timeout",
            RegistryError::UnexpectedReply { .. } => "unexpected_reply",
        }
    }
}
