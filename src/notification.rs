//! User-facing messages for terminal outcomes
//!
//! Every finished or aborted operation maps to exactly one notification:
//! an error for failures, a calm "cancelled" for user cancellations and
//! info for successes.

use std::time::{Duration, Instant};

use crate::export::ExportOutcome;
use crate::session::SessionError;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    /// The user stopped something; not a fault
    Cancelled,
    /// Blocking failure message
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Notification {
    pub fn new(message: impl Into<String>, level: NotificationLevel, duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            message: message.into(),
            level,
            created_at: now,
            expires_at: now + duration,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Info, DEFAULT_DURATION)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Cancelled, DEFAULT_DURATION)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Error, DEFAULT_DURATION)
    }

    /// Notification for a failed session operation
    pub fn from_error(error: &SessionError) -> Self {
        match error {
            SessionError::Declined => Self::cancelled("Code creation cancelled"),
            other => Self::error(other.to_string()),
        }
    }

    /// Notification for the end of an export
    pub fn from_export(result: &Result<ExportOutcome, SessionError>) -> Self {
        match result {
            Ok(ExportOutcome::Completed { pages, path }) => Self::info(format!(
                "Stamped {pages} pages into {}",
                path.display()
            )),
            Ok(ExportOutcome::Cancelled { completed }) => Self::cancelled(format!(
                "Export cancelled after {completed} pages, nothing was written"
            )),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
