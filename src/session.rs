//! Count session lifecycle.
//!
//! A session is one physical-count exercise at one location. Status moves
//! one way only: `DRAFT -> IN_PROGRESS -> COMPLETED`, with `CANCELLED`
//! reachable from `DRAFT` or `IN_PROGRESS`. `COMPLETED` and `CANCELLED` are
//! terminal; every mutating operation on a terminal session is rejected and
//! the caller must re-fetch before retrying.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CountError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a count session, as stored by the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Draft,
    InProgress,
    Completed,
    Cancelled,
}

impl CountStatus {
    /// Whether the session can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, CountStatus::Completed | CountStatus::Cancelled)
    }

    /// Human-readable label for operator-facing screens.
    pub fn label(self) -> &'static str {
        match self {
            CountStatus::Draft => "Draft",
            CountStatus::InProgress => "In progress",
            CountStatus::Completed => "Completed",
            CountStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for CountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One physical-count exercise at one location.
///
/// The lifecycle timestamps are each written exactly once, by the transition
/// that owns them. `location_id` references a Location owned by the admin
/// dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSession {
    pub id: String,
    #[serde(alias = "location_id")]
    pub location_id: String,
    pub status: CountStatus,
    #[serde(default, alias = "started_at")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "completed_at")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "cancelled_at")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "cancellation_reason")]
    pub cancellation_reason: Option<String>,
}

impl CountSession {
    /// Reject `operation` unless the current status is one of `allowed`.
    ///
    /// Used both as the pre-network guard (local state is known, so the
    /// request is never sent) and inside each transition.
    pub(crate) fn expect_status(
        &self,
        operation: &'static str,
        allowed: &[CountStatus],
    ) -> Result<(), CountError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(CountError::InvalidState {
                operation,
                status: self.status,
            })
        }
    }

    /// `DRAFT -> IN_PROGRESS`. Sets `started_at`.
    pub(crate) fn begin(&mut self, at: DateTime<Utc>) -> Result<(), CountError> {
        self.expect_status("start", &[CountStatus::Draft])?;
        self.status = CountStatus::InProgress;
        self.started_at = Some(at);
        Ok(())
    }

    /// `DRAFT | IN_PROGRESS -> CANCELLED`. Requires a non-empty reason.
    pub(crate) fn mark_cancelled(
        &mut self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CountError> {
        if reason.trim().is_empty() {
            return Err(CountError::MissingReason);
        }
        self.expect_status("cancel", &[CountStatus::Draft, CountStatus::InProgress])?;
        self.status = CountStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.cancellation_reason = Some(reason.trim().to_string());
        Ok(())
    }

    /// `IN_PROGRESS -> COMPLETED`. Sets `completed_at` and stores notes.
    pub(crate) fn mark_completed(
        &mut self,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), CountError> {
        self.expect_status("complete", &[CountStatus::InProgress])?;
        self.status = CountStatus::Completed;
        self.completed_at = Some(at);
        if let Some(n) = notes {
            if !n.trim().is_empty() {
                self.notes = Some(n.trim().to_string());
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_session() -> CountSession {
        CountSession {
            id: "cs-1".into(),
            location_id: "loc-1".into(),
            status: CountStatus::Draft,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            notes: None,
            cancellation_reason: None,
        }
    }

    fn in_status(status: CountStatus) -> CountSession {
        let mut s = draft_session();
        s.status = status;
        s
    }

    #[test]
    fn start_moves_draft_to_in_progress() {
        let mut s = draft_session();
        s.begin(Utc::now()).expect("draft session should start");
        assert_eq!(s.status, CountStatus::InProgress);
        assert!(s.started_at.is_some());
    }

    #[test]
    fn terminal_sessions_reject_every_transition() {
        for terminal in [CountStatus::Completed, CountStatus::Cancelled] {
            let now = Utc::now();

            let err = in_status(terminal).begin(now).unwrap_err();
            assert!(matches!(err, CountError::InvalidState { operation: "start", .. }));

            let err = in_status(terminal).mark_cancelled("shrink", now).unwrap_err();
            assert!(matches!(err, CountError::InvalidState { operation: "cancel", .. }));

            let err = in_status(terminal).mark_completed(None, now).unwrap_err();
            assert!(matches!(
                err,
                CountError::InvalidState { operation: "complete", .. }
            ));
        }
    }

    #[test]
    fn complete_requires_in_progress() {
        let err = draft_session().mark_completed(None, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CountError::InvalidState {
                operation: "complete",
                status: CountStatus::Draft,
            }
        ));
    }

    #[test]
    fn cancel_allowed_from_draft_and_in_progress() {
        for status in [CountStatus::Draft, CountStatus::InProgress] {
            let mut s = in_status(status);
            s.mark_cancelled("wrong location", Utc::now())
                .expect("cancel should succeed");
            assert_eq!(s.status, CountStatus::Cancelled);
            assert_eq!(s.cancellation_reason.as_deref(), Some("wrong location"));
            assert!(s.cancelled_at.is_some());
        }
    }

    #[test]
    fn cancel_rejects_blank_reason() {
        let mut s = draft_session();
        let err = s.mark_cancelled("   ", Utc::now()).unwrap_err();
        assert!(matches!(err, CountError::MissingReason));
        assert_eq!(s.status, CountStatus::Draft, "failed cancel must not mutate");
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&CountStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let parsed: CountStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(parsed, CountStatus::Cancelled);
    }

    #[test]
    fn labels_cover_every_status() {
        // Exhaustive match in label() keeps this from silently falling through
        // when a status is added.
        assert_eq!(CountStatus::Draft.label(), "Draft");
        assert_eq!(CountStatus::InProgress.label(), "In progress");
        assert_eq!(CountStatus::Completed.label(), "Completed");
        assert_eq!(CountStatus::Cancelled.label(), "Cancelled");
    }
}
