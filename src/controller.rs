//! Count session controller.
//!
//! Orchestrates one session's screens: load, start, scan, cancel, complete.
//! The controller holds the only mutable view of the session and its ledger,
//! so requests for a session are naturally serialized — a second scan cannot
//! start while one is in flight, and cancel cannot race a completion that
//! has already been sent. Local state changes only after the dashboard
//! confirms; after a failed terminal transition the caller re-fetches with
//! [`refresh`] instead of retrying blindly.
//!
//! [`refresh`]: CountController::refresh

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::backend::{CountBackend, NewProduct, OperatorContext, ProductRef};
use crate::completion::{self, CompletionOptions, CompletionReport};
use crate::db::{self, DbState};
use crate::error::CountError;
use crate::ledger::{CountLedger, CountSummary};
use crate::reconcile::{self, ScanOutcome};
use crate::session::{CountSession, CountStatus};

pub struct CountController<B: CountBackend> {
    backend: B,
    operator: OperatorContext,
    session: CountSession,
    ledger: CountLedger,
    journal: Option<Arc<DbState>>,
}

impl<B: CountBackend> CountController<B> {
    /// Fetch the session and its item snapshot from the admin dashboard.
    pub async fn load(
        backend: B,
        operator: OperatorContext,
        session_id: &str,
    ) -> Result<Self, CountError> {
        let session = backend.get_session(session_id).await?;
        let items = backend.get_items(session_id).await?;
        info!(
            session_id = %session.id,
            location_id = %session.location_id,
            status = %session.status,
            items = items.len(),
            "count session loaded"
        );
        Ok(Self {
            backend,
            operator,
            session,
            ledger: CountLedger::new(items),
            journal: None,
        })
    }

    /// Attach the local count journal. Session lifecycle and scan events are
    /// appended after the dashboard confirms them.
    pub fn attach_journal(&mut self, db: Arc<DbState>) {
        self.journal = Some(db);
    }

    pub fn session(&self) -> &CountSession {
        &self.session
    }

    pub fn ledger(&self) -> &CountLedger {
        &self.ledger
    }

    /// Totals and progress computed from the local ledger.
    pub fn summary(&self) -> CountSummary {
        self.ledger.summary()
    }

    /// Remote summary when available, local recomputation otherwise. The
    /// ledger is authoritative either way; the remote aggregate is advisory.
    pub async fn fetch_summary(&self) -> CountSummary {
        match self.backend.get_summary(&self.session.id).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "remote summary unavailable, computing locally");
                self.ledger.summary()
            }
        }
    }

    /// Re-fetch session and items. Required after a remote rejection left
    /// local and remote state possibly diverged.
    pub async fn refresh(&mut self) -> Result<(), CountError> {
        let session = self.backend.get_session(&self.session.id).await?;
        let items = self.backend.get_items(&self.session.id).await?;
        info!(session_id = %session.id, status = %session.status, "count session refreshed");
        self.session = session;
        self.ledger = CountLedger::new(items);
        Ok(())
    }

    /// Start counting: `DRAFT -> IN_PROGRESS`.
    pub async fn start(&mut self) -> Result<(), CountError> {
        self.session.expect_status("start", &[CountStatus::Draft])?;

        let updated = self.backend.start_session(&self.session.id).await?;
        self.session.begin(Utc::now())?;
        if let Some(at) = updated.started_at {
            // The dashboard's clock wins for the persisted timestamp.
            self.session.started_at = Some(at);
        }

        info!(session_id = %self.session.id, "count session started");
        self.journal_event("session:start", &self.session.id, &serde_json::json!({}));
        Ok(())
    }

    /// Reconcile one scan. Soft outcomes (already counted, unexpected
    /// product, unknown barcode) come back as `Ok`; only state violations
    /// and remote failures are errors.
    pub async fn scan(&mut self, barcode: &str, quantity: u32) -> Result<ScanOutcome, CountError> {
        let outcome = reconcile::scan(
            &self.backend,
            &self.session,
            &mut self.ledger,
            &self.operator,
            barcode,
            quantity,
        )
        .await?;

        if let ScanOutcome::Counted {
            product_id,
            counted_quantity,
            discrepancy,
            ..
        } = &outcome
        {
            self.journal_event(
                "scan:counted",
                product_id,
                &serde_json::json!({
                    "barcode": barcode,
                    "quantity": counted_quantity,
                    "discrepancy": discrepancy,
                }),
            );
        }
        Ok(outcome)
    }

    /// Cancel the session with a reason. Valid from `DRAFT` or `IN_PROGRESS`.
    pub async fn cancel(&mut self, reason: &str) -> Result<(), CountError> {
        if reason.trim().is_empty() {
            return Err(CountError::MissingReason);
        }
        self.session
            .expect_status("cancel", &[CountStatus::Draft, CountStatus::InProgress])?;

        let updated = self.backend.cancel_session(&self.session.id, reason).await?;
        self.session.mark_cancelled(reason, Utc::now())?;
        if let Some(at) = updated.cancelled_at {
            self.session.cancelled_at = Some(at);
        }

        info!(session_id = %self.session.id, reason = %reason, "count session cancelled");
        self.journal_event(
            "session:cancel",
            &self.session.id,
            &serde_json::json!({ "reason": reason }),
        );
        Ok(())
    }

    /// Complete the session. Uncounted items are finalised at zero; when
    /// `apply_adjustments` is set the dashboard receives exactly the
    /// discrepancy set as stock-adjustment requests.
    pub async fn complete(
        &mut self,
        options: CompletionOptions,
    ) -> Result<CompletionReport, CountError> {
        let plan = completion::plan(&self.session, &self.ledger, &options)?;
        let request = completion::request(&options, &plan);

        // The session stays IN_PROGRESS locally until the dashboard accepts.
        let updated = self
            .backend
            .complete_session(&self.session.id, &request)
            .await?;

        completion::apply(
            &mut self.session,
            &mut self.ledger,
            &options,
            &self.operator.operator_id,
            Utc::now(),
        )?;
        if let Some(at) = updated.completed_at {
            self.session.completed_at = Some(at);
        }

        let report = CompletionReport {
            totals: self.ledger.totals(),
            discrepancies: plan.discrepancies,
            zero_filled: plan.zero_fill_product_ids.len() as u32,
            adjustments_requested: plan.adjustments.len() as u32,
        };

        info!(
            session_id = %self.session.id,
            discrepancies = report.discrepancies.len(),
            zero_filled = report.zero_filled,
            adjustments = report.adjustments_requested,
            "count session completed"
        );
        self.journal_event(
            "session:complete",
            &self.session.id,
            &serde_json::json!({
                "applyAdjustments": options.apply_adjustments,
                "adjustments": report.adjustments_requested,
                "zeroFilled": report.zero_filled,
            }),
        );
        Ok(report)
    }

    /// Create a product from an unknown-barcode suggestion. Does not add a
    /// count item: the expected list is a session-creation snapshot, and a
    /// product created mid-count was not in stock when it was taken.
    pub async fn create_product(&self, product: &NewProduct) -> Result<ProductRef, CountError> {
        let created = self.backend.create_product(product).await?;
        info!(product_id = %created.id, "product created from scan suggestion");
        Ok(created)
    }

    /// Append to the local journal. A journal miss degrades the audit trail,
    /// not the count — the dashboard already confirmed the event.
    fn journal_event(&self, event_type: &str, entity_id: &str, payload: &serde_json::Value) {
        let Some(db) = &self.journal else {
            return;
        };
        if let Err(e) = db::journal_event(
            db,
            &self.session.id,
            event_type,
            entity_id,
            &self.operator.operator_id,
            payload,
        ) {
            warn!(event_type, error = %e, "count journal write failed");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::backend::testing::{operator, MockBackend};
    use crate::ledger::CountItem;
    use crate::session::CountStatus;

    fn session(status: CountStatus) -> CountSession {
        CountSession {
            id: "cs-1".into(),
            location_id: "loc-1".into(),
            status,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            notes: None,
            cancellation_reason: None,
        }
    }

    fn item(product_id: &str, expected: u32) -> CountItem {
        CountItem {
            id: format!("ci-{product_id}"),
            count_session_id: "cs-1".into(),
            product_id: product_id.into(),
            lot_id: None,
            expected_quantity: expected,
            counted_quantity: None,
            scanned_barcode: None,
            counted_by: None,
            counted_at: None,
            notes: None,
        }
    }

    /// Backend for the worked example: A(expected=10), B(5), C(0).
    fn example_backend(status: CountStatus) -> MockBackend {
        let mut backend = MockBackend::with_session(
            session(status),
            vec![item("p-a", 10), item("p-b", 5), item("p-c", 0)],
        );
        backend.add_barcode("111-a", "p-a");
        backend.add_barcode("222-b", "p-b");
        backend.add_barcode("333-c", "p-c");
        backend
    }

    async fn loaded(status: CountStatus) -> CountController<MockBackend> {
        CountController::load(example_backend(status), operator(), "cs-1")
            .await
            .expect("load session")
    }

    #[tokio::test]
    async fn full_count_scenario_with_adjustments() {
        let mut ctl = loaded(CountStatus::Draft).await;
        ctl.start().await.unwrap();
        assert_eq!(ctl.session().status, CountStatus::InProgress);
        assert!(ctl.session().started_at.is_some());

        // Scan A with quantity 8: shortage of 2.
        match ctl.scan("111-a", 8).await.unwrap() {
            ScanOutcome::Counted { discrepancy, .. } => assert_eq!(discrepancy, -2),
            other => panic!("expected Counted, got {other:?}"),
        }

        // Scan A again: already counted, ledger unchanged.
        match ctl.scan("111-a", 8).await.unwrap() {
            ScanOutcome::AlreadyCounted {
                counted_quantity, ..
            } => assert_eq!(counted_quantity, 8),
            other => panic!("expected AlreadyCounted, got {other:?}"),
        }

        // Scan B with quantity 5: exact match.
        match ctl.scan("222-b", 5).await.unwrap() {
            ScanOutcome::Counted { discrepancy, .. } => assert_eq!(discrepancy, 0),
            other => panic!("expected Counted, got {other:?}"),
        }

        let report = ctl
            .complete(CompletionOptions {
                apply_adjustments: true,
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(ctl.session().status, CountStatus::Completed);
        // C was zero-filled; expected 0, counted 0, no adjustment.
        assert_eq!(report.zero_filled, 1);
        assert_eq!(report.adjustments_requested, 1);
        assert_eq!(report.totals.expected, 15);
        assert_eq!(report.totals.counted, 13);
        assert_eq!(report.totals.discrepancy, -2);
        assert_eq!(report.totals.items_counted, 3);

        // The dashboard received exactly the discrepancy set.
        let backend = &ctl.backend;
        let completions = backend.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].apply_adjustments);
        assert_eq!(completions[0].adjustments.len(), 1);
        assert_eq!(completions[0].adjustments[0].product_id, "p-a");
        assert_eq!(completions[0].adjustments[0].discrepancy, -2);
    }

    #[tokio::test]
    async fn opt_out_completion_sends_no_adjustments() {
        let mut ctl = loaded(CountStatus::InProgress).await;
        ctl.scan("111-a", 2).await.unwrap();

        let report = ctl
            .complete(CompletionOptions {
                apply_adjustments: false,
                notes: Some("audit only".into()),
            })
            .await
            .unwrap();

        assert_eq!(report.adjustments_requested, 0);
        assert!(!report.discrepancies.is_empty(), "report still available");
        assert_eq!(ctl.session().status, CountStatus::Completed);
        assert_eq!(ctl.session().notes.as_deref(), Some("audit only"));

        let completions = ctl.backend.completions.lock().unwrap();
        assert!(completions[0].adjustments.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_leaves_session_in_progress() {
        let mut ctl = loaded(CountStatus::InProgress).await;
        *ctl.backend.fail_next.lock().unwrap() = Some(ApiError::Server { status: 503 });

        let err = ctl
            .complete(CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.retryable());
        assert_eq!(
            ctl.session().status,
            CountStatus::InProgress,
            "no optimistic terminal transition"
        );
        assert_eq!(
            ctl.ledger().totals().items_counted,
            0,
            "zero-fill must not apply locally on failure"
        );
    }

    #[tokio::test]
    async fn start_rejected_locally_for_non_draft() {
        let mut ctl = loaded(CountStatus::Completed).await;
        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, CountError::InvalidState { operation: "start", .. }));
        // The guard fires before the request; the mock saw nothing.
        assert!(ctl.backend.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_requires_reason_and_in_flight_state() {
        let mut ctl = loaded(CountStatus::InProgress).await;
        let err = ctl.cancel("  ").await.unwrap_err();
        assert!(matches!(err, CountError::MissingReason));

        ctl.cancel("wrong location scheduled").await.unwrap();
        assert_eq!(ctl.session().status, CountStatus::Cancelled);
        assert_eq!(
            ctl.session().cancellation_reason.as_deref(),
            Some("wrong location scheduled")
        );

        // Terminal now: a second cancel is rejected.
        let err = ctl.cancel("again").await.unwrap_err();
        assert!(matches!(err, CountError::InvalidState { operation: "cancel", .. }));
    }

    #[tokio::test]
    async fn refresh_resyncs_after_remote_rejection() {
        let mut ctl = loaded(CountStatus::InProgress).await;

        // Another client completed the session behind our back.
        {
            let mut remote = ctl.backend.session.lock().unwrap();
            if let Some(s) = remote.as_mut() {
                s.status = CountStatus::Completed;
            }
        }

        assert_eq!(ctl.session().status, CountStatus::InProgress);
        ctl.refresh().await.unwrap();
        assert_eq!(ctl.session().status, CountStatus::Completed);

        let err = ctl.scan("111-a", 1).await.unwrap_err();
        assert!(matches!(err, CountError::InvalidState { operation: "scan", .. }));
    }

    #[tokio::test]
    async fn summary_falls_back_to_local_computation() {
        let mut backend = example_backend(CountStatus::InProgress);
        backend.summary_unavailable = true;
        let mut ctl = CountController::load(backend, operator(), "cs-1")
            .await
            .unwrap();
        ctl.scan("111-a", 8).await.unwrap();

        let summary = ctl.fetch_summary().await;
        assert_eq!(summary.totals.items_counted, 1);
        assert_eq!(summary.totals.counted, 8);
        assert!((summary.progress - 100.0 / 3.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn confirmed_events_are_journalled() {
        let db = Arc::new(crate::db::test_db_state());
        let mut ctl = loaded(CountStatus::Draft).await;
        ctl.attach_journal(db.clone());

        ctl.start().await.unwrap();
        ctl.scan("111-a", 8).await.unwrap();
        // Soft outcomes leave no journal entry.
        ctl.scan("111-a", 8).await.unwrap();
        ctl.complete(CompletionOptions {
            apply_adjustments: true,
            notes: None,
        })
        .await
        .unwrap();

        let entries = crate::db::session_journal(&db, "cs-1").unwrap();
        let kinds: Vec<&str> = entries.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["session:start", "scan:counted", "session:complete"]);
        assert_eq!(entries[1].payload["discrepancy"], -2);
    }

    #[tokio::test]
    async fn create_product_does_not_touch_ledger() {
        let ctl = loaded(CountStatus::InProgress).await;
        let created = ctl
            .create_product(&NewProduct {
                name: "Oat Milk 1L".into(),
                barcode: Some("8712345678906".into()),
                sku: None,
            })
            .await
            .unwrap();

        assert!(created.id.starts_with("p-new-"));
        assert_eq!(ctl.ledger().items().len(), 3, "expected list is a snapshot");
    }
}
