//! Completion policy.
//!
//! Closing a session finalises every uncounted item at zero (confirmed
//! empty, not skipped), derives the discrepancy set, and — when the operator
//! opted in — emits one stock-adjustment request per discrepant item. The
//! plan is computed locally and in full before anything is sent, so the
//! request set the dashboard receives is exactly the discrepancy set: no
//! more, no fewer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{CompletionRequest, StockAdjustmentRequest};
use crate::error::CountError;
use crate::ledger::{CountLedger, CountTotals, DiscrepancyItem, DiscrepancyType};
use crate::session::{CountSession, CountStatus};

/// Operator choices at completion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(alias = "apply_adjustments")]
    pub apply_adjustments: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Everything completion will do, computed before the remote call.
#[derive(Debug, Clone)]
pub struct CompletionPlan {
    /// Items that will be zero-filled (never scanned).
    pub zero_fill_product_ids: Vec<String>,
    /// Discrepancy set after simulated zero-fill.
    pub discrepancies: Vec<DiscrepancyItem>,
    /// Adjustment requests to emit; empty when adjustments are opted out.
    pub adjustments: Vec<StockAdjustmentRequest>,
}

/// What a completed session looked like, for the closing screen and audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub totals: CountTotals,
    pub discrepancies: Vec<DiscrepancyItem>,
    pub zero_filled: u32,
    pub adjustments_requested: u32,
}

/// Compute the completion plan. Valid only while the session is in progress.
pub fn plan(
    session: &CountSession,
    ledger: &CountLedger,
    options: &CompletionOptions,
) -> Result<CompletionPlan, CountError> {
    session.expect_status("complete", &[CountStatus::InProgress])?;

    let mut zero_fill_product_ids = Vec::new();
    let mut discrepancies = Vec::new();

    for item in ledger.items() {
        // Simulated zero-fill: an uncounted item is confirmed-zero.
        let counted = match item.counted_quantity {
            Some(q) => q,
            None => {
                zero_fill_product_ids.push(item.product_id.clone());
                0
            }
        };
        let delta = i64::from(counted) - i64::from(item.expected_quantity);
        if let Some(discrepancy_type) = DiscrepancyType::from_delta(delta) {
            discrepancies.push(DiscrepancyItem {
                product_id: item.product_id.clone(),
                lot_id: item.lot_id.clone(),
                expected_quantity: item.expected_quantity,
                counted_quantity: counted,
                discrepancy: delta,
                discrepancy_type,
            });
        }
    }

    let adjustments = if options.apply_adjustments {
        discrepancies
            .iter()
            .map(|d| StockAdjustmentRequest {
                count_session_id: session.id.clone(),
                product_id: d.product_id.clone(),
                lot_id: d.lot_id.clone(),
                expected_quantity: d.expected_quantity,
                counted_quantity: d.counted_quantity,
                discrepancy: d.discrepancy,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(CompletionPlan {
        zero_fill_product_ids,
        discrepancies,
        adjustments,
    })
}

/// Build the wire payload for `complete_session` from a plan.
pub fn request(options: &CompletionOptions, plan: &CompletionPlan) -> CompletionRequest {
    CompletionRequest {
        apply_adjustments: options.apply_adjustments,
        notes: options.notes.clone(),
        adjustments: plan.adjustments.clone(),
    }
}

/// Apply a confirmed completion to local state: zero-fill for real, then
/// transition the session. Called only after the dashboard accepted the
/// completion request.
pub(crate) fn apply(
    session: &mut CountSession,
    ledger: &mut CountLedger,
    options: &CompletionOptions,
    counted_by: &str,
    at: DateTime<Utc>,
) -> Result<(), CountError> {
    for item in ledger.items_mut() {
        item.zero_fill(counted_by, at);
    }
    session.mark_completed(options.notes.as_deref(), at)
}

// ===========================================================================
// Tests
// ===========================================================================
