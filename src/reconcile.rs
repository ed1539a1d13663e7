//! Scan reconciliation.
//!
//! Maps one `(barcode, quantity)` scan event onto the ledger: resolve the
//! barcode, locate the expected item, guard against re-scans, persist the
//! count remotely, and only then mutate the local ledger. A re-scan of a
//! counted item is reported with the original values and never overwrites or
//! accumulates — correcting a count is a deliberate separate action, not a
//! side effect of scanning twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{BarcodeResolution, CountBackend, OperatorContext, ProductSuggestion, RecordCount};
use crate::error::CountError;
use crate::ledger::{CountLedger, DiscrepancyType};
use crate::session::{CountSession, CountStatus};

/// Barcodes outside this range are scanner noise, not products.
/// Matches the serial scanner's frame sanity check.
const MIN_BARCODE_LEN: usize = 3;
const MAX_BARCODE_LEN: usize = 50;

/// What a single scan did, reported back to the session screens.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ScanOutcome {
    /// The count was persisted and the ledger updated.
    #[serde(rename_all = "camelCase")]
    Counted {
        product_id: String,
        expected_quantity: u32,
        counted_quantity: u32,
        discrepancy: i64,
        /// `None` when counted matched expected.
        discrepancy_type: Option<DiscrepancyType>,
    },
    /// The item already has a recorded count; nothing changed.
    #[serde(rename_all = "camelCase")]
    AlreadyCounted {
        product_id: String,
        counted_quantity: u32,
        counted_at: Option<DateTime<Utc>>,
    },
    /// The product exists but is not in this session's expected list —
    /// usually a location or scope mismatch, surfaced distinctly from a
    /// re-scan.
    #[serde(rename_all = "camelCase")]
    UnexpectedProduct {
        product_id: String,
        product_name: Option<String>,
        barcode: String,
    },
    /// The catalog does not know the barcode. Carries the external lookup's
    /// prefill data when available, to offer the create-product flow.
    #[serde(rename_all = "camelCase")]
    UnknownBarcode {
        barcode: String,
        suggestion: Option<ProductSuggestion>,
    },
}

/// Reconcile one scan against the ledger.
///
/// The remote write happens before any local mutation; a persistence failure
/// leaves the ledger exactly as it was and surfaces a retryable error.
pub async fn scan<B: CountBackend>(
    backend: &B,
    session: &CountSession,
    ledger: &mut CountLedger,
    operator: &OperatorContext,
    barcode: &str,
    quantity: u32,
) -> Result<ScanOutcome, CountError> {
    session.expect_status("scan", &[CountStatus::InProgress])?;
    if quantity == 0 {
        return Err(CountError::InvalidQuantity);
    }

    let barcode = barcode.trim();
    if barcode.len() < MIN_BARCODE_LEN || barcode.len() > MAX_BARCODE_LEN {
        // Truncated or runaway frame from the scanner; treat as unknown
        // rather than querying the catalog with garbage.
        warn!(len = barcode.len(), "scan: barcode outside sane length range");
        return Ok(ScanOutcome::UnknownBarcode {
            barcode: barcode.to_string(),
            suggestion: None,
        });
    }

    let product = match backend.resolve_barcode(barcode).await? {
        BarcodeResolution::Product(product) => product,
        BarcodeResolution::Suggestion(suggestion) => {
            info!(barcode = %barcode, source = ?suggestion.source, "scan: unknown barcode with suggestion");
            return Ok(ScanOutcome::UnknownBarcode {
                barcode: barcode.to_string(),
                suggestion: Some(suggestion),
            });
        }
        BarcodeResolution::NotFound => {
            info!(barcode = %barcode, "scan: barcode not found anywhere");
            return Ok(ScanOutcome::UnknownBarcode {
                barcode: barcode.to_string(),
                suggestion: None,
            });
        }
    };

    let Some(item) = ledger.find_by_product(&product.id) else {
        warn!(
            product_id = %product.id,
            location_id = %session.location_id,
            "scan: product not expected at this location"
        );
        return Ok(ScanOutcome::UnexpectedProduct {
            product_id: product.id,
            product_name: product.name,
            barcode: barcode.to_string(),
        });
    };

    if let Some(previous) = item.counted_quantity {
        return Ok(ScanOutcome::AlreadyCounted {
            product_id: item.product_id.clone(),
            counted_quantity: previous,
            counted_at: item.counted_at,
        });
    }

    let expected_quantity = item.expected_quantity;
    let now = Utc::now();
    let record = RecordCount {
        item_id: item.id.clone(),
        product_id: item.product_id.clone(),
        quantity,
        scanned_barcode: barcode.to_string(),
        counted_by: operator.operator_id.clone(),
        terminal_id: operator.terminal_id.clone(),
        counted_at: now,
    };

    // Persist first. The ledger is only touched once the dashboard confirms.
    backend.record_count(&session.id, &record).await?;

    if let Some(item) = ledger.find_by_product_mut(&product.id) {
        item.record(quantity, barcode, &operator.operator_id, now);
    }

    let discrepancy = i64::from(quantity) - i64::from(expected_quantity);
    info!(
        session_id = %session.id,
        product_id = %product.id,
        quantity,
        discrepancy,
        "scan: count recorded"
    );

    Ok(ScanOutcome::Counted {
        product_id: product.id,
        expected_quantity,
        counted_quantity: quantity,
        discrepancy,
        discrepancy_type: DiscrepancyType::from_delta(discrepancy),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
