//! Remote collaborator contract for the counting workflow.
//!
//! The admin dashboard is the system of record: sessions, items, products,
//! and stock all live there. `CountBackend` is the seam the engine talks
//! through — `AdminApi` implements it over HTTP, tests implement it in
//! memory. Signatures are semantic; the wire shape is the implementor's
//! concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::ledger::{CountItem, CountSummary};
use crate::session::CountSession;

// ---------------------------------------------------------------------------
// Operator context
// ---------------------------------------------------------------------------

/// Who is counting, on which terminal. Threaded explicitly into every
/// operation — there is no ambient current-user singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorContext {
    #[serde(alias = "operator_id", alias = "staffId")]
    pub operator_id: String,
    #[serde(default, alias = "operator_name")]
    pub operator_name: Option<String>,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
}

// ---------------------------------------------------------------------------
// Product catalog types
// ---------------------------------------------------------------------------

/// A product known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
}

/// Prefill data from the external barcode database for a product the local
/// catalog does not know yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSuggestion {
    pub barcode: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    /// Which lookup service produced the suggestion.
    #[serde(default)]
    pub source: Option<String>,
}

/// Result of resolving a scanned barcode: local catalog first, external
/// barcode database second.
#[derive(Debug, Clone)]
pub enum BarcodeResolution {
    Product(ProductRef),
    Suggestion(ProductSuggestion),
    NotFound,
}

/// Payload for creating a product out of an unknown-barcode suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

// ---------------------------------------------------------------------------
// Count write payloads
// ---------------------------------------------------------------------------

/// A confirmed count for one item, with full provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCount {
    pub item_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub scanned_barcode: String,
    pub counted_by: String,
    pub terminal_id: String,
    pub counted_at: DateTime<Utc>,
}

/// One stock-adjustment request, reconciling current stock to the counted
/// quantity. Tagged with provenance so the adjustment transaction can be
/// traced back to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustmentRequest {
    pub count_session_id: String,
    pub product_id: String,
    #[serde(default)]
    pub lot_id: Option<String>,
    pub expected_quantity: u32,
    pub counted_quantity: u32,
    pub discrepancy: i64,
}

/// Completion payload. `adjustments` is exactly the discrepancy set computed
/// after zero-fill when `apply_adjustments` is set, and empty otherwise; the
/// backend applies the set transactionally or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub apply_adjustments: bool,
    #[serde(default)]
    pub notes: Option<String>,
    pub adjustments: Vec<StockAdjustmentRequest>,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// The remote inventory API, as the counting engine sees it.
#[allow(async_fn_in_trait)]
pub trait CountBackend {
    async fn get_session(&self, session_id: &str) -> Result<CountSession, ApiError>;
    async fn get_items(&self, session_id: &str) -> Result<Vec<CountItem>, ApiError>;
    /// Remote aggregate; advisory only — the client recomputes from its
    /// ledger when this is unavailable.
    async fn get_summary(&self, session_id: &str) -> Result<CountSummary, ApiError>;
    async fn start_session(&self, session_id: &str) -> Result<CountSession, ApiError>;
    async fn cancel_session(&self, session_id: &str, reason: &str)
        -> Result<CountSession, ApiError>;
    async fn complete_session(
        &self,
        session_id: &str,
        request: &CompletionRequest,
    ) -> Result<CountSession, ApiError>;
    async fn record_count(&self, session_id: &str, record: &RecordCount)
        -> Result<(), ApiError>;
    async fn resolve_barcode(&self, barcode: &str) -> Result<BarcodeResolution, ApiError>;
    async fn create_product(&self, product: &NewProduct) -> Result<ProductRef, ApiError>;
}

// ===========================================================================
// Test double
// ===========================================================================

/// In-memory backend mirroring a well-behaved admin dashboard. Shared by the
/// reconcile/completion/controller test modules.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::session::CountStatus;

    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub session: Mutex<Option<CountSession>>,
        pub items: Mutex<Vec<CountItem>>,
        pub barcodes: HashMap<String, ProductRef>,
        pub suggestions: HashMap<String, ProductSuggestion>,
        pub recorded: Mutex<Vec<RecordCount>>,
        pub completions: Mutex<Vec<CompletionRequest>>,
        pub created_products: Mutex<Vec<NewProduct>>,
        /// When set, the next mutating call fails with this error.
        pub fail_next: Mutex<Option<ApiError>>,
        /// When true, `get_summary` pretends the endpoint is unavailable.
        pub summary_unavailable: bool,
    }

    impl MockBackend {
        pub fn with_session(session: CountSession, items: Vec<CountItem>) -> Self {
            let mut backend = Self::default();
            backend.session = Mutex::new(Some(session));
            backend.items = Mutex::new(items);
            backend
        }

        pub fn add_barcode(&mut self, barcode: &str, product_id: &str) {
            self.barcodes.insert(
                barcode.to_string(),
                ProductRef {
                    id: product_id.to_string(),
                    name: Some(format!("Product {product_id}")),
                    sku: None,
                    barcode: Some(barcode.to_string()),
                },
            );
        }

        fn take_failure(&self) -> Result<(), ApiError> {
            match self.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn session_clone(&self) -> Result<CountSession, ApiError> {
            self.session
                .lock()
                .unwrap()
                .clone()
                .ok_or(ApiError::NotFound {
                    path: "/counts".into(),
                })
        }
    }

    impl CountBackend for MockBackend {
        async fn get_session(&self, _session_id: &str) -> Result<CountSession, ApiError> {
            self.session_clone()
        }

        async fn get_items(&self, _session_id: &str) -> Result<Vec<CountItem>, ApiError> {
            Ok(self.items.lock().unwrap().clone())
        }

        async fn get_summary(&self, _session_id: &str) -> Result<CountSummary, ApiError> {
            if self.summary_unavailable {
                return Err(ApiError::NotFound {
                    path: "/summary".into(),
                });
            }
            let ledger = crate::ledger::CountLedger::new(self.items.lock().unwrap().clone());
            Ok(ledger.summary())
        }

        async fn start_session(&self, _session_id: &str) -> Result<CountSession, ApiError> {
            self.take_failure()?;
            let mut guard = self.session.lock().unwrap();
            let session = guard.as_mut().ok_or(ApiError::NotFound {
                path: "/counts".into(),
            })?;
            session.status = CountStatus::InProgress;
            session.started_at = Some(Utc::now());
            Ok(session.clone())
        }

        async fn cancel_session(
            &self,
            _session_id: &str,
            reason: &str,
        ) -> Result<CountSession, ApiError> {
            self.take_failure()?;
            let mut guard = self.session.lock().unwrap();
            let session = guard.as_mut().ok_or(ApiError::NotFound {
                path: "/counts".into(),
            })?;
            session.status = CountStatus::Cancelled;
            session.cancelled_at = Some(Utc::now());
            session.cancellation_reason = Some(reason.to_string());
            Ok(session.clone())
        }

        async fn complete_session(
            &self,
            _session_id: &str,
            request: &CompletionRequest,
        ) -> Result<CountSession, ApiError> {
            self.take_failure()?;
            self.completions.lock().unwrap().push(request.clone());
            let mut guard = self.session.lock().unwrap();
            let session = guard.as_mut().ok_or(ApiError::NotFound {
                path: "/counts".into(),
            })?;
            session.status = CountStatus::Completed;
            session.completed_at = Some(Utc::now());
            Ok(session.clone())
        }

        async fn record_count(
            &self,
            _session_id: &str,
            record: &RecordCount,
        ) -> Result<(), ApiError> {
            self.take_failure()?;
            self.recorded.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn resolve_barcode(&self, barcode: &str) -> Result<BarcodeResolution, ApiError> {
            if let Some(product) = self.barcodes.get(barcode) {
                return Ok(BarcodeResolution::Product(product.clone()));
            }
            if let Some(suggestion) = self.suggestions.get(barcode) {
                return Ok(BarcodeResolution::Suggestion(suggestion.clone()));
            }
            Ok(BarcodeResolution::NotFound)
        }

        async fn create_product(&self, product: &NewProduct) -> Result<ProductRef, ApiError> {
            self.take_failure()?;
            self.created_products.lock().unwrap().push(product.clone());
            Ok(ProductRef {
                id: format!("p-new-{}", self.created_products.lock().unwrap().len()),
                name: Some(product.name.clone()),
                sku: product.sku.clone(),
                barcode: product.barcode.clone(),
            })
        }
    }

    pub(crate) fn operator() -> OperatorContext {
        OperatorContext {
            operator_id: "op-1".into(),
            operator_name: Some("Counter One".into()),
            terminal_id: "term-1".into(),
        }
    }
}
