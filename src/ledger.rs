//! Count item ledger.
//!
//! Holds the per-product expected/counted snapshot for one session and all
//! the derived math: discrepancies, totals, progress. Expected quantities are
//! snapshotted from stock when the admin dashboard builds the session's item
//! list and never change afterwards; counted quantities are written at most
//! once by the scan flow (re-scans are reported, not merged).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// One expected product in a count session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountItem {
    pub id: String,
    #[serde(alias = "count_session_id")]
    pub count_session_id: String,
    #[serde(alias = "product_id")]
    pub product_id: String,
    #[serde(default, alias = "lot_id")]
    pub lot_id: Option<String>,
    /// Stock quantity at session creation. Immutable.
    #[serde(alias = "expected_quantity")]
    pub expected_quantity: u32,
    /// Present only once the item has been counted.
    #[serde(default, alias = "counted_quantity")]
    pub counted_quantity: Option<u32>,
    #[serde(default, alias = "scanned_barcode")]
    pub scanned_barcode: Option<String>,
    #[serde(default, alias = "counted_by")]
    pub counted_by: Option<String>,
    #[serde(default, alias = "counted_at")]
    pub counted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CountItem {
    pub fn is_counted(&self) -> bool {
        self.counted_quantity.is_some()
    }

    /// `counted - expected`, negative for shortage, positive for surplus.
    /// `None` until the item has been counted.
    pub fn discrepancy(&self) -> Option<i64> {
        self.counted_quantity
            .map(|counted| i64::from(counted) - i64::from(self.expected_quantity))
    }

    /// Record a confirmed count. Callers guard the already-counted case; the
    /// ledger itself never overwrites an existing count.
    pub(crate) fn record(
        &mut self,
        quantity: u32,
        barcode: &str,
        counted_by: &str,
        at: DateTime<Utc>,
    ) {
        debug_assert!(!self.is_counted(), "record() on an already-counted item");
        self.counted_quantity = Some(quantity);
        self.scanned_barcode = Some(barcode.to_string());
        self.counted_by = Some(counted_by.to_string());
        self.counted_at = Some(at);
    }

    /// Completion-time rule: a never-scanned item is confirmed at zero stock,
    /// not skipped.
    pub(crate) fn zero_fill(&mut self, counted_by: &str, at: DateTime<Utc>) {
        if !self.is_counted() {
            self.counted_quantity = Some(0);
            self.counted_by = Some(counted_by.to_string());
            self.counted_at = Some(at);
        }
    }
}

// ---------------------------------------------------------------------------
// Discrepancy reporting
// ---------------------------------------------------------------------------

/// Direction of a non-zero discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    Shortage,
    Surplus,
}

impl DiscrepancyType {
    /// `None` for a zero delta — matched items never enter the discrepancy set.
    pub fn from_delta(delta: i64) -> Option<Self> {
        match delta {
            d if d < 0 => Some(DiscrepancyType::Shortage),
            d if d > 0 => Some(DiscrepancyType::Surplus),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DiscrepancyType::Shortage => "Shortage",
            DiscrepancyType::Surplus => "Surplus",
        }
    }
}

/// Reporting view over a counted item whose quantity did not match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscrepancyItem {
    pub product_id: String,
    #[serde(default)]
    pub lot_id: Option<String>,
    pub expected_quantity: u32,
    pub counted_quantity: u32,
    pub discrepancy: i64,
    pub discrepancy_type: DiscrepancyType,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Derived aggregate over a ledger. Always recomputable; never a source of
/// truth on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTotals {
    pub expected: u64,
    pub counted: u64,
    pub discrepancy: i64,
    pub items_total: u32,
    pub items_counted: u32,
}

/// Totals plus progress, the shape the session screens render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSummary {
    pub totals: CountTotals,
    pub progress: f64,
}

/// The session's item set, owned for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct CountLedger {
    items: Vec<CountItem>,
}

impl CountLedger {
    pub fn new(items: Vec<CountItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[CountItem] {
        &self.items
    }

    pub fn find_by_product(&self, product_id: &str) -> Option<&CountItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub(crate) fn find_by_product_mut(&mut self, product_id: &str) -> Option<&mut CountItem> {
        self.items.iter_mut().find(|i| i.product_id == product_id)
    }

    pub(crate) fn items_mut(&mut self) -> &mut [CountItem] {
        &mut self.items
    }

    /// Aggregate totals. Uncounted items contribute 0 to `counted`, not their
    /// expected value.
    pub fn totals(&self) -> CountTotals {
        let mut totals = CountTotals {
            expected: 0,
            counted: 0,
            discrepancy: 0,
            items_total: self.items.len() as u32,
            items_counted: 0,
        };
        for item in &self.items {
            totals.expected += u64::from(item.expected_quantity);
            if let Some(counted) = item.counted_quantity {
                totals.counted += u64::from(counted);
                totals.items_counted += 1;
            }
        }
        totals.discrepancy = totals.counted as i64 - totals.expected as i64;
        totals
    }

    /// Percentage of items counted, in `[0, 100]`. An empty ledger reports 0
    /// rather than dividing by zero.
    pub fn progress(&self) -> f64 {
        let totals = self.totals();
        if totals.items_total == 0 {
            return 0.0;
        }
        (f64::from(totals.items_counted) / f64::from(totals.items_total) * 100.0).clamp(0.0, 100.0)
    }

    pub fn summary(&self) -> CountSummary {
        CountSummary {
            totals: self.totals(),
            progress: self.progress(),
        }
    }

    /// Counted items whose quantity did not match, in ledger order.
    pub fn discrepancies(&self) -> Vec<DiscrepancyItem> {
        self.items
            .iter()
            .filter_map(|item| {
                let counted = item.counted_quantity?;
                let delta = item.discrepancy()?;
                let discrepancy_type = DiscrepancyType::from_delta(delta)?;
                Some(DiscrepancyItem {
                    product_id: item.product_id.clone(),
                    lot_id: item.lot_id.clone(),
                    expected_quantity: item.expected_quantity,
                    counted_quantity: counted,
                    discrepancy: delta,
                    discrepancy_type,
                })
            })
            .collect()
    }

    pub fn uncounted_count(&self) -> u32 {
        self.items.iter().filter(|i| !i.is_counted()).count() as u32
    }
}

// ===========================================================================
// Tests
// ===========================================================================
