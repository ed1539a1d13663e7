//! The Small Stocktake - inventory count terminal engine.
//!
//! Implements the physical inventory counting workflow against The Small
//! admin dashboard: barcode-driven count sessions that move from `DRAFT`
//! through `IN_PROGRESS` to `COMPLETED` (or `CANCELLED`), reconciling
//! scanned quantities against the expected stock snapshot and optionally
//! emitting stock adjustments at completion. The dashboard stays the system
//! of record; local state changes only after it confirms.
//!
//! Typical wiring:
//! 1. [`diagnostics::init_logging`] once at startup, holding the guard.
//! 2. [`storage::update_terminal_credentials`] during onboarding, then
//!    [`api::AdminApi::from_storage`] for the dashboard client.
//! 3. [`controller::CountController::load`] per counting screen, with a
//!    [`db::DbState`] journal attached.
//! 4. Optionally [`scanner::SerialScanner::start`] to feed COM-port
//!    scanners into the same scan path as keyboard-wedge input.

pub mod api;
pub mod backend;
pub mod completion;
pub mod controller;
pub mod db;
pub mod diagnostics;
mod error;
pub mod ledger;
pub mod reconcile;
pub mod scanner;
pub mod session;
pub mod storage;

pub use api::{AdminApi, ApiError};
pub use backend::{CountBackend, OperatorContext};
pub use completion::{CompletionOptions, CompletionReport};
pub use controller::CountController;
pub use error::CountError;
pub use ledger::{CountItem, CountLedger, CountSummary, CountTotals, DiscrepancyItem, DiscrepancyType};
pub use reconcile::ScanOutcome;
pub use session::{CountSession, CountStatus};
