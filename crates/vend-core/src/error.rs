//! # Error Types
//!
//! Domain error taxonomy for vend-core.
//!
//! Two families, mirrored through everything the core does:
//!
//! - [`ValidationError`] - the caller supplied invalid input or violated a
//!   business rule knowable without a race. Nothing was persisted.
//! - [`ConflictError`] - a unit or quantity that looked available became
//!   unavailable between read and write (a lost race). Carries enough
//!   detail (which unit, which status) for the caller to re-fetch and retry.
//!
//! [`CoreError`] wraps both so call sites that can fail either way return a
//! single type. Persistence failures are a `vend-db` concern and never
//! appear here.

use thiserror::Error;

use crate::cart::LineKey;
use crate::types::UnitStatus;

// =============================================================================
// Validation Error
// =============================================================================

/// Business-rule and input validation failures.
///
/// These are collected rather than returned fail-fast wherever an operation
/// can have several problems at once (intake, checkout), so the caller can
/// report every problem in one round trip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Referenced product does not exist.
    #[error("product not found: {id}")]
    ProductNotFound { id: String },

    /// Product exists but is deactivated.
    #[error("product {sku} is inactive")]
    ProductInactive { sku: String },

    /// Referenced stock unit does not exist.
    #[error("stock unit not found: {id}")]
    UnitNotFound { id: String },

    /// A quantity was zero or negative.
    #[error("{field} must be positive")]
    NotPositive { field: String },

    /// Quantity exceeds the per-line maximum.
    #[error("quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Selection has hit its line cap.
    #[error("selection cannot have more than {max} lines")]
    SelectionTooLarge { max: usize },

    /// Serialized products need one serial per unit at intake.
    #[error("product {sku} is serialized: expected {expected} serials, got {got}")]
    SerialCountMismatch {
        sku: String,
        expected: i64,
        got: usize,
    },

    /// A supplied serial was empty after trimming.
    #[error("serial at position {index} is empty")]
    SerialEmpty { index: usize },

    /// The same serial appeared twice in one intake request.
    #[error("duplicate serial in request: {serial}")]
    DuplicateSerial { serial: String },

    /// The serial is already carried by a live (available/sold) unit.
    #[error("serial already in use: {serial}")]
    SerialInUse { serial: String },

    /// Not enough available stock to satisfy a quantity claim.
    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Checkout was asked to commit an empty selection.
    #[error("selection is empty")]
    EmptySelection,

    /// No selection line exists under the given key.
    #[error("no selection line for {key}")]
    LineNotFound { key: LineKey },

    /// The ledger state machine has no such edge.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },

    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (characters, shape).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A monetary amount was negative.
    #[error("{field} must not be negative")]
    Negative { field: String },
}

// =============================================================================
// Conflict Error
// =============================================================================

/// Lost-race failures against shared ledger state.
///
/// Never silently resolved by substituting a different unit: the caller
/// decides whether to drop the line, pick another unit, or retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    /// The selection already references this unit (concrete claim or
    /// display pre-assignment).
    #[error("unit {unit_id} is already claimed by this selection")]
    AlreadyInSelection { unit_id: String },

    /// The unit's live status is not `available`.
    #[error("unit {unit_id} is {status}, not available")]
    UnitNotAvailable { unit_id: String, status: UnitStatus },

    /// A compare-and-set found the unit in a different status than
    /// expected: another writer got there first.
    #[error("unit {unit_id} changed status: expected {expected}, found {actual}")]
    StatusLost {
        unit_id: String,
        expected: UnitStatus,
        actual: UnitStatus,
    },

    /// A quantity claim passed validation but the stock drained before the
    /// commit pass could pick its units.
    #[error("stock for product {product_id} drained at commit: requested {requested}, available {available}")]
    StockDrained {
        product_id: String,
        requested: i64,
        available: i64,
    },
}

// =============================================================================
// Core Error
// =============================================================================

/// Either side of the taxonomy, for call sites that can fail both ways.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

/// One failed line from checkout's validation pass.
///
/// Checkout collects every violation before aborting, so a caller can strip
/// all offending lines and retry in a single round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct LineViolation {
    /// Key of the selection line that failed revalidation.
    pub key: LineKey,
    /// What went wrong for that line.
    pub reason: CoreError,
}

impl LineViolation {
    pub fn new(key: LineKey, reason: impl Into<CoreError>) -> Self {
        LineViolation {
            key,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for LineViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
