//! # Domain Types
//!
//! Core domain types for the Vend inventory and sale model.
//!
//! ## Identity Pattern
//! Every entity carries a UUID v4 `id` for relations, plus a business
//! identifier where the domain has one (product `sku`, unit `barcode` /
//! `serial`, sale `invoice_no`). Business identifiers are unique and
//! enforced by the schema as the final backstop.
//!
//! ## Stock Unit Lifecycle
//! ```text
//!              ┌──────> sold      (checkout commit)
//!  available ──┼──────> used      (internal consumption)
//!              ├──────> damaged   (manual write-off)
//!              └──────> other     (manual write-off, free-form reason)
//! ```
//! No edges back to `available`, no edges out of the terminal states. The
//! transition itself is a compare-and-set in the ledger; [`UnitStatus::can_transition_to`]
//! is the static shape of that machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1 bp = 0.01%; 825 = 8.25%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// The rate as a percentage, for display only.
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog entry.
///
/// Once a stock unit references a product, only prices and metadata are
/// edited; the `serialized` flag and SKU stay put.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier, unique.
    pub sku: String,

    /// Display name shown at the register and on receipts.
    pub name: String,

    /// Optional category label.
    pub category: Option<String>,

    /// Acquisition cost in cents; absent when unknown (e.g. trade-ins).
    pub purchase_price_cents: Option<i64>,

    /// Retail price in cents.
    pub selling_price_cents: i64,

    /// Wholesale price in cents.
    pub wholesale_price_cents: i64,

    /// Restock alert threshold.
    pub min_stock: i64,

    /// True when every unit must carry a caller-supplied serial at intake.
    pub serialized: bool,

    /// Soft-delete flag.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Retail price as Money.
    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }
}

// =============================================================================
// Unit Status
// =============================================================================

/// Lifecycle status of one physical stock unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// In stock, claimable.
    Available,
    /// Left with a sale.
    Sold,
    /// Consumed internally (e.g. as a part).
    Used,
    /// Written off as damaged.
    Damaged,
    /// Written off for any other reason.
    Other,
}

impl UnitStatus {
    /// Whether the state machine has an edge from `self` to `to`.
    ///
    /// Only `available` has outgoing edges; nothing ever becomes
    /// `available` again.
    pub fn can_transition_to(self, to: UnitStatus) -> bool {
        self == UnitStatus::Available && to != UnitStatus::Available
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Available => "available",
            UnitStatus::Sold => "sold",
            UnitStatus::Used => "used",
            UnitStatus::Damaged => "damaged",
            UnitStatus::Other => "other",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stock Unit
// =============================================================================

/// One physical, individually trackable inventory item.
///
/// Prices are snapshots taken at intake: later catalog edits never change
/// what a unit on the shelf is worth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockUnit {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Owning product.
    pub product_id: String,

    /// Scannable identifier; unique when present. Generated at intake on
    /// request, absent otherwise.
    pub barcode: Option<String>,

    /// Manufacturer serial / IMEI; unique when present. Mandatory for
    /// units of serialized products, otherwise independent of `barcode`.
    pub serial: Option<String>,

    /// Lifecycle status; see the module-level state machine.
    pub status: UnitStatus,

    /// Intake batch label.
    pub batch: Option<String>,

    /// Physical location label.
    pub location: Option<String>,

    /// Cost snapshot at intake.
    pub purchase_price_cents: Option<i64>,

    /// Retail price snapshot at intake.
    pub selling_price_cents: i64,

    pub created_at: DateTime<Utc>,

    /// Acting user supplied by the caller, for audit.
    pub created_by: String,
}

impl StockUnit {
    #[inline]
    pub fn is_available(&self) -> bool {
        self.status == UnitStatus::Available
    }

    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }
}

// =============================================================================
// Payment Method & Status
// =============================================================================

/// How a sale was (or will be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash.
    Cash,
    /// Card on an external terminal.
    Card,
    /// Bank transfer.
    Transfer,
    /// Settled later; checkout records no payment.
    OnAccount,
}

impl PaymentMethod {
    /// Deferred methods leave the sale `pending` with no Payment row.
    #[inline]
    pub const fn is_deferred(self) -> bool {
        matches!(self, PaymentMethod::OnAccount)
    }
}

/// Settlement state of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Fully paid at checkout.
    Paid,
    /// Deferred settlement outstanding.
    Pending,
}

// =============================================================================
// Sale
// =============================================================================

/// A committed sale (invoice header).
///
/// Created only by a successful checkout commit; never partially persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,

    /// Human-facing invoice number, unique, monotonic-ish (gaps tolerated).
    pub invoice_no: String,

    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,

    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// One line of a sale.
///
/// Product details are frozen onto the line (snapshot pattern) so history
/// survives later catalog edits. When a stock unit is bound, quantity is
/// always 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleLine {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,

    /// The physical unit this line sold, when bound.
    pub stock_unit_id: Option<String>,

    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,

    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,

    /// Order within the sale.
    pub position: i64,

    pub created_at: DateTime<Utc>,
}

impl SaleLine {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A payment recorded against a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub sale_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    /// External reference (terminal auth code, transfer id).
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
