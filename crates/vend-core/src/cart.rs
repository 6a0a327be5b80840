//! # Selection Aggregate
//!
//! A `Selection` is one session's in-progress set of claims against the
//! stock ledger - what a cashier has scanned or picked so far. It belongs
//! to exactly one session, is passed around explicitly (no ambient
//! storage), and never mutates the ledger itself: every availability fact
//! it needs is read by the caller and passed in.
//!
//! ## Lines
//! A selection holds an ordered list of lines, at most one per [`LineKey`]:
//!
//! - `unit:<id>` - a *concrete* claim bound to one specific stock unit,
//!   quantity fixed at 1;
//! - `product:<id>` - a *quantity* claim on N interchangeable units of a
//!   product, not yet bound to specific rows.
//!
//! Quantity lines carry a display-only pre-assignment of available unit
//! ids, disjoint from everything else the selection references. Checkout
//! ignores it and picks units fresh at commit time.
//!
//! Prices and names are frozen onto the line when it is added, so the
//! selection keeps showing what the customer was quoted even if the
//! catalog changes underneath it.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, CoreError, ValidationError};
use crate::types::{Product, StockUnit};
use crate::{MAX_LINE_QUANTITY, MAX_SELECTION_LINES};

// =============================================================================
// Line Key
// =============================================================================

/// Identity of a selection line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LineKey {
    /// Concrete claim on one stock unit.
    Unit(String),
    /// Quantity claim on a product.
    Product(String),
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::Unit(id) => write!(f, "unit:{id}"),
            LineKey::Product(id) => write!(f, "product:{id}"),
        }
    }
}

// =============================================================================
// Selection Line
// =============================================================================

/// One line of a selection, dispatched explicitly by variant - never
/// inferred from which fields happen to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionLine {
    /// Claim on one specific physical unit.
    Concrete {
        unit_id: String,
        product_id: String,
        /// SKU at time of adding (frozen).
        sku: String,
        /// Product name at time of adding (frozen).
        name: String,
        /// Unit price snapshot in cents.
        unit_price_cents: i64,
        added_at: DateTime<Utc>,
    },
    /// Claim on N interchangeable units of a product.
    Quantity {
        product_id: String,
        sku: String,
        name: String,
        unit_price_cents: i64,
        quantity: i64,
        /// Currently-available unit ids shown to the user; display only,
        /// never authoritative.
        display_units: Vec<String>,
        added_at: DateTime<Utc>,
    },
}

impl SelectionLine {
    pub fn key(&self) -> LineKey {
        match self {
            SelectionLine::Concrete { unit_id, .. } => LineKey::Unit(unit_id.clone()),
            SelectionLine::Quantity { product_id, .. } => LineKey::Product(product_id.clone()),
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            SelectionLine::Concrete { product_id, .. } => product_id,
            SelectionLine::Quantity { product_id, .. } => product_id,
        }
    }

    /// Units this line claims (1 for concrete lines).
    pub fn quantity(&self) -> i64 {
        match self {
            SelectionLine::Concrete { .. } => 1,
            SelectionLine::Quantity { quantity, .. } => *quantity,
        }
    }

    pub fn unit_price_cents(&self) -> i64 {
        match self {
            SelectionLine::Concrete {
                unit_price_cents, ..
            } => *unit_price_cents,
            SelectionLine::Quantity {
                unit_price_cents, ..
            } => *unit_price_cents,
        }
    }

    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents() * self.quantity()
    }

    /// Whether this line references the unit, either as its concrete claim
    /// or in its display pre-assignment.
    pub fn references_unit(&self, unit_id: &str) -> bool {
        match self {
            SelectionLine::Concrete { unit_id: id, .. } => id == unit_id,
            SelectionLine::Quantity { display_units, .. } => {
                display_units.iter().any(|id| id == unit_id)
            }
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// The session-scoped working set of claims.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Selection {
    lines: Vec<SelectionLine>,
    created_at: DateTime<Utc>,
}

impl Selection {
    pub fn new() -> Self {
        Selection {
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn lines(&self) -> &[SelectionLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Total units claimed across all lines.
    pub fn unit_count(&self) -> i64 {
        self.lines.iter().map(SelectionLine::quantity).sum()
    }

    pub fn get(&self, key: &LineKey) -> Option<&SelectionLine> {
        self.lines.iter().find(|l| &l.key() == key)
    }

    /// Whether any line references the unit (claim or display).
    pub fn references_unit(&self, unit_id: &str) -> bool {
        self.lines.iter().any(|l| l.references_unit(unit_id))
    }

    /// Units of this product claimed by the selection (concrete lines
    /// count 1 each; display pre-assignments are not claims).
    fn claimed_quantity(&self, product_id: &str) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.product_id() == product_id)
            .map(SelectionLine::quantity)
            .sum()
    }

    /// Adds a concrete claim on one stock unit.
    ///
    /// Conflicts if the selection already references the unit, or if the
    /// unit's live status (read by the caller just now) is not available.
    pub fn add_concrete(&mut self, unit: &StockUnit, product: &Product) -> Result<(), CoreError> {
        if self.references_unit(&unit.id) {
            return Err(ConflictError::AlreadyInSelection {
                unit_id: unit.id.clone(),
            }
            .into());
        }
        if !unit.is_available() {
            return Err(ConflictError::UnitNotAvailable {
                unit_id: unit.id.clone(),
                status: unit.status,
            }
            .into());
        }
        if self.lines.len() >= MAX_SELECTION_LINES {
            return Err(ValidationError::SelectionTooLarge {
                max: MAX_SELECTION_LINES,
            }
            .into());
        }

        self.lines.push(SelectionLine::Concrete {
            unit_id: unit.id.clone(),
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            unit_price_cents: unit.selling_price_cents,
            added_at: Utc::now(),
        });
        Ok(())
    }

    /// Grows (or creates) the product's quantity claim by `delta`.
    ///
    /// `available_units` is the live list of available unit ids for the
    /// product, read by the caller just now; its length is the live
    /// available count. Headroom is that count minus everything this
    /// selection already claims for the product.
    pub fn add_quantity(
        &mut self,
        product: &Product,
        delta: i64,
        available_units: &[String],
    ) -> Result<(), CoreError> {
        if delta <= 0 {
            return Err(ValidationError::NotPositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        let current = self
            .get(&LineKey::Product(product.id.clone()))
            .map(SelectionLine::quantity)
            .unwrap_or(0);
        self.grow_quantity(product, current, delta, available_units)
    }

    /// Sets the product's quantity claim to an absolute value.
    ///
    /// Zero removes the line; growth is re-validated against live headroom
    /// exactly like [`Selection::add_quantity`]; shrinking always succeeds.
    pub fn set_quantity(
        &mut self,
        product: &Product,
        new_quantity: i64,
        available_units: &[String],
    ) -> Result<(), CoreError> {
        let key = LineKey::Product(product.id.clone());

        if new_quantity == 0 {
            return match self.remove(&key) {
                Some(_) => Ok(()),
                None => Err(ValidationError::LineNotFound { key }.into()),
            };
        }
        if new_quantity < 0 {
            return Err(ValidationError::NotPositive {
                field: "quantity".to_string(),
            }
            .into());
        }

        let current = self.get(&key).map(SelectionLine::quantity).unwrap_or(0);
        self.grow_quantity(product, current, new_quantity - current, available_units)
    }

    /// Shared tail of the quantity mutations: validates the delta against
    /// headroom and the line caps, then rewrites the line and its display
    /// pre-assignment.
    fn grow_quantity(
        &mut self,
        product: &Product,
        current: i64,
        delta: i64,
        available_units: &[String],
    ) -> Result<(), CoreError> {
        let new_quantity = current + delta;

        if new_quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::QuantityTooLarge {
                requested: new_quantity,
                max: MAX_LINE_QUANTITY,
            }
            .into());
        }
        if delta > 0 {
            let available = available_units.len() as i64;
            let headroom = available - self.claimed_quantity(&product.id);
            if delta > headroom {
                return Err(ValidationError::InsufficientStock {
                    product_id: product.id.clone(),
                    available: headroom.max(0),
                    requested: delta,
                }
                .into());
            }
        }

        let key = LineKey::Product(product.id.clone());

        // Display pre-assignment: available units not referenced anywhere
        // else in the selection, sized to the new quantity.
        let referenced: HashSet<&str> = self
            .lines
            .iter()
            .filter(|l| l.key() != key)
            .flat_map(|l| match l {
                SelectionLine::Concrete { unit_id, .. } => vec![unit_id.as_str()],
                SelectionLine::Quantity { display_units, .. } => {
                    display_units.iter().map(String::as_str).collect()
                }
            })
            .collect();
        let display_units: Vec<String> = available_units
            .iter()
            .filter(|id| !referenced.contains(id.as_str()))
            .take(new_quantity as usize)
            .cloned()
            .collect();

        let existing = self.lines.iter_mut().find_map(|l| match l {
            SelectionLine::Quantity {
                product_id,
                quantity,
                display_units,
                ..
            } if *product_id == product.id => Some((quantity, display_units)),
            _ => None,
        });
        match existing {
            Some((quantity, display)) => {
                *quantity = new_quantity;
                *display = display_units;
            }
            None => {
                if self.lines.len() >= MAX_SELECTION_LINES {
                    return Err(ValidationError::SelectionTooLarge {
                        max: MAX_SELECTION_LINES,
                    }
                    .into());
                }
                self.lines.push(SelectionLine::Quantity {
                    product_id: product.id.clone(),
                    sku: product.sku.clone(),
                    name: product.name.clone(),
                    unit_price_cents: product.selling_price_cents,
                    quantity: new_quantity,
                    display_units,
                    added_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    /// Deletes a line unconditionally; returns it if it existed.
    pub fn remove(&mut self, key: &LineKey) -> Option<SelectionLine> {
        let pos = self.lines.iter().position(|l| &l.key() == key)?;
        Some(self.lines.remove(pos))
    }

    /// Empties the selection (after a committed checkout, or on demand).
    pub fn clear(&mut self) {
        self.lines.clear();
        self.created_at = Utc::now();
    }

    /// Totals, recomputed from current line data on every call - never
    /// cached, so a mutation can never leave them stale.
    pub fn totals(&self) -> SelectionTotals {
        SelectionTotals {
            line_count: self.line_count(),
            unit_count: self.unit_count(),
            subtotal_cents: self.lines.iter().map(SelectionLine::line_total_cents).sum(),
        }
    }
}

/// Selection totals summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionTotals {
    pub line_count: usize,
    pub unit_count: i64,
    pub subtotal_cents: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitStatus;

    fn test_product(id: &str, price_cents: i64) -> Product {
        Product {
            id: id.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            category: None,
            purchase_price_cents: Some(price_cents / 2),
            selling_price_cents: price_cents,
            wholesale_price_cents: price_cents * 3 / 4,
            min_stock: 0,
            serialized: false,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_unit(id: &str, product: &Product, status: UnitStatus) -> StockUnit {
        StockUnit {
            id: id.to_string(),
            product_id: product.id.clone(),
            barcode: Some(format!("BAR-{id}")),
            serial: None,
            status,
            batch: None,
            location: None,
            purchase_price_cents: product.purchase_price_cents,
            selling_price_cents: product.selling_price_cents,
            created_at: Utc::now(),
            created_by: "tester".to_string(),
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("u-{i}")).collect()
    }

    #[test]
    fn test_add_concrete() {
        let mut sel = Selection::new();
        let p = test_product("p1", 999);
        let u = test_unit("u-0", &p, UnitStatus::Available);

        sel.add_concrete(&u, &p).unwrap();

        assert_eq!(sel.line_count(), 1);
        assert_eq!(sel.unit_count(), 1);
        assert_eq!(sel.totals().subtotal_cents, 999);
    }

    #[test]
    fn test_add_concrete_twice_conflicts() {
        let mut sel = Selection::new();
        let p = test_product("p1", 999);
        let u = test_unit("u-0", &p, UnitStatus::Available);

        sel.add_concrete(&u, &p).unwrap();
        let err = sel.add_concrete(&u, &p).unwrap_err();

        assert!(matches!(
            err,
            CoreError::Conflict(ConflictError::AlreadyInSelection { .. })
        ));
        // still exactly one line for that unit
        assert_eq!(sel.line_count(), 1);
    }

    #[test]
    fn test_add_concrete_rejects_unavailable_unit() {
        let mut sel = Selection::new();
        let p = test_product("p1", 999);
        let u = test_unit("u-0", &p, UnitStatus::Sold);

        let err = sel.add_concrete(&u, &p).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(ConflictError::UnitNotAvailable {
                status: UnitStatus::Sold,
                ..
            })
        ));
        assert!(sel.is_empty());
    }

    #[test]
    fn test_add_quantity_headroom() {
        let mut sel = Selection::new();
        let p = test_product("p1", 500);
        let available = ids(3);

        // more than live availability fails
        let err = sel.add_quantity(&p, 4, &available).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InsufficientStock {
                available: 3,
                requested: 4,
                ..
            })
        ));
        assert!(sel.is_empty());

        // exactly the live availability succeeds
        sel.add_quantity(&p, 3, &available).unwrap();
        assert_eq!(sel.unit_count(), 3);
        assert_eq!(sel.totals().subtotal_cents, 1500);
    }

    #[test]
    fn test_add_quantity_increments_single_line() {
        let mut sel = Selection::new();
        let p = test_product("p1", 500);
        let available = ids(5);

        sel.add_quantity(&p, 2, &available).unwrap();
        sel.add_quantity(&p, 2, &available).unwrap();

        assert_eq!(sel.line_count(), 1);
        assert_eq!(sel.unit_count(), 4);

        // one unit of headroom left
        let err = sel.add_quantity(&p, 2, &available).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InsufficientStock {
                available: 1,
                requested: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_headroom_counts_concrete_claims() {
        let mut sel = Selection::new();
        let p = test_product("p1", 500);
        let u = test_unit("u-0", &p, UnitStatus::Available);
        let available = ids(3); // u-0, u-1, u-2

        sel.add_concrete(&u, &p).unwrap();

        // 3 available, 1 concretely claimed -> headroom 2
        assert!(sel.add_quantity(&p, 3, &available).is_err());
        sel.add_quantity(&p, 2, &available).unwrap();

        // display picks skip the concretely claimed unit
        match sel.get(&LineKey::Product(p.id.clone())).unwrap() {
            SelectionLine::Quantity { display_units, .. } => {
                assert_eq!(display_units, &vec!["u-1".to_string(), "u-2".to_string()]);
            }
            _ => panic!("expected quantity line"),
        }
    }

    #[test]
    fn test_set_quantity() {
        let mut sel = Selection::new();
        let p = test_product("p1", 500);
        let available = ids(5);

        // absent line is created
        sel.set_quantity(&p, 3, &available).unwrap();
        assert_eq!(sel.unit_count(), 3);

        // shrink always succeeds
        sel.set_quantity(&p, 1, &available).unwrap();
        assert_eq!(sel.unit_count(), 1);

        // growth re-validates headroom
        assert!(sel.set_quantity(&p, 6, &available).is_err());
        sel.set_quantity(&p, 5, &available).unwrap();

        // zero removes the line
        sel.set_quantity(&p, 0, &available).unwrap();
        assert!(sel.is_empty());

        // zero on an absent line reports it
        let err = sel.set_quantity(&p, 0, &available).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::LineNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_is_unconditional() {
        let mut sel = Selection::new();
        let p = test_product("p1", 500);

        sel.add_quantity(&p, 2, &ids(2)).unwrap();
        let key = LineKey::Product(p.id.clone());

        assert!(sel.remove(&key).is_some());
        assert!(sel.remove(&key).is_none());
        assert!(sel.is_empty());
    }

    #[test]
    fn test_totals_recomputed() {
        let mut sel = Selection::new();
        let p1 = test_product("p1", 500);
        let p2 = test_product("p2", 1000);

        sel.add_quantity(&p1, 2, &ids(5)).unwrap();
        let before = sel.totals();
        assert_eq!(before.subtotal_cents, 1000);

        sel.add_quantity(&p2, 1, &ids(5)).unwrap();
        let after = sel.totals();
        assert_eq!(after.subtotal_cents, 2000);
        assert_eq!(after.line_count, 2);
    }

    #[test]
    fn test_line_key_serde_round_trip() {
        let key = LineKey::Unit("u-42".to_string());
        let json = serde_json::to_string(&key).unwrap();
        let back: LineKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
        assert_eq!(key.to_string(), "unit:u-42");
        assert_eq!(LineKey::Product("p-1".to_string()).to_string(), "product:p-1");
    }
}
