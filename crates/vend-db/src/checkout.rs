//! # Checkout Transaction
//!
//! Turns a session's [`Selection`] into one committed sale.
//!
//! ```text
//! Phase 1 - VALIDATE (no writes)
//!   every line re-read against the live ledger; violations collected,
//!   not fail-fast; any violation aborts with the full list and the
//!   selection untouched
//!
//! Phase 2 - COMMIT (one transaction)
//!   invoice number <- bump most recently issued
//!   sale header    <- totals from the line data just validated
//!   per line       <- claim unit(s) available->sold via compare-and-set,
//!                     one sale line per claimed unit
//!   payment        <- full total, unless the method defers settlement
//! ```
//!
//! Phase 1 exists for friendly error reporting; the actual guarantee comes
//! from the compare-and-sets in phase 2. Another commit can still
//! interleave between the phases - when it does, the losing compare-and-set
//! rolls the whole transaction back: no sale row, no status change, no
//! payment. On success the selection is cleared.
//!
//! Quantity claims pick their units fresh at commit time; the display
//! pre-assignment made while selecting is ignored here.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use vend_core::cart::{Selection, SelectionLine};
use vend_core::error::{ConflictError, LineViolation, ValidationError};
use vend_core::money::Money;
use vend_core::types::{
    Payment, PaymentMethod, PaymentStatus, Sale, SaleLine, TaxRate, UnitStatus,
};

use crate::error::{DbError, StoreError, StoreResult};
use crate::pool::Database;
use crate::repository::sale::{bump_invoice, FIRST_INVOICE};

// =============================================================================
// Input / Output
// =============================================================================

/// Header input for a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutInput {
    pub payment_method: PaymentMethod,
    /// Whole-sale discount in cents, subtracted before tax.
    pub discount_cents: i64,
    /// Tax applied to the discounted subtotal.
    pub tax_rate: TaxRate,
    pub note: Option<String>,
    /// External payment reference (terminal auth code, transfer id).
    pub reference: Option<String>,
    /// Acting user, for audit fields.
    pub created_by: String,
}

/// Everything a successful checkout wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedSale {
    pub sale: Sale,
    pub lines: Vec<SaleLine>,
    pub payments: Vec<Payment>,
}

// =============================================================================
// Checkout
// =============================================================================

/// Validates `selection` against the live ledger and commits it as a sale.
///
/// On [`StoreError::Rejected`] the selection is left unchanged so the
/// caller can drop the offending lines and retry; on success it is
/// cleared.
pub async fn checkout(
    db: &Database,
    selection: &mut Selection,
    input: CheckoutInput,
) -> StoreResult<CompletedSale> {
    if selection.is_empty() {
        return Err(ValidationError::EmptySelection.into());
    }
    if input.discount_cents < 0 {
        return Err(ValidationError::Negative {
            field: "discount".to_string(),
        }
        .into());
    }

    let totals = selection.totals();
    if input.discount_cents > totals.subtotal_cents {
        return Err(ValidationError::Negative {
            field: "total".to_string(),
        }
        .into());
    }

    validate_lines(db, selection).await?;
    let completed = commit(db, selection, &input, totals.subtotal_cents).await?;

    selection.clear();
    info!(
        invoice_no = %completed.sale.invoice_no,
        total_cents = completed.sale.total_cents,
        lines = completed.lines.len(),
        "Checkout committed"
    );
    Ok(completed)
}

/// Phase 1: re-read every line against the live ledger, collecting all
/// violations. No writes.
async fn validate_lines(db: &Database, selection: &Selection) -> StoreResult<()> {
    let stock = db.stock();
    let mut violations: Vec<LineViolation> = Vec::new();

    for line in selection.lines() {
        match line {
            SelectionLine::Concrete { unit_id, .. } => match stock.get_unit(unit_id).await? {
                None => violations.push(LineViolation::new(
                    line.key(),
                    ValidationError::UnitNotFound {
                        id: unit_id.clone(),
                    },
                )),
                Some(unit) if !unit.is_available() => violations.push(LineViolation::new(
                    line.key(),
                    ConflictError::UnitNotAvailable {
                        unit_id: unit_id.clone(),
                        status: unit.status,
                    },
                )),
                Some(_) => {}
            },
            SelectionLine::Quantity {
                product_id,
                quantity,
                ..
            } => {
                // fresh count; the selection's own display pre-assignment
                // is deliberately not consulted
                let available = stock.count_available(product_id).await?;
                if available < *quantity {
                    violations.push(LineViolation::new(
                        line.key(),
                        ValidationError::InsufficientStock {
                            product_id: product_id.clone(),
                            available,
                            requested: *quantity,
                        },
                    ));
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        debug!(count = violations.len(), "Checkout validation collected violations");
        Err(StoreError::Rejected(violations))
    }
}

/// Phase 2: the commit pass. One transaction; every early return rolls it
/// back in full.
async fn commit(
    db: &Database,
    selection: &Selection,
    input: &CheckoutInput,
    subtotal_cents: i64,
) -> StoreResult<CompletedSale> {
    let subtotal = Money::from_cents(subtotal_cents);
    let discount = Money::from_cents(input.discount_cents);
    let taxable = subtotal - discount;
    let tax = taxable.calculate_tax(input.tax_rate);
    let total = taxable + tax;

    let payment_status = if input.payment_method.is_deferred() {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Paid
    };
    let now = Utc::now();

    let mut tx = db.pool().begin().await.map_err(DbError::from)?;

    let last: Option<String> =
        sqlx::query_scalar("SELECT invoice_no FROM sales ORDER BY rowid DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::from)?;
    let invoice_no = match last {
        Some(no) => bump_invoice(&no),
        None => FIRST_INVOICE.to_string(),
    };

    let sale = Sale {
        id: Uuid::new_v4().to_string(),
        invoice_no,
        subtotal_cents: subtotal.cents(),
        discount_cents: discount.cents(),
        tax_cents: tax.cents(),
        total_cents: total.cents(),
        payment_status,
        payment_method: input.payment_method,
        note: input.note.clone(),
        created_by: input.created_by.clone(),
        created_at: now,
    };
    insert_sale(&mut tx, &sale).await?;

    let mut lines: Vec<SaleLine> = Vec::new();
    for line in selection.lines() {
        match line {
            SelectionLine::Concrete {
                unit_id,
                product_id,
                sku,
                name,
                unit_price_cents,
                ..
            } => {
                if !claim_unit(&mut tx, unit_id).await? {
                    return Err(lost_claim(db, tx, unit_id).await?);
                }
                let sale_line = new_line(
                    &sale,
                    product_id,
                    Some(unit_id.clone()),
                    sku,
                    name,
                    *unit_price_cents,
                    lines.len() as i64,
                );
                insert_line(&mut tx, &sale_line).await?;
                lines.push(sale_line);
            }
            SelectionLine::Quantity {
                product_id,
                quantity,
                sku,
                name,
                unit_price_cents,
                ..
            } => {
                // pick concrete units now, at commit time
                let picked: Vec<String> = sqlx::query_scalar(
                    "SELECT id FROM stock_units \
                     WHERE product_id = ?1 AND status = 'available' \
                     ORDER BY created_at, id LIMIT ?2",
                )
                .bind(product_id)
                .bind(*quantity)
                .fetch_all(&mut *tx)
                .await
                .map_err(DbError::from)?;

                if (picked.len() as i64) < *quantity {
                    let available = picked.len() as i64;
                    tx.rollback().await.map_err(DbError::from)?;
                    return Err(ConflictError::StockDrained {
                        product_id: product_id.clone(),
                        requested: *quantity,
                        available,
                    }
                    .into());
                }

                for unit_id in picked {
                    if !claim_unit(&mut tx, &unit_id).await? {
                        return Err(lost_claim(db, tx, &unit_id).await?);
                    }
                    let sale_line = new_line(
                        &sale,
                        product_id,
                        Some(unit_id),
                        sku,
                        name,
                        *unit_price_cents,
                        lines.len() as i64,
                    );
                    insert_line(&mut tx, &sale_line).await?;
                    lines.push(sale_line);
                }
            }
        }
    }

    let mut payments: Vec<Payment> = Vec::new();
    if !input.payment_method.is_deferred() {
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            sale_id: sale.id.clone(),
            method: input.payment_method,
            amount_cents: total.cents(),
            reference: input.reference.clone(),
            created_at: now,
        };
        insert_payment(&mut tx, &payment).await?;
        payments.push(payment);
    }

    tx.commit().await.map_err(DbError::from)?;

    Ok(CompletedSale {
        sale,
        lines,
        payments,
    })
}

// =============================================================================
// Commit Helpers
// =============================================================================

/// The compare-and-set claim: exactly one concurrent commit can move a
/// unit out of `available`.
async fn claim_unit(tx: &mut Transaction<'_, Sqlite>, unit_id: &str) -> Result<bool, DbError> {
    let result =
        sqlx::query("UPDATE stock_units SET status = 'sold' WHERE id = ?1 AND status = 'available'")
            .bind(unit_id)
            .execute(&mut **tx)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// A claim lost its race: roll everything back and report what the other
/// writer left behind.
async fn lost_claim(
    db: &Database,
    tx: Transaction<'_, Sqlite>,
    unit_id: &str,
) -> Result<StoreError, StoreError> {
    tx.rollback().await.map_err(DbError::from)?;

    Ok(match db.stock().get_unit(unit_id).await? {
        Some(unit) => ConflictError::StatusLost {
            unit_id: unit_id.to_string(),
            expected: UnitStatus::Available,
            actual: unit.status,
        }
        .into(),
        None => ValidationError::UnitNotFound {
            id: unit_id.to_string(),
        }
        .into(),
    })
}

fn new_line(
    sale: &Sale,
    product_id: &str,
    stock_unit_id: Option<String>,
    sku: &str,
    name: &str,
    unit_price_cents: i64,
    position: i64,
) -> SaleLine {
    SaleLine {
        id: Uuid::new_v4().to_string(),
        sale_id: sale.id.clone(),
        product_id: product_id.to_string(),
        stock_unit_id,
        sku_snapshot: sku.to_string(),
        name_snapshot: name.to_string(),
        quantity: 1,
        unit_price_cents,
        line_total_cents: unit_price_cents,
        position,
        created_at: sale.created_at,
    }
}

async fn insert_sale(tx: &mut Transaction<'_, Sqlite>, sale: &Sale) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO sales (
            id, invoice_no, subtotal_cents, discount_cents, tax_cents,
            total_cents, payment_status, payment_method, note, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&sale.id)
    .bind(&sale.invoice_no)
    .bind(sale.subtotal_cents)
    .bind(sale.discount_cents)
    .bind(sale.tax_cents)
    .bind(sale.total_cents)
    .bind(sale.payment_status)
    .bind(sale.payment_method)
    .bind(&sale.note)
    .bind(&sale.created_by)
    .bind(sale.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_line(tx: &mut Transaction<'_, Sqlite>, line: &SaleLine) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO sale_lines (
            id, sale_id, product_id, stock_unit_id, sku_snapshot, name_snapshot,
            quantity, unit_price_cents, line_total_cents, position, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&line.id)
    .bind(&line.sale_id)
    .bind(&line.product_id)
    .bind(&line.stock_unit_id)
    .bind(&line.sku_snapshot)
    .bind(&line.name_snapshot)
    .bind(line.quantity)
    .bind(line.unit_price_cents)
    .bind(line.line_total_cents)
    .bind(line.position)
    .bind(line.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_payment(
    tx: &mut Transaction<'_, Sqlite>,
    payment: &Payment,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO payments (id, sale_id, method, amount_cents, reference, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.sale_id)
    .bind(payment.method)
    .bind(payment.amount_cents)
    .bind(&payment.reference)
    .bind(payment.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::NewProduct;
    use crate::repository::stock::IntakeRequest;
    use crate::selection::SelectionService;
    use vend_core::types::Product;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed_product(db: &Database, sku: &str, serialized: bool, price: i64) -> Product {
        db.products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                category: None,
                purchase_price_cents: None,
                selling_price_cents: price,
                wholesale_price_cents: price,
                min_stock: 0,
                serialized,
            })
            .await
            .unwrap()
    }

    async fn intake(db: &Database, product: &Product, quantity: i64, serials: Option<Vec<&str>>) {
        db.stock()
            .intake(
                product,
                IntakeRequest {
                    quantity,
                    serials: serials.map(|s| s.iter().map(|x| x.to_string()).collect()),
                    want_codes: true,
                    batch: None,
                    location: None,
                    created_by: "tester".to_string(),
                },
            )
            .await
            .unwrap();
    }

    fn cash() -> CheckoutInput {
        CheckoutInput {
            payment_method: PaymentMethod::Cash,
            discount_cents: 0,
            tax_rate: TaxRate::zero(),
            note: None,
            reference: None,
            created_by: "tester".to_string(),
        }
    }

    async fn sale_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_quantity_claim_checkout_flow() {
        let db = test_db().await;
        let product = seed_product(&db, "CBL-USBC", false, 1_500).await;
        intake(&db, &product, 3, None).await;

        let service = SelectionService::new(db.clone());
        let mut selection = Selection::new();
        service
            .add_quantity(&mut selection, &product.id, 2)
            .await
            .unwrap();

        let completed = checkout(&db, &mut selection, cash()).await.unwrap();

        assert_eq!(completed.sale.invoice_no, "INV-000001");
        assert_eq!(completed.sale.subtotal_cents, 3_000);
        assert_eq!(completed.sale.total_cents, 3_000);
        assert_eq!(completed.sale.payment_status, PaymentStatus::Paid);

        // one line per claimed unit, quantity 1, bound to a real unit
        assert_eq!(completed.lines.len(), 2);
        for line in &completed.lines {
            assert_eq!(line.quantity, 1);
            let unit_id = line.stock_unit_id.as_deref().unwrap();
            let unit = db.stock().get_unit(unit_id).await.unwrap().unwrap();
            assert_eq!(unit.status, UnitStatus::Sold);
        }
        assert_eq!(
            completed.sale.total_cents,
            completed.lines.iter().map(|l| l.line_total_cents).sum::<i64>()
        );

        // payment recorded in full
        assert_eq!(completed.payments.len(), 1);
        assert_eq!(completed.payments[0].amount_cents, 3_000);

        // ledger: 2 sold, 1 still available; selection cleared
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 1);
        assert!(selection.is_empty());

        // read side sees the same picture
        let sale = db
            .sales()
            .get_by_id(&completed.sale.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sale.total_cents, 3_000);
        assert_eq!(db.sales().get_lines(&sale.id).await.unwrap().len(), 2);
        assert_eq!(db.sales().total_paid(&sale.id).await.unwrap(), 3_000);

        // the shelf is now one unit short
        let err = service.add_quantity(&mut selection, &product.id, 2).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concrete_claim_checkout() {
        let db = test_db().await;
        let product = seed_product(&db, "PHN-A34", true, 29_900).await;
        intake(&db, &product, 2, Some(vec!["IMEI-A", "IMEI-B"])).await;

        let unit_ids = db.stock().available_unit_ids(&product.id).await.unwrap();
        let service = SelectionService::new(db.clone());
        let mut selection = Selection::new();
        service
            .add_concrete(&mut selection, &unit_ids[0])
            .await
            .unwrap();

        let completed = checkout(&db, &mut selection, cash()).await.unwrap();

        assert_eq!(completed.lines.len(), 1);
        assert_eq!(
            completed.lines[0].stock_unit_id.as_deref(),
            Some(unit_ids[0].as_str())
        );

        // exactly the claimed unit changed status
        let sold = db.stock().get_unit(&unit_ids[0]).await.unwrap().unwrap();
        assert_eq!(sold.status, UnitStatus::Sold);
        let other = db.stock().get_unit(&unit_ids[1]).await.unwrap().unwrap();
        assert_eq!(other.status, UnitStatus::Available);
    }

    #[tokio::test]
    async fn test_stale_selection_rejected_with_no_trace() {
        let db = test_db().await;
        let product = seed_product(&db, "TAB-11", false, 45_000).await;
        intake(&db, &product, 1, None).await;

        let unit_ids = db.stock().available_unit_ids(&product.id).await.unwrap();
        let service = SelectionService::new(db.clone());
        let mut selection = Selection::new();
        service
            .add_concrete(&mut selection, &unit_ids[0])
            .await
            .unwrap();

        // unit written off between selection and checkout
        db.stock()
            .transition(&unit_ids[0], UnitStatus::Available, UnitStatus::Damaged)
            .await
            .unwrap();

        match checkout(&db, &mut selection, cash()).await {
            Err(StoreError::Rejected(violations)) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].key.to_string(), format!("unit:{}", unit_ids[0]));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // no sale, no payment, selection intact for the caller to fix up
        assert_eq!(sale_count(&db).await, 0);
        assert_eq!(selection.line_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_selection_rejected() {
        let db = test_db().await;
        let mut selection = Selection::new();

        assert!(matches!(
            checkout(&db, &mut selection, cash()).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_deferred_payment_records_no_payment() {
        let db = test_db().await;
        let product = seed_product(&db, "SPK-BT", false, 8_000).await;
        intake(&db, &product, 1, None).await;

        let service = SelectionService::new(db.clone());
        let mut selection = Selection::new();
        service
            .add_quantity(&mut selection, &product.id, 1)
            .await
            .unwrap();

        let input = CheckoutInput {
            payment_method: PaymentMethod::OnAccount,
            ..cash()
        };
        let completed = checkout(&db, &mut selection, input).await.unwrap();

        assert_eq!(completed.sale.payment_status, PaymentStatus::Pending);
        assert!(completed.payments.is_empty());
        assert!(db
            .sales()
            .get_payments(&completed.sale.id)
            .await
            .unwrap()
            .is_empty());

        // the unit still left the shelf
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discount_and_tax_math() {
        let db = test_db().await;
        let product = seed_product(&db, "WTC-9", false, 10_000).await;
        intake(&db, &product, 1, None).await;

        let service = SelectionService::new(db.clone());
        let mut selection = Selection::new();
        service
            .add_quantity(&mut selection, &product.id, 1)
            .await
            .unwrap();

        let input = CheckoutInput {
            discount_cents: 1_000,
            tax_rate: TaxRate::from_bps(825),
            ..cash()
        };
        let completed = checkout(&db, &mut selection, input).await.unwrap();

        assert_eq!(completed.sale.subtotal_cents, 10_000);
        assert_eq!(completed.sale.discount_cents, 1_000);
        // 8.25% of 9000 = 742.5 -> 743
        assert_eq!(completed.sale.tax_cents, 743);
        assert_eq!(completed.sale.total_cents, 9_743);
        assert_eq!(completed.payments[0].amount_cents, 9_743);
    }

    #[tokio::test]
    async fn test_invoice_numbers_increment() {
        let db = test_db().await;
        let product = seed_product(&db, "ADP-30W", false, 2_000).await;
        intake(&db, &product, 2, None).await;

        let service = SelectionService::new(db.clone());

        for expected in ["INV-000001", "INV-000002"] {
            let mut selection = Selection::new();
            service
                .add_quantity(&mut selection, &product.id, 1)
                .await
                .unwrap();
            let completed = checkout(&db, &mut selection, cash()).await.unwrap();
            assert_eq!(completed.sale.invoice_no, expected);
        }
    }

    #[tokio::test]
    async fn test_racing_checkouts_yield_one_winner() {
        let db = test_db().await;
        let product = seed_product(&db, "CAM-X", false, 99_000).await;
        intake(&db, &product, 1, None).await;

        let unit_ids = db.stock().available_unit_ids(&product.id).await.unwrap();
        let service = SelectionService::new(db.clone());

        // two sessions, each claiming the same single unit
        let mut first = Selection::new();
        let mut second = Selection::new();
        service.add_concrete(&mut first, &unit_ids[0]).await.unwrap();
        service.add_concrete(&mut second, &unit_ids[0]).await.unwrap();

        let (a, b) = tokio::join!(
            checkout(&db, &mut first, cash()),
            checkout(&db, &mut second, cash())
        );

        let wins = [a.is_ok(), b.is_ok()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1, "exactly one checkout may claim the unit");

        assert_eq!(sale_count(&db).await, 1);
        let unit = db.stock().get_unit(&unit_ids[0]).await.unwrap().unwrap();
        assert_eq!(unit.status, UnitStatus::Sold);
    }
}
