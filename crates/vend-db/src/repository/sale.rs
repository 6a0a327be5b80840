//! # Sale Repository
//!
//! Read side of committed sales. Sales are only ever written by the
//! checkout transaction (`crate::checkout`); there is no draft lifecycle
//! and no edit path - a sale either exists completely or not at all.

use sqlx::SqlitePool;

use vend_core::types::{Payment, Sale, SaleLine};

use crate::error::DbResult;

const SALE_COLUMNS: &str = "id, invoice_no, subtotal_cents, discount_cents, tax_cents, \
     total_cents, payment_status, payment_method, note, created_by, created_at";

/// First invoice number issued on an empty ledger.
pub const FIRST_INVOICE: &str = "INV-000001";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets a sale by invoice number.
    pub async fn get_by_invoice_no(&self, invoice_no: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE invoice_no = ?1"
        ))
        .bind(invoice_no)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Lines of a sale, in selection order.
    pub async fn get_lines(&self, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let lines = sqlx::query_as::<_, SaleLine>(
            "SELECT id, sale_id, product_id, stock_unit_id, sku_snapshot, name_snapshot, \
                    quantity, unit_price_cents, line_total_cents, position, created_at \
             FROM sale_lines WHERE sale_id = ?1 ORDER BY position",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Payments recorded against a sale.
    pub async fn get_payments(&self, sale_id: &str) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT id, sale_id, method, amount_cents, reference, created_at \
             FROM payments WHERE sale_id = ?1 ORDER BY created_at",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Total amount paid towards a sale.
    pub async fn total_paid(&self, sale_id: &str) -> DbResult<i64> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT SUM(amount_cents) FROM payments WHERE sale_id = ?1")
                .bind(sale_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total.unwrap_or(0))
    }
}

/// Next invoice number after `last`: the trailing digit run is incremented
/// keeping its width (a 6-digit run is appended when there is none).
/// Issued inside the checkout transaction; gaps from rolled-back commits
/// are tolerated.
pub fn bump_invoice(last: &str) -> String {
    let digits_len = last.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    let (head, digits) = last.split_at(last.len() - digits_len);

    let next = digits.parse::<u64>().unwrap_or(0) + 1;
    let width = if digits.is_empty() { 6 } else { digits.len() };
    format!("{head}{next:0width$}")
}

// =============================================================================
// Unit Tests
// =============================================================================
