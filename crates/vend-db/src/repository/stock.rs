//! # Stock Ledger Repository
//!
//! The authoritative table of physical units and their lifecycle status.
//!
//! Two write paths, nothing else mutates `stock_units`:
//!
//! - [`StockRepository::intake`] creates rows, all `available`, inside one
//!   transaction - a validation failure or constraint violation anywhere
//!   aborts the whole batch with no rows written;
//! - [`StockRepository::transition`] is the compare-and-set primitive:
//!   `UPDATE ... WHERE id = ? AND status = ?`. When two writers race for
//!   the same unit, `rows_affected` tells exactly one of them it lost.
//!
//! Everything else is read-only: availability counts feed selections and
//! reporting.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vend_core::codegen::{self, CodeGenerator};
use vend_core::error::{ConflictError, ValidationError};
use vend_core::types::{Product, StockUnit, UnitStatus};

use crate::error::{DbError, DbResult, StoreError, StoreResult};

const UNIT_COLUMNS: &str = "id, product_id, barcode, serial, status, batch, location, \
     purchase_price_cents, selling_price_cents, created_at, created_by";

/// Input for one intake batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRequest {
    /// Number of units received.
    pub quantity: i64,
    /// One serial per unit. Mandatory for serialized products; accepted
    /// for any product.
    pub serials: Option<Vec<String>>,
    /// Generate a scannable code for each unit.
    pub want_codes: bool,
    /// Intake batch label.
    pub batch: Option<String>,
    /// Physical location label.
    pub location: Option<String>,
    /// Acting user, for audit fields.
    pub created_by: String,
}

/// Repository for stock ledger operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
    codes: Arc<CodeGenerator>,
}

impl StockRepository {
    pub fn new(pool: SqlitePool, codes: Arc<CodeGenerator>) -> Self {
        StockRepository { pool, codes }
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Receives `quantity` units of a product into stock.
    ///
    /// Validation is collect-all and runs entirely before the first write;
    /// the returned list names every problem at once. On success every
    /// created unit is `available`, carries the product's price snapshot,
    /// and - when requested - a freshly generated scannable code.
    pub async fn intake(
        &self,
        product: &Product,
        req: IntakeRequest,
    ) -> StoreResult<Vec<StockUnit>> {
        let mut problems: Vec<ValidationError> = Vec::new();

        if req.quantity <= 0 {
            problems.push(ValidationError::NotPositive {
                field: "quantity".to_string(),
            });
        }
        if !product.is_active {
            problems.push(ValidationError::ProductInactive {
                sku: product.sku.clone(),
            });
        }

        let serials = self.validate_serials(product, &req, &mut problems).await?;

        if !problems.is_empty() {
            return Err(StoreError::Validation(problems));
        }

        let codes = if req.want_codes {
            Some(self.generate_codes(product, req.quantity as usize).await?)
        } else {
            None
        };

        let now = Utc::now();
        let mut units = Vec::with_capacity(req.quantity as usize);
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        for i in 0..req.quantity as usize {
            let unit = StockUnit {
                id: Uuid::new_v4().to_string(),
                product_id: product.id.clone(),
                barcode: codes.as_ref().map(|c| c[i].clone()),
                serial: serials.as_ref().map(|s| s[i].clone()),
                status: UnitStatus::Available,
                batch: req.batch.clone(),
                location: req.location.clone(),
                purchase_price_cents: product.purchase_price_cents,
                selling_price_cents: product.selling_price_cents,
                created_at: now,
                created_by: req.created_by.clone(),
            };

            // The UNIQUE indexes on barcode/serial are the final backstop;
            // a violation here rolls back the entire intake.
            sqlx::query(
                r#"
                INSERT INTO stock_units (
                    id, product_id, barcode, serial, status, batch, location,
                    purchase_price_cents, selling_price_cents, created_at, created_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&unit.id)
            .bind(&unit.product_id)
            .bind(&unit.barcode)
            .bind(&unit.serial)
            .bind(unit.status)
            .bind(&unit.batch)
            .bind(&unit.location)
            .bind(unit.purchase_price_cents)
            .bind(unit.selling_price_cents)
            .bind(unit.created_at)
            .bind(&unit.created_by)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

            units.push(unit);
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            sku = %product.sku,
            count = units.len(),
            with_codes = req.want_codes,
            "Stock intake committed"
        );
        Ok(units)
    }

    /// Serial validation half of intake: count, emptiness, duplicates
    /// within the request, and duplicates against live (available/sold)
    /// units already in the ledger.
    async fn validate_serials(
        &self,
        product: &Product,
        req: &IntakeRequest,
        problems: &mut Vec<ValidationError>,
    ) -> StoreResult<Option<Vec<String>>> {
        let list = match (&req.serials, product.serialized) {
            (None, false) => return Ok(None),
            (None, true) => {
                problems.push(ValidationError::SerialCountMismatch {
                    sku: product.sku.clone(),
                    expected: req.quantity,
                    got: 0,
                });
                return Ok(None);
            }
            (Some(list), _) => list,
        };

        let trimmed: Vec<String> = list.iter().map(|s| s.trim().to_string()).collect();

        if trimmed.len() as i64 != req.quantity {
            problems.push(ValidationError::SerialCountMismatch {
                sku: product.sku.clone(),
                expected: req.quantity,
                got: trimmed.len(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(trimmed.len());
        for (index, serial) in trimmed.iter().enumerate() {
            if serial.is_empty() {
                problems.push(ValidationError::SerialEmpty { index });
            } else if !seen.insert(serial.as_str()) {
                problems.push(ValidationError::DuplicateSerial {
                    serial: serial.clone(),
                });
            }
        }

        if !trimmed.is_empty() {
            for serial in self.serials_in_use(&trimmed).await? {
                problems.push(ValidationError::SerialInUse { serial });
            }
        }

        Ok(Some(trimmed))
    }

    /// Serials among `serials` already carried by an available or sold
    /// unit.
    async fn serials_in_use(&self, serials: &[String]) -> DbResult<Vec<String>> {
        let placeholders = vec!["?"; serials.len()].join(", ");
        let sql = format!(
            "SELECT serial FROM stock_units \
             WHERE status IN ('available', 'sold') AND serial IN ({placeholders})"
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for serial in serials {
            query = query.bind(serial);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Batch code generation: the collision closure checks codes already
    /// persisted under the same prefix, and the generator itself keeps the
    /// batch internally collision-free.
    async fn generate_codes(&self, product: &Product, count: usize) -> StoreResult<Vec<String>> {
        let prefix = codegen::seed_prefix(&product.sku);
        let persisted = self.barcodes_with_prefix(&prefix).await?;

        let codes = self
            .codes
            .generate_batch(count, Some(&product.sku), |c| persisted.contains(c));

        let fallbacks = codes.iter().filter(|c| !codegen::is_checksummed(c)).count();
        if fallbacks > 0 {
            warn!(
                sku = %product.sku,
                fallbacks,
                "Code generation exhausted retries; issued fallback codes"
            );
        }

        Ok(codes)
    }

    async fn barcodes_with_prefix(&self, prefix: &str) -> DbResult<HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT barcode FROM stock_units WHERE barcode LIKE ?1")
                .bind(format!("{prefix}%"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    // =========================================================================
    // Status Transition (compare-and-set)
    // =========================================================================

    /// Atomically moves a unit from `from` to `to`, only if its current
    /// status still equals `from`.
    ///
    /// Edges the state machine forbids are rejected up front; a lost race
    /// comes back as [`ConflictError::StatusLost`] with the status the
    /// other writer left behind.
    pub async fn transition(
        &self,
        unit_id: &str,
        from: UnitStatus,
        to: UnitStatus,
    ) -> StoreResult<()> {
        if !from.can_transition_to(to) {
            return Err(ValidationError::InvalidTransition { from, to }.into());
        }

        let result = sqlx::query("UPDATE stock_units SET status = ?3 WHERE id = ?1 AND status = ?2")
            .bind(unit_id)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return match self.get_unit(unit_id).await? {
                Some(unit) => Err(ConflictError::StatusLost {
                    unit_id: unit_id.to_string(),
                    expected: from,
                    actual: unit.status,
                }
                .into()),
                None => Err(ValidationError::UnitNotFound {
                    id: unit_id.to_string(),
                }
                .into()),
            };
        }

        debug!(unit_id = %unit_id, from = %from, to = %to, "Unit status transitioned");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Live count of available units for a product.
    pub async fn count_available(&self, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_units WHERE product_id = ?1 AND status = 'available'",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Ids of available units for a product, oldest first.
    pub async fn available_unit_ids(&self, product_id: &str) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM stock_units \
             WHERE product_id = ?1 AND status = 'available' \
             ORDER BY created_at, id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Gets a unit by its ID.
    pub async fn get_unit(&self, id: &str) -> DbResult<Option<StockUnit>> {
        let unit = sqlx::query_as::<_, StockUnit>(&format!(
            "SELECT {UNIT_COLUMNS} FROM stock_units WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }

    /// Gets a unit by its scannable code (the scanner entry point).
    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<StockUnit>> {
        let unit = sqlx::query_as::<_, StockUnit>(&format!(
            "SELECT {UNIT_COLUMNS} FROM stock_units WHERE barcode = ?1"
        ))
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::NewProduct;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed_product(db: &Database, sku: &str, serialized: bool) -> Product {
        db.products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                category: None,
                purchase_price_cents: Some(10_000),
                selling_price_cents: 19_900,
                wholesale_price_cents: 15_000,
                min_stock: 1,
                serialized,
            })
            .await
            .unwrap()
    }

    fn plain_intake(quantity: i64) -> IntakeRequest {
        IntakeRequest {
            quantity,
            serials: None,
            want_codes: true,
            batch: Some("B-1".to_string()),
            location: None,
            created_by: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn test_intake_creates_available_units_with_codes() {
        let db = test_db().await;
        let product = seed_product(&db, "CASE-CLR", false).await;

        let units = db.stock().intake(&product, plain_intake(3)).await.unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 3);

        let codes: HashSet<String> = units.iter().filter_map(|u| u.barcode.clone()).collect();
        assert_eq!(codes.len(), 3);
        for code in &codes {
            assert!(code.starts_with("CASE"));
            assert!(codegen::is_checksummed(code));
        }

        // price snapshots taken from the product
        assert!(units.iter().all(|u| u.selling_price_cents == 19_900));

        // scanner lookup round-trips
        let scanned = db
            .stock()
            .get_by_barcode(units[0].barcode.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scanned.id, units[0].id);
    }

    #[tokio::test]
    async fn test_intake_rejects_non_positive_quantity() {
        let db = test_db().await;
        let product = seed_product(&db, "CASE-0", false).await;

        let err = db.stock().intake(&product, plain_intake(0)).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_serialized_intake_requires_serials() {
        let db = test_db().await;
        let product = seed_product(&db, "PHONE-S", true).await;

        match db.stock().intake(&product, plain_intake(2)).await {
            Err(StoreError::Validation(problems)) => {
                assert!(problems
                    .iter()
                    .any(|p| matches!(p, ValidationError::SerialCountMismatch { .. })));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_serial_aborts_whole_intake() {
        let db = test_db().await;
        let product = seed_product(&db, "PHONE-D", true).await;

        let req = IntakeRequest {
            serials: Some(vec!["A".to_string(), "A".to_string()]),
            ..plain_intake(2)
        };

        match db.stock().intake(&product, req).await {
            Err(StoreError::Validation(problems)) => {
                assert!(problems
                    .iter()
                    .any(|p| matches!(p, ValidationError::DuplicateSerial { serial } if serial == "A")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        // zero units created
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_serial_already_in_ledger_rejected_before_write() {
        let db = test_db().await;
        let product = seed_product(&db, "PHONE-L", true).await;

        let first = IntakeRequest {
            serials: Some(vec!["IMEI-1".to_string()]),
            ..plain_intake(1)
        };
        db.stock().intake(&product, first).await.unwrap();

        let second = IntakeRequest {
            serials: Some(vec!["IMEI-1".to_string()]),
            ..plain_intake(1)
        };
        match db.stock().intake(&product, second).await {
            Err(StoreError::Validation(problems)) => {
                assert!(problems
                    .iter()
                    .any(|p| matches!(p, ValidationError::SerialInUse { serial } if serial == "IMEI-1")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_compare_and_set() {
        let db = test_db().await;
        let product = seed_product(&db, "CAS-1", false).await;
        let units = db.stock().intake(&product, plain_intake(1)).await.unwrap();
        let unit_id = units[0].id.clone();

        db.stock()
            .transition(&unit_id, UnitStatus::Available, UnitStatus::Sold)
            .await
            .unwrap();

        // second attempt loses the race it already lost
        match db
            .stock()
            .transition(&unit_id, UnitStatus::Available, UnitStatus::Used)
            .await
        {
            Err(StoreError::Conflict(ConflictError::StatusLost { actual, .. })) => {
                assert_eq!(actual, UnitStatus::Sold);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        // forbidden edges rejected without touching the row
        assert!(matches!(
            db.stock()
                .transition(&unit_id, UnitStatus::Sold, UnitStatus::Used)
                .await,
            Err(StoreError::Validation(_))
        ));

        // unknown unit
        assert!(matches!(
            db.stock()
                .transition("missing", UnitStatus::Available, UnitStatus::Sold)
                .await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_intakes_yield_distinct_codes() {
        let db = test_db().await;
        let product = seed_product(&db, "BULK-1", false).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let db = db.clone();
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                db.stock().intake(&product, plain_intake(10)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(db.stock().count_available(&product.id).await.unwrap(), 200);

        let distinct: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT barcode) FROM stock_units")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(distinct, 200);
    }
}
