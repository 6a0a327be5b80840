//! # Selection Service
//!
//! Feeds live ledger reads into a [`Selection`]: each mutation re-reads
//! what it needs (unit status, availability) and hands it to the pure
//! aggregate, which does the actual bookkeeping. The service never writes
//! to the ledger - selections only claim, checkout commits.
//!
//! A `Selection` belongs to one session; the caller owns it and passes it
//! in by `&mut`. Where the caller keeps it between requests (memory,
//! session store) is its own business.

use tracing::debug;

use vend_core::cart::Selection;
use vend_core::error::ValidationError;
use vend_core::types::Product;

use crate::error::{StoreError, StoreResult};
use crate::pool::Database;

/// Ledger-aware operations on a session's selection.
#[derive(Debug, Clone)]
pub struct SelectionService {
    db: Database,
}

impl SelectionService {
    pub fn new(db: Database) -> Self {
        SelectionService { db }
    }

    /// Claims one specific unit (scanned barcode path resolves to a unit
    /// id before this).
    pub async fn add_concrete(&self, selection: &mut Selection, unit_id: &str) -> StoreResult<()> {
        let unit = self
            .db
            .stock()
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| {
                StoreError::from(ValidationError::UnitNotFound {
                    id: unit_id.to_string(),
                })
            })?;
        let product = self.active_product(&unit.product_id).await?;

        selection.add_concrete(&unit, &product)?;
        debug!(unit_id = %unit_id, sku = %product.sku, "Concrete claim added");
        Ok(())
    }

    /// Grows the product's quantity claim by `delta` against live
    /// availability.
    pub async fn add_quantity(
        &self,
        selection: &mut Selection,
        product_id: &str,
        delta: i64,
    ) -> StoreResult<()> {
        let product = self.active_product(product_id).await?;
        let available = self.db.stock().available_unit_ids(product_id).await?;

        selection.add_quantity(&product, delta, &available)?;
        debug!(sku = %product.sku, delta, "Quantity claim grown");
        Ok(())
    }

    /// Sets the product's quantity claim to an absolute value (zero
    /// removes the line).
    pub async fn set_quantity(
        &self,
        selection: &mut Selection,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()> {
        let product = self.active_product(product_id).await?;
        let available = self.db.stock().available_unit_ids(product_id).await?;

        selection.set_quantity(&product, quantity, &available)?;
        debug!(sku = %product.sku, quantity, "Quantity claim set");
        Ok(())
    }

    async fn active_product(&self, product_id: &str) -> StoreResult<Product> {
        let product = self
            .db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| {
                StoreError::from(ValidationError::ProductNotFound {
                    id: product_id.to_string(),
                })
            })?;
        if !product.is_active {
            return Err(ValidationError::ProductInactive {
                sku: product.sku.clone(),
            }
            .into());
        }
        Ok(product)
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
    use crate::repository::stock::IntakeRequest;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed(db: &Database, sku: &str, quantity: i64) -> Product {
        let product = db
            .products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                category: None,
                purchase_price_cents: None,
                selling_price_cents: 2_500,
                wholesale_price_cents: 2_000,
                min_stock: 0,
                serialized: false,
            })
            .await
            .unwrap();
        if quantity > 0 {
            db.stock()
                .intake(
                    &product,
                    IntakeRequest {
                        quantity,
                        serials: None,
                        want_codes: false,
                        batch: None,
                        location: None,
                        created_by: "tester".to_string(),
                    },
                )
                .await
                .unwrap();
        }
        product
    }

    #[tokio::test]
    async fn test_add_quantity_tracks_ledger() {
        let db = test_db().await;
        let product = seed(&db, "SVC-1", 2).await;
        let service = SelectionService::new(db);
        let mut selection = Selection::new();

        // more than the ledger has
        assert!(matches!(
            service.add_quantity(&mut selection, &product.id, 3).await,
            Err(StoreError::Validation(_))
        ));

        service
            .add_quantity(&mut selection, &product.id, 2)
            .await
            .unwrap();
        assert_eq!(selection.unit_count(), 2);
    }

    #[tokio::test]
    async fn test_add_concrete_unknown_unit() {
        let db = test_db().await;
        seed(&db, "SVC-2", 1).await;
        let service = SelectionService::new(db);
        let mut selection = Selection::new();

        assert!(matches!(
            service.add_concrete(&mut selection, "missing").await,
            Err(StoreError::Validation(_))
        ));
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_product_rejected() {
        let db = test_db().await;
        let product = seed(&db, "SVC-3", 1).await;
        db.products().deactivate(&product.id).await.unwrap();

        let service = SelectionService::new(db);
        let mut selection = Selection::new();

        assert!(matches!(
            service.add_quantity(&mut selection, &product.id, 1).await,
            Err(StoreError::Validation(_))
        ));
    }
}
