//! # Product Repository
//!
//! Catalog operations. Products are soft-deleted (`is_active = 0`) because
//! historical sales and ledger rows keep referencing them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use vend_core::error::ValidationError;
use vend_core::types::Product;
use vend_core::validation::{validate_price_cents, validate_product_name, validate_sku};

use crate::error::{DbError, DbResult, StoreError, StoreResult};

const PRODUCT_COLUMNS: &str = "id, sku, name, category, purchase_price_cents, \
     selling_price_cents, wholesale_price_cents, min_stock, serialized, \
     is_active, created_at, updated_at";

/// Input for creating a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub purchase_price_cents: Option<i64>,
    pub selling_price_cents: i64,
    pub wholesale_price_cents: i64,
    pub min_stock: i64,
    pub serialized: bool,
}

/// Repository for catalog database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product.
    ///
    /// Field validation is collect-all: every problem with the input comes
    /// back in one `StoreError::Validation`. A duplicate SKU surfaces as
    /// the schema's UNIQUE violation.
    pub async fn create(&self, input: NewProduct) -> StoreResult<Product> {
        let mut problems: Vec<ValidationError> = Vec::new();

        if let Err(e) = validate_sku(&input.sku) {
            problems.push(e);
        }
        if let Err(e) = validate_product_name(&input.name) {
            problems.push(e);
        }
        if let Err(e) = validate_price_cents("selling_price", input.selling_price_cents) {
            problems.push(e);
        }
        if let Err(e) = validate_price_cents("wholesale_price", input.wholesale_price_cents) {
            problems.push(e);
        }
        if let Some(purchase) = input.purchase_price_cents {
            if let Err(e) = validate_price_cents("purchase_price", purchase) {
                problems.push(e);
            }
        }
        if input.min_stock < 0 {
            problems.push(ValidationError::Negative {
                field: "min_stock".to_string(),
            });
        }
        if !problems.is_empty() {
            return Err(StoreError::Validation(problems));
        }

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            category: input.category,
            purchase_price_cents: input.purchase_price_cents,
            selling_price_cents: input.selling_price_cents,
            wholesale_price_cents: input.wholesale_price_cents,
            min_stock: input.min_stock,
            serialized: input.serialized,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, category, purchase_price_cents,
                selling_price_cents, wholesale_price_cents, min_stock,
                serialized, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.purchase_price_cents)
        .bind(product.selling_price_cents)
        .bind(product.wholesale_price_cents)
        .bind(product.min_stock)
        .bind(product.serialized)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(product)
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by its SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists active products by name.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Updates prices and metadata of an existing product.
    pub async fn update(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, "Updating product");

        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = ?2,
                category = ?3,
                purchase_price_cents = ?4,
                selling_price_cents = ?5,
                wholesale_price_cents = ?6,
                min_stock = ?7,
                is_active = ?8,
                updated_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.purchase_price_cents)
        .bind(product.selling_price_cents)
        .bind(product.wholesale_price_cents)
        .bind(product.min_stock)
        .bind(product.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("product", &product.id));
        }

        Ok(())
    }

    /// Soft-deletes a product.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Deactivating product");

        let now = Utc::now();

        let result =
            sqlx::query("UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("product", id));
        }

        Ok(())
    }

    /// Counts active products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
