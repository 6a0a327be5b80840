//! # vend-db: Database Layer for Vend
//!
//! SQLite persistence for the Vend inventory core, plus the two services
//! that tie ledger state to the pure aggregates in `vend-core`:
//!
//! - [`repository`] - per-table repositories (catalog, stock ledger, sales)
//! - [`selection`] - feeds live ledger reads into a [`vend_core::Selection`]
//! - [`checkout`] - the validate-then-commit sale transaction
//! - [`pool`] - connection pool creation ([`Database`] / [`DbConfig`])
//! - [`migrations`] - embedded schema migrations
//! - [`error`] - [`DbError`] (storage) and [`StoreError`] (service results)
//!
//! ## Concurrency Model
//! The ledger is the single shared mutable resource. Every status mutation
//! goes through a compare-and-set (`UPDATE ... WHERE status = ?`), so two
//! writers racing for the same unit resolve to exactly one winner without
//! any cross-request locks. Checkout validates first for friendly errors,
//! then relies on the per-unit compare-and-set inside one transaction for
//! the actual safety guarantee.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vend_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./vend.db")).await?;
//! let product = db.products().get_by_sku("IPHONE-15-128").await?;
//! ```

pub mod checkout;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod selection;

pub use error::{DbError, StoreError};
pub use pool::{Database, DbConfig};

pub use checkout::{checkout, CheckoutInput, CompletedSale};
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::sale::SaleRepository;
pub use repository::stock::{IntakeRequest, StockRepository};
pub use selection::SelectionService;
