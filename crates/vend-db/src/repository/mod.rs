//! # Repository Module
//!
//! Per-table repositories: each holds a pool clone and keeps its SQL in one
//! place.
//!
//! - [`product::ProductRepository`] - catalog CRUD
//! - [`stock::StockRepository`] - the stock ledger: intake, the
//!   compare-and-set status transition, availability reads
//! - [`sale::SaleRepository`] - sale reads and invoice numbering

pub mod product;
pub mod sale;
pub mod stock;
