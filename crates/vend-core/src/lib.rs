//! # vend-core: Pure Business Logic for Vend
//!
//! The heart of the Vend inventory and point-of-sale core. Everything in
//! this crate is deterministic-in, deterministic-out business logic with
//! zero I/O dependencies: the database layer lives in `vend-db`, and any
//! transport a calling application chooses lives above that.
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, StockUnit, Sale, Payment, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`codegen`] - Scannable identifier generation with check digits
//! - [`cart`] - The Selection aggregate (a session's in-progress claims)
//! - [`error`] - Domain error taxonomy
//! - [`validation`] - Field-level input validation
//!
//! ## Design Principles
//!
//! 1. **No I/O**: database, network, and file system access are forbidden here
//! 2. **Integer money**: all monetary values are cents (i64)
//! 3. **Explicit errors**: typed enums, never strings or panics
//! 4. **Live reads are inputs**: anything that depends on ledger state
//!    (availability counts, unit status) is passed in by the caller

pub mod cart;
pub mod codegen;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

pub use cart::{LineKey, Selection, SelectionLine, SelectionTotals};
pub use codegen::CodeGenerator;
pub use error::{ConflictError, CoreError, LineViolation, ValidationError};
pub use money::Money;
pub use types::*;

/// Maximum number of lines allowed in a single selection.
///
/// Prevents runaway selections and keeps transaction sizes reasonable.
pub const MAX_SELECTION_LINES: usize = 100;

/// Maximum quantity a single selection line may claim.
///
/// Guards against typo-sized quantities (1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;
