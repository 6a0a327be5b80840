//! # Seed Data Generator
//!
//! Populates a database with demo catalog and stock for development.
//!
//! ## Usage
//! ```bash
//! # Default database path (./vend.db)
//! cargo run -p vend-db --bin seed
//!
//! # Custom path and accessory stock depth
//! cargo run -p vend-db --bin seed -- --db ./data/vend.db --count 25
//! ```
//!
//! Creates serialized products (phones, one demo serial per unit) and
//! fungible accessories, every unit with a generated scannable code.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use vend_db::{Database, DbConfig, IntakeRequest, NewProduct};

/// Serialized demo products: (sku, name, selling price cents, units).
const PHONES: &[(&str, &str, i64, i64)] = &[
    ("PHN-A34-128", "Galaxy A34 128GB", 29_900, 4),
    ("PHN-15-128", "iPhone 15 128GB", 79_900, 3),
    ("PHN-PIX9", "Pixel 9 256GB", 69_900, 2),
];

/// Fungible demo products: (sku, name, selling price cents).
const ACCESSORIES: &[(&str, &str, i64)] = &[
    ("CBL-USBC-1M", "USB-C Cable 1m", 1_500),
    ("ADP-30W", "30W Power Adapter", 2_500),
    ("CASE-CLR-15", "Clear Case iPhone 15", 1_900),
    ("GLS-TMP-9", "Tempered Glass Pixel 9", 1_200),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (db_path, accessory_count) = parse_args();

    info!(path = %db_path, "Seeding database");
    let db = Database::new(DbConfig::new(&db_path)).await?;

    for (sku, name, price, units) in PHONES {
        let product = db
            .products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                category: Some("phones".to_string()),
                purchase_price_cents: Some(price * 7 / 10),
                selling_price_cents: *price,
                wholesale_price_cents: price * 85 / 100,
                min_stock: 1,
                serialized: true,
            })
            .await?;

        let serials: Vec<String> = (0..*units).map(|i| format!("DEMO-{sku}-{i:03}")).collect();
        db.stock()
            .intake(
                &product,
                IntakeRequest {
                    quantity: *units,
                    serials: Some(serials),
                    want_codes: true,
                    batch: Some("SEED".to_string()),
                    location: Some("backroom".to_string()),
                    created_by: "seed".to_string(),
                },
            )
            .await?;
    }

    for (sku, name, price) in ACCESSORIES {
        let product = db
            .products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                category: Some("accessories".to_string()),
                purchase_price_cents: Some(price / 2),
                selling_price_cents: *price,
                wholesale_price_cents: price * 3 / 4,
                min_stock: 5,
                serialized: false,
            })
            .await?;

        db.stock()
            .intake(
                &product,
                IntakeRequest {
                    quantity: accessory_count,
                    serials: None,
                    want_codes: true,
                    batch: Some("SEED".to_string()),
                    location: Some("shelf".to_string()),
                    created_by: "seed".to_string(),
                },
            )
            .await?;
    }

    let products = db.products().count().await?;
    info!(products, "Seed complete");

    db.close().await;
    Ok(())
}

/// Minimal arg parsing: `--db <path>` and `--count <n>`.
fn parse_args() -> (String, i64) {
    let args: Vec<String> = env::args().collect();
    let mut db_path = "./vend.db".to_string();
    let mut count: i64 = 10;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 2;
            }
            "--count" if i + 1 < args.len() => {
                count = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            _ => i += 1,
        }
    }

    (db_path, count)
}
