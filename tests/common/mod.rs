//! Shared harness for the DB-backed integration tests. Every test
//! builds its own fixtures through these helpers; nothing is shared
//! between tests beyond the schema itself.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use remarket::models::BidSide;

pub async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a scratch postgres for integration tests");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect postgres");
    apply_schema(&pool).await;
    pool
}

async fn apply_schema(pool: &PgPool) {
    // schema.sql is idempotent (IF NOT EXISTS throughout), but two test
    // binaries applying it at the same instant can still trip catalog
    // uniqueness; treat that as already-applied.
    let sql = include_str!("../../schema.sql");
    for stmt in split_sql(sql) {
        if let Err(e) = sqlx::query(&stmt).execute(pool).await {
            let msg = e.to_string();
            if msg.contains("already exists") || msg.contains("duplicate key") {
                continue;
            }
            panic!("apply schema statement failed: {e}\n{stmt}");
        }
    }
}

fn split_sql(input: &str) -> Vec<String> {
    input
        .lines()
        .filter(|l| !l.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn create_user(pool: &PgPool) -> i64 {
    let tag = Uuid::new_v4().simple().to_string();
    sqlx::query(
        "INSERT INTO users (email, password_hash, phone_number, name) \
         VALUES ($1, 'x', $2, $3) RETURNING id",
    )
    .bind(format!("{tag}@test.example"))
    .bind(&tag)
    .bind(format!("user-{tag}"))
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub async fn create_product(pool: &PgPool, name: &str) -> i64 {
    sqlx::query(
        "INSERT INTO products (name, original_price) VALUES ($1, 20000) RETURNING id",
    )
    .bind(format!("{name}-{}", Uuid::new_v4().simple()))
    .fetch_one(pool)
    .await
    .expect("insert product")
    .get("id")
}

pub async fn create_window(pool: &PgPool, days: i32) -> i64 {
    sqlx::query("INSERT INTO expiry_windows (period_days) VALUES ($1) RETURNING id")
        .bind(days)
        .fetch_one(pool)
        .await
        .expect("insert expiry window")
        .get("id")
}

/// Raw open bid, bypassing place_bid (no ledger side effects).
pub async fn create_open_bid(
    pool: &PgPool,
    product_id: i64,
    user_id: i64,
    side: BidSide,
    price: i64,
    window_id: Option<i64>,
) -> i64 {
    sqlx::query(
        "INSERT INTO biddings (product_id, user_id, side, price, status, expiry_window_id) \
         VALUES ($1, $2, $3, $4, 'open', $5) RETURNING id",
    )
    .bind(product_id)
    .bind(user_id)
    .bind(side.as_str())
    .bind(Decimal::from(price))
    .bind(window_id)
    .fetch_one(pool)
    .await
    .expect("insert bid")
    .get("id")
}

pub async fn backdate_bid(pool: &PgPool, bid_id: i64, created_at: DateTime<Utc>) {
    sqlx::query("UPDATE biddings SET created_at = $2 WHERE id = $1")
        .bind(bid_id)
        .bind(created_at)
        .execute(pool)
        .await
        .expect("backdate bid");
}

pub async fn bid_status(pool: &PgPool, bid_id: i64) -> String {
    sqlx::query("SELECT status FROM biddings WHERE id = $1")
        .bind(bid_id)
        .fetch_one(pool)
        .await
        .expect("fetch bid status")
        .get("status")
}

/// (current_buying_price, current_selling_price)
pub async fn best_prices(pool: &PgPool, product_id: i64) -> (Option<Decimal>, Option<Decimal>) {
    let row = sqlx::query(
        "SELECT current_buying_price, current_selling_price FROM products WHERE id = $1",
    )
    .bind(product_id)
    .fetch_one(pool)
    .await
    .expect("fetch product prices");
    (row.get("current_buying_price"), row.get("current_selling_price"))
}

pub async fn contracts_referencing(pool: &PgPool, bid_id: i64) -> i64 {
    sqlx::query(
        "SELECT COUNT(*)::bigint AS n FROM contracts \
         WHERE selling_bid_id = $1 OR buying_bid_id = $1",
    )
    .bind(bid_id)
    .fetch_one(pool)
    .await
    .expect("count contracts")
    .get("n")
}
