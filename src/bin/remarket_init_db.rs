use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

fn split_sql_statements(input: &str) -> Vec<String> {
    // Simple splitter suitable for our schema.sql (no functions /
    // dollar-quoting). Skips comments/whitespace-only segments.
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_single = false;

    for line in input.lines() {
        let trimmed = line.trim_start();
        if !in_single && trimmed.starts_with("--") {
            continue;
        }
        for ch in line.chars() {
            match ch {
                '\'' => {
                    in_single = !in_single;
                    cur.push(ch);
                }
                ';' if !in_single => {
                    let s = cur.trim();
                    if !s.is_empty() {
                        out.push(s.to_string());
                    }
                    cur.clear();
                }
                _ => cur.push(ch),
            }
        }
        cur.push('\n');
    }
    let s = cur.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
    out
}

async fn seed_demo_catalog(db: &PgPool) -> Result<()> {
    let author_id: i64 = sqlx::query("INSERT INTO authors (name) VALUES ($1) RETURNING id")
        .bind("house author")
        .fetch_one(db)
        .await?
        .get("id");
    let size_id: i64 = sqlx::query("INSERT INTO sizes (name) VALUES ($1) RETURNING id")
        .bind("A1")
        .fetch_one(db)
        .await?
        .get("id");
    for (name, original_price) in [
        ("wave poster", 20000),
        ("city poster", 100000),
        ("forest poster", 50000),
    ] {
        let product_id: i64 = sqlx::query(
            "INSERT INTO products (name, author_id, size_id, original_price) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(name)
        .bind(author_id)
        .bind(size_id)
        .bind(Decimal::from(original_price))
        .fetch_one(db)
        .await?
        .get("id");
        sqlx::query("INSERT INTO product_images (product_id, image_url) VALUES ($1, $2)")
            .bind(product_id)
            .bind(format!("https://img.example.com/products/{product_id}.jpg"))
            .execute(db)
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let db_url = env_required("DATABASE_URL")?;
    let schema_path = env_string("SCHEMA_PATH", "schema.sql");
    let min = env_u32("DB_MIN_POOL_SIZE", 5).max(1);
    let max = env_u32("DB_MAX_POOL_SIZE", 50).max(min);
    let acquire = env_u64("DB_ACQUIRE_TIMEOUT_SECONDS", 30).max(5);
    let expiry_days = env_list("INITIAL_EXPIRY_DAYS", &["1", "3", "7", "30"]);
    let seed_demo = env_bool("SEED_DEMO_DATA", false);

    let db = PgPoolOptions::new()
        .min_connections(min)
        .max_connections(max)
        .acquire_timeout(Duration::from_secs(acquire))
        .connect(&db_url)
        .await
        .context("connect postgres")?;

    // Hard reset (clean schema); the configured role owns the database
    // in dev.
    sqlx::query("DROP SCHEMA IF EXISTS public CASCADE")
        .execute(&db)
        .await
        .context("drop public schema")?;
    sqlx::query("CREATE SCHEMA public")
        .execute(&db)
        .await
        .context("create public schema")?;

    let schema_sql = fs::read_to_string(&schema_path)
        .with_context(|| format!("read {schema_path}"))?;
    for stmt in split_sql_statements(&schema_sql) {
        sqlx::query(&stmt)
            .execute(&db)
            .await
            .with_context(|| format!("exec schema stmt: {}", stmt.lines().next().unwrap_or("<empty>")))?;
    }

    let mut windows = Vec::new();
    for raw in &expiry_days {
        let days: i32 = raw
            .parse()
            .map_err(|_| anyhow!("INITIAL_EXPIRY_DAYS entry is not a day count: {raw:?}"))?;
        let id: i64 = sqlx::query("INSERT INTO expiry_windows (period_days) VALUES ($1) RETURNING id")
            .bind(days)
            .fetch_one(&db)
            .await?
            .get("id");
        windows.push((id, days));
    }

    if seed_demo {
        seed_demo_catalog(&db).await?;
    }

    println!(
        "initialized: expiry_windows={:?}, demo_catalog={}",
        windows, seed_demo
    );

    Ok(())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => parse_list_value(&v)
            .unwrap_or_else(|| default.iter().map(|s| (*s).to_string()).collect()),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn parse_list_value(raw: &str) -> Option<Vec<String>> {
    if let Ok(v) = serde_json::from_str::<Vec<String>>(raw) {
        return Some(v.into_iter().filter(|s| !s.trim().is_empty()).collect());
    }
    let parts: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}
