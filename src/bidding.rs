use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::OrderError;
use crate::ledger::{self, LedgerMode};
use crate::models::{Bid, BidSide, BidStatus, BID_COLUMNS};

#[derive(Debug, Clone)]
pub struct PlaceBid {
    pub product_id: i64,
    pub user_id: i64,
    pub side: BidSide,
    pub price: Decimal,
    pub expiry_window_id: i64,
}

/// Creates an open bid and folds it into the product's best-price
/// cache, both inside one transaction.
pub async fn place_bid(db: &PgPool, mode: LedgerMode, req: &PlaceBid) -> Result<Bid, OrderError> {
    if req.price <= Decimal::ZERO {
        return Err(OrderError::InvalidPrice);
    }
    let product: Option<(i64,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(req.product_id)
        .fetch_optional(db)
        .await?;
    if product.is_none() {
        return Err(OrderError::ProductNotFound);
    }
    // An unresolvable expiry window is an input defect, not a lookup
    // miss; the PlaceBid error set is closed.
    let window: Option<(i32,)> = sqlx::query_as("SELECT period_days FROM expiry_windows WHERE id = $1")
        .bind(req.expiry_window_id)
        .fetch_optional(db)
        .await?;
    if window.is_none() {
        return Err(OrderError::MalformedRequest);
    }

    let mut tx = db.begin().await?;
    let sql = format!(
        "INSERT INTO biddings (product_id, user_id, side, price, status, expiry_window_id) \
         VALUES ($1, $2, $3, $4, 'open', $5) RETURNING {BID_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(req.product_id)
        .bind(req.user_id)
        .bind(req.side.as_str())
        .bind(req.price)
        .bind(req.expiry_window_id)
        .fetch_one(&mut *tx)
        .await?;
    let bid = Bid::from_row(&row)?;
    ledger::record_new_bid(&mut *tx, mode, req.product_id, req.side, req.price).await?;
    tx.commit().await?;

    tracing::debug!(
        bid_id = bid.id,
        product_id = bid.product_id,
        side = bid.side.as_str(),
        "bid placed"
    );
    Ok(bid)
}

/// The open bid of the given side with the most favorable price: the
/// highest buy or the lowest sell. Ties go to the oldest bid
/// (price-time priority).
pub async fn find_best_open_bid(
    db: &PgPool,
    product_id: i64,
    side: BidSide,
) -> Result<Option<Bid>, OrderError> {
    let order = match side {
        BidSide::Buy => "price DESC",
        BidSide::Sell => "price ASC",
    };
    let sql = format!(
        "SELECT {BID_COLUMNS} FROM biddings \
         WHERE product_id = $1 AND side = $2 AND status = 'open' \
         ORDER BY {order}, created_at ASC, id ASC LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(product_id)
        .bind(side.as_str())
        .fetch_optional(db)
        .await?;
    row.map(|r| Bid::from_row(&r)).transpose().map_err(Into::into)
}

/// Expires every open bid whose window elapses on `as_of`'s calendar
/// day (UTC). Idempotent: expired rows no longer match the status
/// guard, and a bid mid-settlement wins or loses the race on the same
/// guard. Returns the number of bids transitioned.
pub async fn expire_due_bids(
    db: &PgPool,
    mode: LedgerMode,
    as_of: DateTime<Utc>,
) -> Result<u64, OrderError> {
    let rows = sqlx::query(
        "UPDATE biddings b SET status = 'expired', updated_at = $1 \
         FROM expiry_windows w \
         WHERE b.expiry_window_id = w.id \
           AND b.status = 'open' \
           AND ((b.created_at + make_interval(days => w.period_days)) AT TIME ZONE 'UTC')::date \
               = (($1) AT TIME ZONE 'UTC')::date \
         RETURNING b.product_id",
    )
    .bind(as_of)
    .fetch_all(db)
    .await?;
    let expired = rows.len() as u64;

    if mode == LedgerMode::EagerRecompute && expired > 0 {
        let products: BTreeSet<i64> = rows
            .iter()
            .map(|r| r.get::<i64, _>("product_id"))
            .collect();
        for product_id in products {
            ledger::refresh_best_prices(db, product_id).await?;
        }
    }
    Ok(expired)
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub status: Option<BidStatus>,
    /// Page index; the query skips `page * limit` rows.
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub product_id: i64,
    pub product_name: String,
    pub is_seller: bool,
    pub image: Option<String>,
    pub status_id: i16,
    pub status_name: &'static str,
    pub price: Decimal,
    pub bidding_date: String,
    pub expired_date: Option<String>,
}

pub(crate) fn format_ymd(t: DateTime<Utc>) -> String {
    t.format("%Y.%m.%d").to_string()
}

/// Read projection over biddings joined with products, first image and
/// expiry window. Counter-bids created by settlement have no window and
/// carry a null expired_date.
pub async fn bidding_history(db: &PgPool, q: &HistoryQuery) -> Result<Vec<HistoryRow>, OrderError> {
    let limit = q.limit.clamp(1, 500);
    let offset = q.page.max(0) * limit;
    let rows = sqlx::query(
        "SELECT b.product_id, p.name AS product_name, b.side, b.status, b.price, b.updated_at, \
                w.period_days, \
                (SELECT i.image_url FROM product_images i \
                  WHERE i.product_id = b.product_id ORDER BY i.id LIMIT 1) AS image \
         FROM biddings b \
         JOIN products p ON p.id = b.product_id \
         LEFT JOIN expiry_windows w ON w.id = b.expiry_window_id \
         WHERE ($1::text IS NULL OR b.status = $1::text) \
         ORDER BY b.id \
         OFFSET $2 LIMIT $3",
    )
    .bind(q.status.map(BidStatus::as_str))
    .bind(offset)
    .bind(limit)
    .fetch_all(db)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let side_raw: String = row.try_get("side")?;
        let side = BidSide::parse(&side_raw).ok_or(OrderError::InvalidSide)?;
        let status_raw: String = row.try_get("status")?;
        let status = BidStatus::parse(&status_raw).ok_or(OrderError::InvalidStatus)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        let period_days: Option<i32> = row.try_get("period_days")?;
        out.push(HistoryRow {
            product_id: row.try_get("product_id")?,
            product_name: row.try_get("product_name")?,
            is_seller: side.is_seller(),
            image: row.try_get("image")?,
            status_id: status.wire_id(),
            status_name: status.as_str(),
            price: row.try_get("price")?,
            bidding_date: format_ymd(updated_at),
            expired_date: period_days
                .map(|days| format_ymd(updated_at + Duration::days(i64::from(days)))),
        });
    }
    Ok(out)
}
