use rust_decimal::Decimal;
use sqlx::PgExecutor;

use crate::error::OrderError;
use crate::models::BidSide;

/// How the cached best-price columns on `products` are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// Recompute MAX/MIN over currently-open bids on every mutating
    /// event, so the cache always equals the derived value.
    EagerRecompute,
    /// Historical behavior: the cache only tightens when a bid is
    /// placed and is never lowered when that bid expires or settles.
    Legacy,
}

/// Folds a freshly placed bid into the product's best-price cache.
///
/// A buy bid raises `current_selling_price` (the price an owner could
/// sell at right now); a sell bid lowers `current_buying_price`. Both
/// paths are single conditional statements so concurrent placements on
/// one product cannot interleave a read-modify-write.
pub async fn record_new_bid(
    exec: impl PgExecutor<'_>,
    mode: LedgerMode,
    product_id: i64,
    side: BidSide,
    price: Decimal,
) -> Result<(), OrderError> {
    match mode {
        LedgerMode::EagerRecompute => refresh_best_prices(exec, product_id).await,
        LedgerMode::Legacy => {
            let sql = match side {
                BidSide::Buy => {
                    "UPDATE products SET current_selling_price = $2 \
                     WHERE id = $1 AND (current_selling_price IS NULL OR current_selling_price < $2)"
                }
                BidSide::Sell => {
                    "UPDATE products SET current_buying_price = $2 \
                     WHERE id = $1 AND (current_buying_price IS NULL OR current_buying_price > $2)"
                }
            };
            sqlx::query(sql)
                .bind(product_id)
                .bind(price)
                .execute(exec)
                .await?;
            Ok(())
        }
    }
}

/// Recomputes both cached best prices from the open bids of the
/// product. NULL when no open bid of a side exists.
pub async fn refresh_best_prices(
    exec: impl PgExecutor<'_>,
    product_id: i64,
) -> Result<(), OrderError> {
    sqlx::query(
        "UPDATE products SET \
           current_selling_price = (SELECT MAX(price) FROM biddings \
               WHERE product_id = $1 AND side = 'buy' AND status = 'open'), \
           current_buying_price = (SELECT MIN(price) FROM biddings \
               WHERE product_id = $1 AND side = 'sell' AND status = 'open') \
         WHERE id = $1",
    )
    .bind(product_id)
    .execute(exec)
    .await?;
    Ok(())
}
