use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use crate::error::OrderError;
use crate::ledger::{self, LedgerMode};
use crate::models::{BidSide, Contract};

/// A request to trade immediately against a resting bid. `contract_type`
/// is the side the requesting user takes: `buy` accepts a resting sell
/// bid by `selling_bid_id`, `sell` accepts a resting buy bid by
/// `buying_bid_id`.
#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub product_id: i64,
    pub taker_user_id: i64,
    pub contract_type: BidSide,
    pub selling_bid_id: Option<i64>,
    pub buying_bid_id: Option<i64>,
}

/// The resting bid id the request must carry for its contract type.
fn resting_bid_id(req: &SettleRequest) -> Result<i64, OrderError> {
    let id = match req.contract_type {
        BidSide::Buy => req.selling_bid_id,
        BidSide::Sell => req.buying_bid_id,
    };
    id.ok_or(OrderError::MalformedRequest)
}

fn not_found(contract_type: BidSide) -> OrderError {
    match contract_type {
        BidSide::Buy => OrderError::SellingBidNotFound,
        BidSide::Sell => OrderError::BuyingBidNotFound,
    }
}

/// Settles a contract against a resting bid as one atomic unit:
/// resolve the resting bid, create the taker's counter-bid at the
/// resting price, transition both bids Open -> Settled, record the
/// Contract, refresh the price cache, commit.
///
/// The transition is a conditional update guarded on status = 'open'.
/// Of two racing settlements on one resting bid, the first committer
/// wins; the loser's guard matches fewer than two rows and the whole
/// transaction rolls back with BID_NO_LONGER_AVAILABLE. A bid the
/// status filter no longer exposes (already settled or expired) is
/// indistinguishable from a nonexistent one and reports not-found.
pub async fn settle_contract(
    db: &PgPool,
    mode: LedgerMode,
    req: &SettleRequest,
) -> Result<Contract, OrderError> {
    let resting_id = resting_bid_id(req)?;
    let resting_side = req.contract_type.opposite();

    let mut tx = db.begin().await?;

    let resting = sqlx::query(
        "SELECT id, price FROM biddings \
         WHERE id = $1 AND product_id = $2 AND side = $3 AND status = 'open'",
    )
    .bind(resting_id)
    .bind(req.product_id)
    .bind(resting_side.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let Some(resting) = resting else {
        return Err(not_found(req.contract_type));
    };
    let price: Decimal = resting.try_get("price")?;

    // The taker accepts the resting price. Counter-bids settle in the
    // same transaction and never go through the expiry sweep.
    let counter = sqlx::query(
        "INSERT INTO biddings (product_id, user_id, side, price, status, expiry_window_id) \
         VALUES ($1, $2, $3, $4, 'open', NULL) RETURNING id",
    )
    .bind(req.product_id)
    .bind(req.taker_user_id)
    .bind(req.contract_type.as_str())
    .bind(price)
    .fetch_one(&mut *tx)
    .await?;
    let counter_id: i64 = counter.try_get("id")?;

    let (selling_bid_id, buying_bid_id) = match req.contract_type {
        BidSide::Buy => (resting_id, counter_id),
        BidSide::Sell => (counter_id, resting_id),
    };

    // Both transitions in one conditional statement. The counter-bid is
    // ours and uncontended, so fewer than two affected rows means the
    // resting bid left Open since the lookup above.
    let transitioned = sqlx::query(
        "UPDATE biddings SET status = 'settled', updated_at = now() \
         WHERE id IN ($1, $2) AND status = 'open'",
    )
    .bind(selling_bid_id)
    .bind(buying_bid_id)
    .execute(&mut *tx)
    .await?;
    if transitioned.rows_affected() != 2 {
        return Err(OrderError::BidNoLongerAvailable);
    }

    let contract_row = sqlx::query(
        "INSERT INTO contracts (selling_bid_id, buying_bid_id) VALUES ($1, $2) \
         RETURNING id, selling_bid_id, buying_bid_id, created_at",
    )
    .bind(selling_bid_id)
    .bind(buying_bid_id)
    .fetch_one(&mut *tx)
    .await?;
    let contract = Contract::from_row(&contract_row)?;

    if mode == LedgerMode::EagerRecompute {
        ledger::refresh_best_prices(&mut *tx, req.product_id).await?;
    }

    tx.commit().await?;

    tracing::info!(
        contract_id = contract.id,
        selling_bid_id,
        buying_bid_id,
        product_id = req.product_id,
        "contract settled"
    );
    Ok(contract)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(contract_type: BidSide, selling: Option<i64>, buying: Option<i64>) -> SettleRequest {
        SettleRequest {
            product_id: 1,
            taker_user_id: 2,
            contract_type,
            selling_bid_id: selling,
            buying_bid_id: buying,
        }
    }

    #[test]
    fn buy_requires_selling_bid_id() {
        assert_eq!(resting_bid_id(&req(BidSide::Buy, Some(7), None)).unwrap(), 7);
        assert!(matches!(
            resting_bid_id(&req(BidSide::Buy, None, Some(7))),
            Err(OrderError::MalformedRequest)
        ));
    }

    #[test]
    fn sell_requires_buying_bid_id() {
        assert_eq!(resting_bid_id(&req(BidSide::Sell, None, Some(9))).unwrap(), 9);
        assert!(matches!(
            resting_bid_id(&req(BidSide::Sell, Some(9), None)),
            Err(OrderError::MalformedRequest)
        ));
    }

    #[test]
    fn not_found_names_the_missing_side() {
        assert!(matches!(not_found(BidSide::Buy), OrderError::SellingBidNotFound));
        assert!(matches!(not_found(BidSide::Sell), OrderError::BuyingBidNotFound));
    }
}
