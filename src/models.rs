use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;

/// Which side of a trade a bid expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidSide {
    Buy,
    Sell,
}

impl BidSide {
    pub fn as_str(self) -> &'static str {
        match self {
            BidSide::Buy => "buy",
            BidSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(BidSide::Buy),
            "sell" => Some(BidSide::Sell),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            BidSide::Buy => BidSide::Sell,
            BidSide::Sell => BidSide::Buy,
        }
    }

    pub fn is_seller(self) -> bool {
        matches!(self, BidSide::Sell)
    }
}

/// Bid state machine. Open is the only non-terminal state; the only
/// transitions are Open -> Expired (sweep) and Open -> Settled
/// (settlement), both one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Open,
    Expired,
    Settled,
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BidStatus::Open => "open",
            BidStatus::Expired => "expired",
            BidStatus::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(BidStatus::Open),
            "expired" => Some(BidStatus::Expired),
            "settled" => Some(BidStatus::Settled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BidStatus::Open)
    }

    /// Numeric id used on the wire by the history endpoint; kept for
    /// compatibility with existing clients, never used internally.
    pub fn wire_id(self) -> i16 {
        match self {
            BidStatus::Open => 1,
            BidStatus::Expired => 2,
            BidStatus::Settled => 3,
        }
    }

    pub fn from_wire_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BidStatus::Open),
            2 => Some(BidStatus::Expired),
            3 => Some(BidStatus::Settled),
            _ => None,
        }
    }
}

/// One side of interest in a product at a price. Immutable after
/// creation except for the status transition.
#[derive(Debug, Clone, Serialize)]
pub struct Bid {
    pub id: i64,
    pub product_id: i64,
    pub user_id: i64,
    pub side: BidSide,
    pub price: Decimal,
    pub status: BidStatus,
    pub expiry_window_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching `Bid::from_row`, for SELECT/RETURNING clauses.
pub const BID_COLUMNS: &str =
    "id, product_id, user_id, side, price, status, expiry_window_id, created_at, updated_at";

impl Bid {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let side_raw: String = row.try_get("side")?;
        let side = BidSide::parse(&side_raw)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown bid side {side_raw:?}").into()))?;
        let status_raw: String = row.try_get("status")?;
        let status = BidStatus::parse(&status_raw).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown bid status {status_raw:?}").into())
        })?;
        Ok(Bid {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            user_id: row.try_get("user_id")?,
            side,
            price: row.try_get("price")?,
            status,
            expiry_window_id: row.try_get("expiry_window_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Immutable settlement record pairing one sell bid with one buy bid.
#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id: i64,
    pub selling_bid_id: i64,
    pub buying_bid_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Contract {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Contract {
            id: row.try_get("id")?,
            selling_bid_id: row.try_get("selling_bid_id")?,
            buying_bid_id: row.try_get("buying_bid_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn side_roundtrip() {
        for side in [BidSide::Buy, BidSide::Sell] {
            assert_eq!(BidSide::parse(side.as_str()), Some(side));
        }
        assert_eq!(BidSide::parse("b"), None);
        assert_eq!(BidSide::parse("BUY"), None);
    }

    #[test]
    fn opposite_flips() {
        assert_eq!(BidSide::Buy.opposite(), BidSide::Sell);
        assert_eq!(BidSide::Sell.opposite(), BidSide::Buy);
        assert!(BidSide::Sell.is_seller());
        assert!(!BidSide::Buy.is_seller());
    }

    #[test]
    fn status_roundtrip_and_terminality() {
        for status in [BidStatus::Open, BidStatus::Expired, BidStatus::Settled] {
            assert_eq!(BidStatus::parse(status.as_str()), Some(status));
            assert_eq!(BidStatus::from_wire_id(status.wire_id()), Some(status));
        }
        assert!(!BidStatus::Open.is_terminal());
        assert!(BidStatus::Expired.is_terminal());
        assert!(BidStatus::Settled.is_terminal());
    }

    #[test]
    fn unknown_wire_ids_rejected() {
        assert_eq!(BidStatus::from_wire_id(0), None);
        assert_eq!(BidStatus::from_wire_id(4), None);
        assert_eq!(BidStatus::from_wire_id(-1), None);
    }

    proptest! {
        #[test]
        fn side_parse_accepts_only_known_tokens(s in "\\PC*") {
            let parsed = BidSide::parse(&s);
            prop_assert_eq!(parsed.is_some(), s == "buy" || s == "sell");
        }

        #[test]
        fn status_parse_accepts_only_known_tokens(s in "\\PC*") {
            let parsed = BidStatus::parse(&s);
            prop_assert_eq!(
                parsed.is_some(),
                s == "open" || s == "expired" || s == "settled"
            );
        }
    }
}
