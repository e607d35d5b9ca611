use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// HTTP-facing error: a status code plus the wire message code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(ErrorBody { message: self.message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Typed outcomes of the bidding/settlement core. The display strings are
/// the wire message codes the HTTP layer returns verbatim.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("PRODUCT_NOT_FOUND")]
    ProductNotFound,
    #[error("SELLING_BID_NOT_FOUND")]
    SellingBidNotFound,
    #[error("BUYING_BID_NOT_FOUND")]
    BuyingBidNotFound,
    #[error("INVALID_SIDE")]
    InvalidSide,
    #[error("INVALID_TYPE")]
    InvalidType,
    #[error("INVALID_PRICE")]
    InvalidPrice,
    #[error("INVALID_STATUS")]
    InvalidStatus,
    /// Missing or unresolvable request field; the catch-all 400 for
    /// input defects detected before any state is touched.
    #[error("KEY_ERROR")]
    MalformedRequest,
    /// Lost the settlement race: the resting bid left Open between the
    /// lookup and the conditional transition. Retryable by the caller.
    #[error("BID_NO_LONGER_AVAILABLE")]
    BidNoLongerAvailable,
    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::ProductNotFound
            | OrderError::SellingBidNotFound
            | OrderError::BuyingBidNotFound => StatusCode::NOT_FOUND,
            OrderError::InvalidSide
            | OrderError::InvalidType
            | OrderError::InvalidPrice
            | OrderError::InvalidStatus
            | OrderError::MalformedRequest => StatusCode::BAD_REQUEST,
            OrderError::BidNoLongerAvailable => StatusCode::CONFLICT,
            OrderError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(value: OrderError) -> Self {
        Self::new(value.status_code(), value.to_string())
    }
}
