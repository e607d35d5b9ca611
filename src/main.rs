use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use remarket::auth::{auth_user, make_access_token, valid_email, valid_password};
use remarket::bidding::{self, HistoryQuery, PlaceBid};
use remarket::catalog::{self, ProductFilter, ProductSort};
use remarket::config::load_config;
use remarket::error::{ApiError, OrderError};
use remarket::ledger::LedgerMode;
use remarket::models::{BidSide, BidStatus};
use remarket::settlement::{self, SettleRequest};
use remarket::state::AppState;
use remarket::tasks;

#[derive(Debug, Deserialize)]
struct SignupRequest {
    email: Option<String>,
    password: Option<String>,
    phone_number: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SigninRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SideQuery {
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BiddingRequest {
    product_id: Option<i64>,
    expired_within_id: Option<i64>,
    price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct ContractRequest {
    product_id: Option<i64>,
    selling_bid_id: Option<i64>,
    buying_bid_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BestBidParams {
    product_id: Option<i64>,
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    status_id: Option<i16>,
    offset: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProductParams {
    author: Option<i64>,
    theme: Option<i64>,
    color: Option<i64>,
    size: Option<i64>,
    sort: Option<String>,
    offset: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SweepParams {
    as_of: Option<DateTime<Utc>>,
}

// ===== HTTP handlers =====

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    sqlx::query("SELECT 1")
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, format!("db error: {e}")))?;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "database": "connected"
    })))
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (Some(email), Some(password), Some(phone_number), Some(name)) =
        (req.email, req.password, req.phone_number, req.name)
    else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "KEY_ERROR"));
    };
    if !valid_email(&email) || !valid_password(&password) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ERROR"));
    }
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = $1 OR phone_number = $2")
            .bind(&email)
            .bind(&phone_number)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    if existing.is_some() {
        return Err(ApiError::new(StatusCode::CONFLICT, "DUPLICATE"));
    }
    let password_hash = hash(&password, DEFAULT_COST)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;
    sqlx::query("INSERT INTO users (email, password_hash, phone_number, name) VALUES ($1, $2, $3, $4)")
        .bind(&email)
        .bind(&password_hash)
        .bind(&phone_number)
        .bind(&name)
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({"message": "SUCCESS"}))))
}

async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "KEY_ERROR"));
    };
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let Some(r) = row else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_USER"));
    };
    let user_id: i64 = r.get("id");
    let password_hash: String = r.get("password_hash");
    if !verify(&password, &password_hash).unwrap_or(false) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_USER"));
    }
    let token = make_access_token(&state.cfg.jwt, user_id)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("token error: {e}")))?;
    Ok(Json(serde_json::json!({"message": "SUCCESS", "TOKEN": token})))
}

async fn user_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = auth_user(&state, &headers).await?;
    let row = sqlx::query(
        "SELECT name, address, phone_number, card_company, card_number, bank_name, bank_account \
         FROM users WHERE id = $1",
    )
    .bind(user.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(Json(serde_json::json!({
        "results": {
            "name": row.get::<String, _>("name"),
            "address": row.get::<Option<String>, _>("address"),
            "phone_number": row.get::<String, _>("phone_number"),
            "payment": {
                "card_company": row.get::<Option<String>, _>("card_company"),
                "card_number": row.get::<Option<String>, _>("card_number"),
                "bank_name": row.get::<Option<String>, _>("bank_name"),
                "bank_account": row.get::<Option<String>, _>("bank_account"),
            }
        }
    })))
}

async fn list_products(
    State(state): State<AppState>,
    Query(p): Query<ProductParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sort = match p.sort.as_deref() {
        None => ProductSort::default(),
        // An unknown sort key is an input defect, same class as a
        // missing body field.
        Some(s) => ProductSort::parse(s).ok_or(OrderError::MalformedRequest)?,
    };
    let filter = ProductFilter {
        author_id: p.author,
        theme_id: p.theme,
        color_id: p.color,
        size_id: p.size,
        sort,
        page: p.offset.unwrap_or(0),
        limit: p.limit.unwrap_or(100),
    };
    let products = catalog::list_products(&state.db, &filter).await?;
    Ok(Json(serde_json::json!({"results": products})))
}

async fn product_categories(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(catalog::category_options(&state.db).await?))
}

async fn create_bidding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SideQuery>,
    Json(body): Json<BiddingRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = auth_user(&state, &headers).await?;
    let (Some(product_id), Some(expired_within_id), Some(price)) =
        (body.product_id, body.expired_within_id, body.price)
    else {
        return Err(OrderError::MalformedRequest.into());
    };
    let side = q
        .r#type
        .as_deref()
        .and_then(BidSide::parse)
        .ok_or(OrderError::InvalidSide)?;
    let bid = bidding::place_bid(
        &state.db,
        state.ledger_mode,
        &PlaceBid {
            product_id,
            user_id: user.user_id,
            side,
            price,
            expiry_window_id: expired_within_id,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"message": "NEW_BID_CREATED", "results": bid})),
    ))
}

async fn best_open_bid(
    State(state): State<AppState>,
    Query(p): Query<BestBidParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let product_id = p.product_id.ok_or(OrderError::MalformedRequest)?;
    let side = p
        .r#type
        .as_deref()
        .and_then(BidSide::parse)
        .ok_or(OrderError::InvalidSide)?;
    let bid = bidding::find_best_open_bid(&state.db, product_id, side).await?;
    Ok(Json(serde_json::json!({"results": bid})))
}

async fn bidding_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(p): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _ = auth_user(&state, &headers).await?;
    let status = match p.status_id {
        None => None,
        Some(id) => Some(BidStatus::from_wire_id(id).ok_or(OrderError::InvalidStatus)?),
    };
    let rows = bidding::bidding_history(
        &state.db,
        &HistoryQuery {
            status,
            page: p.offset.unwrap_or(0),
            limit: p.limit.unwrap_or(100),
        },
    )
    .await?;
    Ok(Json(serde_json::json!({"results": rows})))
}

async fn create_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<SideQuery>,
    Json(body): Json<ContractRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = auth_user(&state, &headers).await?;
    let product_id = body.product_id.ok_or(OrderError::MalformedRequest)?;
    let contract_type = q
        .r#type
        .as_deref()
        .and_then(BidSide::parse)
        .ok_or(OrderError::InvalidType)?;
    let contract = settlement::settle_contract(
        &state.db,
        state.ledger_mode,
        &SettleRequest {
            product_id,
            taker_user_id: user.user_id,
            contract_type,
            selling_bid_id: body.selling_bid_id,
            buying_bid_id: body.buying_bid_id,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"message": "CONTRACT_SUCCESS", "results": contract})),
    ))
}

async fn run_expiry_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(p): Query<SweepParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _ = auth_user(&state, &headers).await?;
    let as_of = p.as_of.unwrap_or_else(Utc::now);
    let expired = bidding::expire_due_bids(&state.db, state.ledger_mode, as_of).await?;
    Ok(Json(serde_json::json!({"expired": expired})))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(load_config()?);

    let db = PgPoolOptions::new()
        .min_connections(cfg.database.min_pool_size)
        .max_connections(cfg.database.max_pool_size)
        .acquire_timeout(Duration::from_secs(cfg.database.acquire_timeout_seconds))
        .max_lifetime(Duration::from_secs(cfg.database.max_lifetime_seconds))
        .connect(&cfg.database.url)
        .await
        .context("failed to connect to postgres")?;

    let ledger_mode = if cfg.ledger.eager_recompute {
        LedgerMode::EagerRecompute
    } else {
        LedgerMode::Legacy
    };
    let state = AppState { cfg: cfg.clone(), db, ledger_mode };

    tasks::start_background_tasks(state.clone());

    // CORS: explicitly allow Authorization.
    let allowed_headers = [AUTHORIZATION, CONTENT_TYPE, ACCEPT];
    let allowed_methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors = if cfg.api.cors_origins.iter().any(|x| x == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/users/signup", post(signup))
        .route("/users/signin", post(signin))
        .route("/users/info", get(user_info))
        .route("/products", get(list_products))
        .route("/products/category", get(product_categories))
        .route("/orders/bidding", post(create_bidding))
        .route("/orders/bidding/best", get(best_open_bid))
        .route("/orders/bidding-history", get(bidding_history))
        .route("/orders/contract", post(create_contract))
        .route("/orders/sweep", post(run_expiry_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.api.host, cfg.api.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "remarket api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
