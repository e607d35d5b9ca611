use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::ledger::LedgerMode;

/// Shared handler state. All durable state lives in Postgres; this is
/// just configuration plus the connection pool.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub db: PgPool,
    pub ledger_mode: LedgerMode,
}
