pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod response;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthenticatedAccount, Session, SessionService};
pub use db::{AccountStore, DbOperations, MemoryStore, RefreshTokenStore};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Register every route of the server on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .configure(auth::handlers::routes);
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionService>,
}

impl AppState {
    pub fn new(
        config: Settings,
        accounts: Arc<dyn AccountStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Result<Self> {
        let sessions = SessionService::new(accounts, refresh_tokens, &config.auth)?;

        Ok(Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
        })
    }

    /// State over a single in-process store.
    pub fn in_memory(config: Settings, store: MemoryStore) -> Result<Self> {
        let store = Arc::new(store);
        Self::new(config, store.clone(), store)
    }
}
