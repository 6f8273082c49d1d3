use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use dotenv::dotenv;
use fintrack_server::{AppError, AppState, DbOperations, Settings};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn cors(settings: &Settings) -> Cors {
    if !settings.cors.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = settings
        .cors
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin));

    cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .supports_credentials()
        .max_age(settings.cors.max_age as usize)
}

#[actix_web::main]
async fn main() -> fintrack_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully ({} environment)", config.environment);

    // Initialize database connection pool
    let db = Arc::new(
        DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?,
    );
    db.run_migrations().await?;
    info!("Database migrations applied");

    let state = AppState::new(config.clone(), db.clone(), db.clone())?;

    // Periodically purge expired refresh tokens
    let purge_state = state.clone();
    let purge_interval = Duration::from_secs(config.auth.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        loop {
            ticker.tick().await;
            match purge_state.sessions.refresh_tokens().purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {} expired refresh tokens", purged),
                Err(e) => error!("Failed to purge expired refresh tokens: {}", e),
            }
        }
    });

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let data = web::Data::new(state);
    let settings = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&settings))
            .app_data(data.clone())
            .configure(fintrack_server::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    db.close().await;
    info!("Server stopped");

    Ok(())
}
