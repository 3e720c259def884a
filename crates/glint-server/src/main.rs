mod config;
mod routes;

use std::sync::Arc;

use tracing::{info, warn};

use glint_api::state::AppStateInner;
use glint_db::{ChatStore, Database};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glint=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_dev_secret() {
        warn!("GLINT_JWT_SECRET is not set, using the development secret");
    }

    // Init stores
    let db = Database::open(&config.db_path)?;
    let chat_store = ChatStore::open(&config.chat_db_path)?;

    let state = Arc::new(AppStateInner::new(
        Arc::new(db),
        Arc::new(chat_store),
        config.jwt_secret.clone(),
    ));
    let app = routes::router(state);

    let addr = config.addr()?;
    info!("Glint server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
