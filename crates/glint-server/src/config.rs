use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub chat_db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("GLINT_PORT", "3000");
        let port = port
            .parse()
            .with_context(|| format!("GLINT_PORT is not a port number: {port}"))?;

        Ok(Self {
            jwt_secret: var("GLINT_JWT_SECRET", DEV_SECRET),
            db_path: var("GLINT_DB_PATH", "glint.db").into(),
            chat_db_path: var("GLINT_CHAT_DB_PATH", "glint-chat.db").into(),
            host: var("GLINT_HOST", "0.0.0.0"),
            port,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_SECRET
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
