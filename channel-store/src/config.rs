use anyhow::Context;
use serde::Deserialize;

/// Loaded once at process start, in the manner this lineage loads key
/// material from the environment (see the crypto crate's dev-keyring setup).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections = std::env::var("CHANNEL_STORE_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("CHANNEL_STORE_MAX_CONNECTIONS must be an integer")?
            .unwrap_or_else(default_max_connections);
        let statement_timeout_ms = std::env::var("CHANNEL_STORE_STATEMENT_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("CHANNEL_STORE_STATEMENT_TIMEOUT_MS must be an integer")?
            .unwrap_or_else(default_statement_timeout_ms);

        Ok(Config {
            database_url,
            max_connections,
            statement_timeout_ms,
        })
    }
}
