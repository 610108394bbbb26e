use crate::query::MAX_QUERY_LIMIT;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_ADMIN_TOKEN: &str = "your-auth-token";

/// IoT device registry and telemetry service
#[derive(Debug, Clone, Parser)]
#[command(name = "iot-registry", version)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// PostgreSQL connection string; the in-memory store is used when unset
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 10)]
    pub db_acquire_timeout_secs: u64,

    /// Token expected in X-Auth-Token for device registry changes
    #[arg(long, env = "ADMIN_TOKEN", default_value = DEFAULT_ADMIN_TOKEN, hide_env_values = true)]
    pub admin_token: String,

    /// Upper bound applied to the `limit` query parameter
    #[arg(long, env = "MAX_QUERY_LIMIT", default_value_t = MAX_QUERY_LIMIT)]
    pub max_query_limit: usize,
}

impl Config {
    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    pub fn uses_default_admin_token(&self) -> bool {
        self.admin_token == DEFAULT_ADMIN_TOKEN
    }

    /// Host part of the database URL, safe to log.
    pub fn database_host(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(|url| url.rsplit('@').next().unwrap_or("***"))
    }
}
