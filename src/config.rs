use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub max_db_connections: u32,
    pub session_inactivity_minutes: i64,
    pub allow_any_origin: bool,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:5000".to_owned(),
            database_url: "sqlite://murmur.db".to_owned(),
            max_db_connections: 16,
            session_inactivity_minutes: 60,
            allow_any_origin: true,
            rust_log: "info".to_owned(),
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        Ok(Config {
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr)?,
            database_url: var_or("DATABASE_URL", defaults.database_url)?,
            max_db_connections: var_or("DATABASE_MAX_CONNECTIONS", defaults.max_db_connections)?,
            session_inactivity_minutes: var_or("SESSION_INACTIVITY_MINUTES", defaults.session_inactivity_minutes)?,
            allow_any_origin: var_or("CORS_ALLOW_ANY_ORIGIN", defaults.allow_any_origin)?,
            rust_log: var_or("RUST_LOG", defaults.rust_log)?,
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match dotenv::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|err| anyhow!("invalid {key}={raw:?}: {err}"))
}
