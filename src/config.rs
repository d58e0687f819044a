//! Configuration management for Libris server

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Account created at startup when the database has no administrator yet
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_hours: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Loan period, fine rate and per-member borrow limit
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LendingConfig {
    pub loan_period_days: i64,
    /// Late fee per overdue day, in minor currency units
    pub fine_per_day_cents: i64,
    pub max_active_borrows: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub lending: LendingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // LIBRIS_LENDING__FINE_PER_DAY_CENTS=1000 style overrides
            .add_source(
                Environment::with_prefix("LIBRIS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("auth.jwt_secret", env::var("JWT_SECRET").ok())?
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize a built configuration and check the lending rules
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let config: Self = config.try_deserialize()?;
        config.lending.validate()?;
        Ok(config)
    }
}

impl LendingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.fine_per_day_cents < 0 {
            return Err(ConfigError::Message(format!(
                "lending.fine_per_day_cents must not be negative (got {})",
                self.fine_per_day_cents
            )));
        }
        if self.loan_period_days < 1 {
            return Err(ConfigError::Message(format!(
                "lending.loan_period_days must be at least 1 (got {})",
                self.loan_period_days
            )));
        }
        if self.max_active_borrows < 1 {
            return Err(ConfigError::Message(format!(
                "lending.max_active_borrows must be at least 1 (got {})",
                self.max_active_borrows
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://libris.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-this-secret-in-production".to_string(),
            jwt_expiration_hours: 24,
            bootstrap_admin: None,
        }
    }
}

impl Default for LendingConfig {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            fine_per_day_cents: 100,
            max_active_borrows: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
