//! Libris Library Lending Server
//!
//! A REST JSON API for a small library: a catalog of books, member
//! accounts, and a lending desk that issues and returns books and charges
//! late fees.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    /// Build the services over an open, migrated pool
    pub fn new(config: AppConfig, pool: sqlx::Pool<sqlx::Sqlite>) -> Self {
        let services = services::Services::new(repository::Repository::new(pool), &config);
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}
