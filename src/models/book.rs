//! Book (catalog title) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    /// Normalized ISBN-10 or ISBN-13 (digits only)
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    pub total_copies: i64,
    pub available_copies: i64,
    pub created_at: DateTime<Utc>,
    /// Set once the book is removed from the catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Book {
    /// Copies currently out on loan
    pub fn copies_on_loan(&self) -> i64 {
        self.total_copies - self.available_copies
    }
}

/// Catalog search parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Substring of title, author, category or ISBN (case-insensitive)
    pub search: Option<String>,
    /// Only books with at least one copy on the shelf
    pub available_only: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 200, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, max = 200, message = "Author is required"))]
    pub author: String,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    /// Defaults to 1
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: Option<i64>,
}

/// Update book request; absent fields are left untouched
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 200, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Author cannot be empty"))]
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: Option<i64>,
}
