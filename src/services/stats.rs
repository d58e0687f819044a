//! Statistics service

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::borrow::{cents_to_amount, overdue_cutoff},
    repository::Repository,
};

#[derive(Debug, Default, FromRow)]
struct CollectionCounts {
    books: i64,
    copies: i64,
    available: i64,
}

#[derive(Debug, Default, FromRow)]
struct MemberCounts {
    members: i64,
    active_members: i64,
}

#[derive(Debug, Default, FromRow)]
struct BorrowCounts {
    open_borrows: i64,
    overdue_borrows: i64,
    fees_cents: i64,
}

/// Library-wide totals
#[derive(Debug, Serialize, ToSchema)]
pub struct LibraryStats {
    /// Catalog titles
    pub books: i64,
    pub copies: i64,
    pub available_copies: i64,
    pub copies_on_loan: i64,
    pub members: i64,
    pub active_members: i64,
    pub open_borrows: i64,
    pub overdue_borrows: i64,
    /// Late fees charged on returned borrows
    #[schema(value_type = String, example = "12.00")]
    pub total_fees: Decimal,
}

#[derive(Clone)]
pub struct StatsService {
    repository: Repository,
}

impl StatsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Round-trip to the database
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.repository.pool).await?;
        Ok(())
    }

    pub async fn get_stats(&self) -> AppResult<LibraryStats> {
        let pool = &self.repository.pool;

        let collection = sqlx::query_as::<_, CollectionCounts>(
            r#"
            SELECT COUNT(*) AS books,
                   COALESCE(SUM(total_copies), 0) AS copies,
                   COALESCE(SUM(available_copies), 0) AS available
            FROM books
            WHERE archived_at IS NULL
            "#,
        )
        .fetch_one(pool)
        .await?;

        let members = sqlx::query_as::<_, MemberCounts>(
            r#"
            SELECT COUNT(*) AS members,
                   COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active_members
            FROM members
            "#,
        )
        .fetch_one(pool)
        .await?;

        let borrows = sqlx::query_as::<_, BorrowCounts>(
            r#"
            SELECT COALESCE(SUM(CASE WHEN returned_at IS NULL THEN 1 ELSE 0 END), 0) AS open_borrows,
                   COALESCE(SUM(CASE WHEN returned_at IS NULL AND due_at < ? THEN 1 ELSE 0 END), 0)
                       AS overdue_borrows,
                   COALESCE(SUM(late_fee_cents), 0) AS fees_cents
            FROM borrows
            "#,
        )
        .bind(overdue_cutoff(Utc::now()))
        .fetch_one(pool)
        .await?;

        Ok(LibraryStats {
            books: collection.books,
            copies: collection.copies,
            available_copies: collection.available,
            copies_on_loan: collection.copies - collection.available,
            members: members.members,
            active_members: members.active_members,
            open_borrows: borrows.open_borrows,
            overdue_borrows: borrows.overdue_borrows,
            total_fees: cents_to_amount(borrows.fees_cents),
        })
    }
}
