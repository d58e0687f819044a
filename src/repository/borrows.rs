//! Borrows repository: guarded issue/return transactions and listings

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::{
    error::{AppError, AppResult},
    models::borrow::{late_fee_cents, overdue_cutoff, Borrow, BorrowDetailsRow, BorrowQuery, BorrowStatus},
};

use super::paginate;

const DETAILS_SELECT: &str = r#"
    SELECT br.id, br.book_id, br.member_id, br.issued_at, br.due_at, br.returned_at,
           br.late_fee_cents,
           bk.title AS book_title, bk.author AS book_author,
           m.full_name AS member_name, m.email AS member_email
    FROM borrows br
    JOIN books bk ON bk.id = br.book_id
    JOIN members m ON m.id = br.member_id
"#;

/// Limits checked while issuing, inside the issuing transaction
#[derive(Debug, Clone, Copy)]
pub struct IssueLimits {
    pub max_active_borrows: i64,
}

#[derive(Clone)]
pub struct BorrowsRepository {
    pool: Pool<Sqlite>,
}

impl BorrowsRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get borrow by ID
    pub async fn get_by_id(&self, id: i64) -> AppResult<Borrow> {
        sqlx::query_as::<_, Borrow>("SELECT * FROM borrows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrow with id {} not found", id)))
    }

    /// Get a borrow joined with its book and member
    pub async fn get_details(&self, id: i64) -> AppResult<BorrowDetailsRow> {
        let query = format!("{} WHERE br.id = ?", DETAILS_SELECT);
        sqlx::query_as::<_, BorrowDetailsRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrow with id {} not found", id)))
    }

    /// Issue one copy of a book to a member.
    ///
    /// The shelf count is decremented first with a guarded update, so two
    /// concurrent issues of the last copy cannot both succeed; every later
    /// check failing rolls that decrement back with the transaction.
    pub async fn issue(
        &self,
        book_id: i64,
        member_id: i64,
        issued_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
        limits: IssueLimits,
    ) -> AppResult<Borrow> {
        let mut tx = self.pool.begin().await?;

        let taken = sqlx::query(
            "UPDATE books SET available_copies = available_copies - 1 \
             WHERE id = ? AND available_copies > 0 AND archived_at IS NULL",
        )
        .bind(book_id)
        .execute(&mut *tx)
        .await?;

        if taken.rows_affected() == 0 {
            return Err(AppError::BookNotAvailable(book_id));
        }

        let already_held: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrows \
             WHERE book_id = ? AND member_id = ? AND returned_at IS NULL)",
        )
        .bind(book_id)
        .bind(member_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_held {
            return Err(AppError::Conflict(format!(
                "Book {} is already issued to member {}",
                book_id, member_id
            )));
        }

        let open_borrows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrows WHERE member_id = ? AND returned_at IS NULL",
        )
        .bind(member_id)
        .fetch_one(&mut *tx)
        .await?;

        if open_borrows >= limits.max_active_borrows {
            return Err(AppError::BusinessRule(format!(
                "Maximum borrows reached ({}/{})",
                open_borrows, limits.max_active_borrows
            )));
        }

        let borrow = sqlx::query_as::<_, Borrow>(
            r#"
            INSERT INTO borrows (book_id, member_id, issued_at, due_at, returned_at, late_fee_cents)
            VALUES (?, ?, ?, ?, NULL, 0)
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(member_id)
        .bind(issued_at)
        .bind(due_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(borrow)
    }

    /// Close an open borrow, charge its late fee and put the copy back on the shelf
    pub async fn return_borrow(
        &self,
        id: i64,
        returned_at: DateTime<Utc>,
        fine_per_day_cents: i64,
    ) -> AppResult<Borrow> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query_as::<_, Borrow>(
            "UPDATE borrows SET returned_at = ? WHERE id = ? AND returned_at IS NULL RETURNING *",
        )
        .bind(returned_at)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(closed) = closed else {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrows WHERE id = ?)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(if exists {
                AppError::AlreadyReturned(id)
            } else {
                AppError::NotFound(format!("Borrow with id {} not found", id))
            });
        };

        let fee = late_fee_cents(closed.due_at, returned_at, fine_per_day_cents);

        let borrow = sqlx::query_as::<_, Borrow>(
            "UPDATE borrows SET late_fee_cents = ? WHERE id = ? RETURNING *",
        )
        .bind(fee)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE books SET available_copies = available_copies + 1 \
             WHERE id = ? AND available_copies < total_copies",
        )
        .bind(closed.book_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(borrow)
    }

    /// List borrows with filters, newest first
    pub async fn list(&self, query: &BorrowQuery, now: DateTime<Utc>) -> AppResult<(Vec<BorrowDetailsRow>, i64)> {
        let (_, per_page, offset) = paginate(query.page, query.per_page);

        let mut conditions: Vec<&str> = Vec::new();
        let mut ids: Vec<i64> = Vec::new();
        let mut needs_now = false;

        match query.status {
            Some(BorrowStatus::Open) => conditions.push("br.returned_at IS NULL"),
            Some(BorrowStatus::Returned) => conditions.push("br.returned_at IS NOT NULL"),
            Some(BorrowStatus::Overdue) => {
                conditions.push("br.returned_at IS NULL AND br.due_at < ?");
                needs_now = true;
            }
            None => {}
        }

        if let Some(member_id) = query.member_id {
            conditions.push("br.member_id = ?");
            ids.push(member_id);
        }

        if let Some(book_id) = query.book_id {
            conditions.push("br.book_id = ?");
            ids.push(book_id);
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!(
            "SELECT COUNT(*) FROM borrows br {}",
            where_clause
        );
        let cutoff = overdue_cutoff(now);
        let mut count_builder = sqlx::query_scalar::<_, i64>(&count_query);
        if needs_now {
            count_builder = count_builder.bind(cutoff);
        }
        for id in &ids {
            count_builder = count_builder.bind(id);
        }
        let total = count_builder.fetch_one(&self.pool).await?;

        let select_query = format!(
            "{} {} ORDER BY br.issued_at DESC, br.id DESC LIMIT {} OFFSET {}",
            DETAILS_SELECT, where_clause, per_page, offset
        );
        let mut select_builder = sqlx::query_as::<_, BorrowDetailsRow>(&select_query);
        if needs_now {
            select_builder = select_builder.bind(cutoff);
        }
        for id in &ids {
            select_builder = select_builder.bind(id);
        }
        let rows = select_builder.fetch_all(&self.pool).await?;

        Ok((rows, total))
    }

    /// Open borrows past their due date, most overdue first
    pub async fn overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowDetailsRow>> {
        let query = format!(
            "{} WHERE br.returned_at IS NULL AND br.due_at < ? ORDER BY br.due_at, br.id",
            DETAILS_SELECT
        );
        let rows = sqlx::query_as::<_, BorrowDetailsRow>(&query)
            .bind(overdue_cutoff(now))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Open borrows of one member, soonest due first
    pub async fn open_for_member(&self, member_id: i64) -> AppResult<Vec<BorrowDetailsRow>> {
        let query = format!(
            "{} WHERE br.member_id = ? AND br.returned_at IS NULL ORDER BY br.due_at, br.id",
            DETAILS_SELECT
        );
        let rows = sqlx::query_as::<_, BorrowDetailsRow>(&query)
            .bind(member_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Open and overdue borrow counts of one member
    pub async fn counts_for_member(&self, member_id: i64, now: DateTime<Utc>) -> AppResult<(i64, i64)> {
        let counts: (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN due_at < ? THEN 1 ELSE 0 END), 0)
            FROM borrows
            WHERE member_id = ? AND returned_at IS NULL
            "#,
        )
        .bind(overdue_cutoff(now))
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    /// Count open borrows
    pub async fn count_open(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrows WHERE returned_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count overdue borrows
    pub async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrows WHERE returned_at IS NULL AND due_at < ?",
        )
        .bind(overdue_cutoff(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
