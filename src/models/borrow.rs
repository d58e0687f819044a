//! Borrow (loan of one book copy to one member) model and fee rules

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// Borrow model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Borrow {
    pub id: i64,
    pub book_id: i64,
    pub member_id: i64,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub late_fee_cents: i64,
}

/// Whole calendar days (UTC) between the due date and `at`; zero when not late
pub fn days_overdue(due_at: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at.date_naive() - due_at.date_naive()).num_days().max(0)
}

/// Start of the current UTC day. An open borrow is overdue once its due
/// instant falls before this, which is when `days_overdue` turns positive.
pub fn overdue_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Flat per-day late fee, in minor units
pub fn late_fee_cents(due_at: DateTime<Utc>, returned_at: DateTime<Utc>, fine_per_day_cents: i64) -> i64 {
    days_overdue(due_at, returned_at) * fine_per_day_cents
}

/// Convert minor units to a two-decimal amount
pub fn cents_to_amount(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Row joining a borrow with its book and member
#[derive(Debug, Clone, FromRow)]
pub struct BorrowDetailsRow {
    pub id: i64,
    pub book_id: i64,
    pub member_id: i64,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub late_fee_cents: i64,
    pub book_title: String,
    pub book_author: String,
    pub member_name: String,
    pub member_email: String,
}

/// Borrow with book and member details for display
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowDetails {
    pub id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub book_author: String,
    pub member_id: i64,
    pub member_name: String,
    pub member_email: String,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
    pub days_overdue: i64,
    /// Fee charged at return, or accrued so far while open
    #[schema(value_type = String, example = "3.00")]
    pub late_fee: Decimal,
}

impl BorrowDetails {
    /// Build display details; open borrows report the fee accrued as of `now`
    pub fn from_row(row: BorrowDetailsRow, now: DateTime<Utc>, fine_per_day_cents: i64) -> Self {
        let (status, days, fee_cents) = match row.returned_at {
            Some(returned_at) => (
                BorrowStatus::Returned,
                days_overdue(row.due_at, returned_at),
                row.late_fee_cents,
            ),
            None => {
                let days = days_overdue(row.due_at, now);
                let status = if days > 0 {
                    BorrowStatus::Overdue
                } else {
                    BorrowStatus::Open
                };
                (status, days, days * fine_per_day_cents)
            }
        };

        BorrowDetails {
            id: row.id,
            book_id: row.book_id,
            book_title: row.book_title,
            book_author: row.book_author,
            member_id: row.member_id,
            member_name: row.member_name,
            member_email: row.member_email,
            issued_at: row.issued_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
            status,
            days_overdue: days,
            late_fee: cents_to_amount(fee_cents),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Open,
    Overdue,
    Returned,
}

/// Borrow listing filters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BorrowQuery {
    pub status: Option<BorrowStatus>,
    pub member_id: Option<i64>,
    pub book_id: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Issue request as seen by the lending service
#[derive(Debug, Clone)]
pub struct IssueBorrow {
    pub book_id: i64,
    pub member_id: i64,
    /// Overrides the configured loan period
    pub due_at: Option<DateTime<Utc>>,
}
