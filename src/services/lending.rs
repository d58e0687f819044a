//! Lending desk: issuing and returning books, late fees, borrow listings

use chrono::{Duration, Utc};

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowDetails, BorrowDetailsRow, BorrowQuery, IssueBorrow},
        member::MemberClaims,
    },
    repository::{borrows::IssueLimits, Repository},
};

#[derive(Clone)]
pub struct LendingService {
    repository: Repository,
    config: LendingConfig,
}

impl LendingService {
    pub fn new(repository: Repository, config: LendingConfig) -> Self {
        Self { repository, config }
    }

    fn details(&self, row: BorrowDetailsRow) -> BorrowDetails {
        BorrowDetails::from_row(row, Utc::now(), self.config.fine_per_day_cents)
    }

    /// Issue one copy of a book to a member
    pub async fn issue(&self, request: IssueBorrow) -> AppResult<BorrowDetails> {
        let member = self.repository.members.get_by_id(request.member_id).await?;
        if !member.is_active {
            return Err(AppError::MemberInactive(member.id));
        }

        let book = self.repository.books.get_by_id(request.book_id).await?;

        let now = Utc::now();
        let due_at = match request.due_at {
            Some(due_at) if due_at <= now => {
                return Err(AppError::Validation("Due date must be in the future".to_string()));
            }
            Some(due_at) => due_at,
            None => now + Duration::days(self.config.loan_period_days),
        };

        let limits = IssueLimits {
            max_active_borrows: self.config.max_active_borrows,
        };

        let borrow = self
            .repository
            .borrows
            .issue(book.id, member.id, now, due_at, limits)
            .await?;

        tracing::info!(
            "Issued '{}' (book {}) to {} (member {}), due {}",
            book.title,
            book.id,
            member.username,
            member.id,
            due_at.format("%Y-%m-%d")
        );

        let row = self.repository.borrows.get_details(borrow.id).await?;
        Ok(self.details(row))
    }

    /// Return a borrowed book. Staff may return any borrow, members only their own.
    pub async fn return_borrow(&self, actor: &MemberClaims, borrow_id: i64) -> AppResult<BorrowDetails> {
        let borrow = self.repository.borrows.get_by_id(borrow_id).await?;
        if !actor.is_staff() && borrow.member_id != actor.member_id {
            return Err(AppError::Authorization(
                "You can only return your own borrows".to_string(),
            ));
        }

        let returned = self
            .repository
            .borrows
            .return_borrow(borrow_id, Utc::now(), self.config.fine_per_day_cents)
            .await?;

        if returned.late_fee_cents > 0 {
            tracing::info!(
                "Borrow {} returned late, fee {} cents",
                returned.id,
                returned.late_fee_cents
            );
        } else {
            tracing::info!("Borrow {} returned", returned.id);
        }

        let row = self.repository.borrows.get_details(returned.id).await?;
        Ok(self.details(row))
    }

    /// List borrows with filters
    pub async fn list(&self, query: &BorrowQuery) -> AppResult<(Vec<BorrowDetails>, i64)> {
        let (rows, total) = self.repository.borrows.list(query, Utc::now()).await?;
        Ok((rows.into_iter().map(|row| self.details(row)).collect(), total))
    }

    /// Open borrows past their due date, with the fee accrued so far
    pub async fn overdue(&self) -> AppResult<Vec<BorrowDetails>> {
        let rows = self.repository.borrows.overdue(Utc::now()).await?;
        Ok(rows.into_iter().map(|row| self.details(row)).collect())
    }

    /// Books a member currently holds
    pub async fn member_borrows(&self, member_id: i64) -> AppResult<Vec<BorrowDetails>> {
        self.repository.members.get_by_id(member_id).await?;
        let rows = self.repository.borrows.open_for_member(member_id).await?;
        Ok(rows.into_iter().map(|row| self.details(row)).collect())
    }

    pub async fn count_open(&self) -> AppResult<i64> {
        self.repository.borrows.count_open().await
    }

    pub async fn count_overdue(&self) -> AppResult<i64> {
        self.repository.borrows.count_overdue(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            book::{Book, CreateBook, UpdateBook},
            borrow::{overdue_cutoff, BorrowStatus, cents_to_amount},
            member::{Member, Role, UpdateMember},
        },
        config::DatabaseConfig,
        repository::{connect, connect_in_memory, members::NewMember, MIGRATOR},
        services::stats::StatsService,
    };
    use sqlx::{Pool, Sqlite};

    struct Desk {
        repository: Repository,
        lending: LendingService,
    }

    async fn desk() -> Desk {
        desk_on(connect_in_memory().await.unwrap())
    }

    fn desk_on(pool: Pool<Sqlite>) -> Desk {
        let repository = Repository::new(pool);
        let lending = LendingService::new(repository.clone(), LendingConfig::default());
        Desk { repository, lending }
    }

    impl Desk {
        async fn book(&self, copies: i64) -> Book {
            self.repository
                .books
                .create(
                    &CreateBook {
                        title: "The Left Hand of Darkness".into(),
                        author: "Ursula K. Le Guin".into(),
                        isbn: None,
                        category: Some("Science Fiction".into()),
                        publisher: None,
                        publication_year: Some(1969),
                        total_copies: Some(copies),
                    },
                    None,
                )
                .await
                .unwrap()
        }

        async fn member(&self, username: &str) -> Member {
            let email = format!("{}@example.com", username);
            self.repository
                .members
                .create(NewMember {
                    username,
                    email: &email,
                    full_name: "Genly Ai",
                    phone: None,
                    address: None,
                    password_hash: "x".into(),
                    role: Role::Member,
                })
                .await
                .unwrap()
        }

        async fn issue(&self, book: &Book, member: &Member) -> AppResult<BorrowDetails> {
            self.lending
                .issue(IssueBorrow {
                    book_id: book.id,
                    member_id: member.id,
                    due_at: None,
                })
                .await
        }

        async fn available(&self, book: &Book) -> i64 {
            self.repository.books.get_by_id(book.id).await.unwrap().available_copies
        }

        async fn set_due(&self, borrow_id: i64, due_at: chrono::DateTime<Utc>) {
            sqlx::query("UPDATE borrows SET due_at = ? WHERE id = ?")
                .bind(due_at)
                .bind(borrow_id)
                .execute(&self.repository.pool)
                .await
                .unwrap();
        }
    }

    fn staff() -> MemberClaims {
        MemberClaims {
            sub: "librarian".into(),
            member_id: 0,
            role: Role::Librarian,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    fn as_member(member: &Member) -> MemberClaims {
        MemberClaims {
            sub: member.username.clone(),
            member_id: member.id,
            role: Role::Member,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn issue_and_return_move_availability() {
        let desk = desk().await;
        let book = desk.book(2).await;
        let member = desk.member("genly").await;

        let borrow = desk.issue(&book, &member).await.unwrap();
        assert_eq!(borrow.status, BorrowStatus::Open);
        assert_eq!(borrow.due_at - borrow.issued_at, Duration::days(14));
        assert_eq!(desk.available(&book).await, 1);

        let returned = desk.lending.return_borrow(&staff(), borrow.id).await.unwrap();
        assert_eq!(returned.status, BorrowStatus::Returned);
        assert_eq!(returned.late_fee, cents_to_amount(0));
        assert_eq!(desk.available(&book).await, 2);
    }

    #[tokio::test]
    async fn no_copy_left_creates_no_borrow() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let first = desk.member("first").await;
        let second = desk.member("second").await;

        desk.issue(&book, &first).await.unwrap();
        assert!(matches!(
            desk.issue(&book, &second).await,
            Err(AppError::BookNotAvailable(id)) if id == book.id
        ));
        assert_eq!(desk.available(&book).await, 0);
        assert_eq!(desk.lending.count_open().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn double_return_changes_nothing() {
        let desk = desk().await;
        let book = desk.book(3).await;
        let member = desk.member("genly").await;

        let borrow = desk.issue(&book, &member).await.unwrap();
        desk.lending.return_borrow(&staff(), borrow.id).await.unwrap();
        assert!(matches!(
            desk.lending.return_borrow(&staff(), borrow.id).await,
            Err(AppError::AlreadyReturned(_))
        ));
        assert_eq!(desk.available(&book).await, 3);
        assert!(matches!(
            desk.lending.return_borrow(&staff(), 9999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn same_book_twice_and_borrow_limit() {
        let desk = desk().await;
        let member = desk.member("genly").await;
        let book = desk.book(5).await;

        desk.issue(&book, &member).await.unwrap();
        assert!(matches!(desk.issue(&book, &member).await, Err(AppError::Conflict(_))));
        assert_eq!(desk.available(&book).await, 4);

        for _ in 1..LendingConfig::default().max_active_borrows {
            let other = desk.book(1).await;
            desk.issue(&other, &member).await.unwrap();
        }
        let one_too_many = desk.book(1).await;
        assert!(matches!(
            desk.issue(&one_too_many, &member).await,
            Err(AppError::BusinessRule(_))
        ));
        assert_eq!(desk.available(&one_too_many).await, 1);
    }

    #[tokio::test]
    async fn inactive_member_cannot_borrow() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let update = UpdateMember {
            is_active: Some(false),
            ..Default::default()
        };
        desk.repository.members.update(member.id, &update, None, None).await.unwrap();

        assert!(matches!(
            desk.issue(&book, &member).await,
            Err(AppError::MemberInactive(_))
        ));
        assert_eq!(desk.available(&book).await, 1);
    }

    #[tokio::test]
    async fn due_date_in_the_past_is_rejected() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let request = IssueBorrow {
            book_id: book.id,
            member_id: member.id,
            due_at: Some(Utc::now() - Duration::days(1)),
        };
        assert!(matches!(desk.lending.issue(request).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn late_return_is_charged_per_day() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let borrow = desk.issue(&book, &member).await.unwrap();

        desk.set_due(borrow.id, Utc::now() - Duration::days(3)).await;

        let overdue = desk.lending.overdue().await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].status, BorrowStatus::Overdue);
        assert_eq!(overdue[0].late_fee, cents_to_amount(300));

        let returned = desk.lending.return_borrow(&staff(), borrow.id).await.unwrap();
        assert_eq!(returned.days_overdue, 3);
        assert_eq!(returned.late_fee, cents_to_amount(300));
        assert!(desk.lending.overdue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_return_only_their_own_borrows() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let owner = desk.member("owner").await;
        let stranger = desk.member("stranger").await;
        let borrow = desk.issue(&book, &owner).await.unwrap();

        assert!(matches!(
            desk.lending.return_borrow(&as_member(&stranger), borrow.id).await,
            Err(AppError::Authorization(_))
        ));
        desk.lending.return_borrow(&as_member(&owner), borrow.id).await.unwrap();
    }

    #[tokio::test]
    async fn open_borrow_blocks_deletion() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let borrow = desk.issue(&book, &member).await.unwrap();

        assert!(matches!(
            desk.repository.books.delete(book.id).await,
            Err(AppError::HasOpenBorrows(_))
        ));
        assert!(matches!(
            desk.repository.members.delete(member.id).await,
            Err(AppError::HasOpenBorrows(_))
        ));

        desk.lending.return_borrow(&staff(), borrow.id).await.unwrap();
        desk.repository.books.delete(book.id).await.unwrap();
        assert!(matches!(
            desk.repository.books.get_by_id(book.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            desk.lending.return_borrow(&staff(), borrow.id).await,
            Err(AppError::AlreadyReturned(_))
        ));

        desk.repository.members.delete(member.id).await.unwrap();
        assert!(matches!(
            desk.lending.return_borrow(&staff(), borrow.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_book_keeps_its_fee_history() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let borrow = desk.issue(&book, &member).await.unwrap();
        desk.set_due(borrow.id, Utc::now() - Duration::days(3)).await;
        desk.lending.return_borrow(&staff(), borrow.id).await.unwrap();

        desk.repository.books.delete(book.id).await.unwrap();

        let stats = StatsService::new(desk.repository.clone()).get_stats().await.unwrap();
        assert_eq!(stats.total_fees, cents_to_amount(300));
        assert_eq!(stats.books, 0);

        let query = BorrowQuery {
            member_id: Some(member.id),
            ..Default::default()
        };
        let (history, total) = desk.lending.list(&query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].status, BorrowStatus::Returned);
        assert_eq!(history[0].book_title, book.title);
        assert_eq!(history[0].late_fee, cents_to_amount(300));
    }

    #[tokio::test]
    async fn due_earlier_today_is_not_overdue() {
        let desk = desk().await;
        let book = desk.book(1).await;
        let member = desk.member("genly").await;
        let borrow = desk.issue(&book, &member).await.unwrap();

        let now = Utc::now();
        let start_of_today = overdue_cutoff(now);
        assert!(start_of_today <= now);
        desk.set_due(borrow.id, start_of_today).await;

        assert!(desk.lending.overdue().await.unwrap().is_empty());
        assert_eq!(desk.lending.count_overdue().await.unwrap(), 0);
        let (open, _) = desk.lending.list(&BorrowQuery::default()).await.unwrap();
        assert_eq!(open[0].status, BorrowStatus::Open);
        assert_eq!(open[0].late_fee, cents_to_amount(0));
        let query = BorrowQuery {
            status: Some(BorrowStatus::Overdue),
            ..Default::default()
        };
        assert_eq!(desk.lending.list(&query).await.unwrap().1, 0);
        assert_eq!(
            desk.repository.borrows.counts_for_member(member.id, Utc::now()).await.unwrap(),
            (1, 0)
        );

        desk.set_due(borrow.id, start_of_today - Duration::seconds(1)).await;
        assert_eq!(desk.lending.count_overdue().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn copies_cannot_drop_below_loans() {
        let desk = desk().await;
        let book = desk.book(2).await;
        desk.issue(&book, &desk.member("one").await).await.unwrap();
        desk.issue(&book, &desk.member("two").await).await.unwrap();

        let shrink = UpdateBook {
            total_copies: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            desk.repository.books.update(book.id, &shrink, None).await,
            Err(AppError::BusinessRule(_))
        ));

        let grow = UpdateBook {
            total_copies: Some(4),
            ..Default::default()
        };
        let grown = desk.repository.books.update(book.id, &grow, None).await.unwrap();
        assert_eq!(grown.available_copies, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_issues_never_over_lend() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("libris.db").display()),
            max_connections: 8,
            min_connections: 1,
        };
        let pool = connect(&config).await.unwrap();
        MIGRATOR.run(&pool).await.unwrap();
        let desk = desk_on(pool);

        let book = desk.book(2).await;
        let mut members = Vec::new();
        for i in 0..8 {
            members.push(desk.member(&format!("reader{}", i)).await);
        }

        let attempts = members.iter().map(|member| {
            let lending = desk.lending.clone();
            let request = IssueBorrow {
                book_id: book.id,
                member_id: member.id,
                due_at: None,
            };
            tokio::spawn(async move { lending.issue(request).await })
        });

        let mut issued = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            match attempt.await.unwrap() {
                Ok(_) => issued += 1,
                Err(AppError::BookNotAvailable(_)) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(issued, 2);
        assert_eq!(desk.available(&book).await, 0);
        assert_eq!(desk.lending.count_open().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn availability_stays_within_bounds() {
        let desk = desk().await;
        let book = desk.book(3).await;
        let mut open = Vec::new();
        for i in 0..3 {
            let member = desk.member(&format!("reader{}", i)).await;
            open.push(desk.issue(&book, &member).await.unwrap().id);
        }

        for (step, id) in open.into_iter().enumerate() {
            desk.lending.return_borrow(&staff(), id).await.unwrap();
            let current = desk.repository.books.get_by_id(book.id).await.unwrap();
            assert_eq!(current.available_copies, step as i64 + 1);
            assert!(current.available_copies <= current.total_copies);
        }
    }
}
