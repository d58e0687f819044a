//! Books repository for database operations

use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
};

use super::{like_pattern, paginate};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Sqlite>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a catalog book by ID; archived books are not found
    pub async fn get_by_id(&self, id: i64) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ? AND archived_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Check if an ISBN is already used by another catalog book
    pub async fn isbn_exists(&self, isbn: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM books \
             WHERE isbn = ? AND id != COALESCE(?, -1) AND archived_at IS NULL)",
        )
        .bind(isbn)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Search books with pagination, ordered by title
    pub async fn search(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let (_, per_page, offset) = paginate(query.page, query.per_page);

        let mut conditions = vec!["archived_at IS NULL".to_string()];
        let mut params: Vec<String> = Vec::new();

        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            conditions.push(
                "(LOWER(title) LIKE ? OR LOWER(author) LIKE ? \
                 OR LOWER(COALESCE(category, '')) LIKE ? OR COALESCE(isbn, '') LIKE ?)"
                    .to_string(),
            );
            params.extend(std::iter::repeat(pattern).take(4));
        }

        if query.available_only.unwrap_or(false) {
            conditions.push("available_copies > 0".to_string());
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_query = format!("SELECT COUNT(*) FROM books {}", where_clause);
        let mut count_builder = sqlx::query_scalar::<_, i64>(&count_query);
        for param in &params {
            count_builder = count_builder.bind(param);
        }
        let total = count_builder.fetch_one(&self.pool).await?;

        let select_query = format!(
            "SELECT * FROM books {} ORDER BY title COLLATE NOCASE, id LIMIT {} OFFSET {}",
            where_clause, per_page, offset
        );
        let mut select_builder = sqlx::query_as::<_, Book>(&select_query);
        for param in &params {
            select_builder = select_builder.bind(param);
        }
        let books = select_builder.fetch_all(&self.pool).await?;

        Ok((books, total))
    }

    /// Create a new book with every copy on the shelf
    pub async fn create(&self, book: &CreateBook, isbn: Option<String>) -> AppResult<Book> {
        let copies = book.total_copies.unwrap_or(1);

        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, author, isbn, category, publisher, publication_year,
                               total_copies, available_copies, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(book.title.trim())
        .bind(book.author.trim())
        .bind(isbn)
        .bind(&book.category)
        .bind(&book.publisher)
        .bind(book.publication_year)
        .bind(copies)
        .bind(copies)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::unique_violation(e, "ISBN already exists"))
    }

    /// Update a book. A new copy count keeps the copies on loan and
    /// recomputes what is left on the shelf.
    pub async fn update(&self, id: i64, update: &UpdateBook, isbn: Option<String>) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ? AND archived_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let total_copies = update.total_copies.unwrap_or(current.total_copies);
        let available_copies = total_copies - current.copies_on_loan();
        if available_copies < 0 {
            return Err(AppError::BusinessRule(format!(
                "Cannot reduce total copies below issued copies ({} on loan)",
                current.copies_on_loan()
            )));
        }

        let updated = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = COALESCE(?, title),
                author = COALESCE(?, author),
                isbn = COALESCE(?, isbn),
                category = COALESCE(?, category),
                publisher = COALESCE(?, publisher),
                publication_year = COALESCE(?, publication_year),
                total_copies = ?,
                available_copies = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(update.title.as_deref().map(str::trim))
        .bind(update.author.as_deref().map(str::trim))
        .bind(isbn)
        .bind(&update.category)
        .bind(&update.publisher)
        .bind(update.publication_year)
        .bind(total_copies)
        .bind(available_copies)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::unique_violation(e, "ISBN already exists"))?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Remove a book from the catalog. The row is archived, not deleted, so
    /// its borrows and the fees charged on them stay on record. Refused while
    /// a copy is on loan.
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // every copy back on the shelf means no borrow of this book is open
        let archived = sqlx::query(
            "UPDATE books SET archived_at = ? \
             WHERE id = ? AND archived_at IS NULL AND available_copies = total_copies",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if archived.rows_affected() == 0 {
            let in_catalog: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM books WHERE id = ? AND archived_at IS NULL)",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            return Err(if in_catalog {
                AppError::HasOpenBorrows(format!("Book {}", id))
            } else {
                AppError::NotFound(format!("Book with id {} not found", id))
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::connect_in_memory;

    fn new_book(title: &str, author: &str, copies: i64) -> CreateBook {
        CreateBook {
            title: title.to_string(),
            author: author.to_string(),
            isbn: None,
            category: Some("Fiction".to_string()),
            publisher: None,
            publication_year: Some(1965),
            total_copies: Some(copies),
        }
    }

    #[tokio::test]
    async fn create_starts_with_all_copies_available() {
        let repo = BooksRepository::new(connect_in_memory().await.unwrap());
        let book = repo.create(&new_book("Dune", "Frank Herbert", 3), None).await.unwrap();
        assert_eq!(book.total_copies, 3);
        assert_eq!(book.available_copies, 3);
    }

    #[tokio::test]
    async fn duplicate_isbn_is_a_conflict() {
        let repo = BooksRepository::new(connect_in_memory().await.unwrap());
        repo.create(&new_book("Dune", "Frank Herbert", 1), Some("9780441013593".into()))
            .await
            .unwrap();
        let err = repo
            .create(&new_book("Dune (copy)", "Frank Herbert", 1), Some("9780441013593".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(repo.isbn_exists("9780441013593", None).await.unwrap());
    }

    #[tokio::test]
    async fn search_matches_substrings_case_insensitively() {
        let repo = BooksRepository::new(connect_in_memory().await.unwrap());
        repo.create(&new_book("Dune", "Frank Herbert", 1), None).await.unwrap();
        repo.create(&new_book("Emma", "Jane Austen", 1), None).await.unwrap();
        repo.create(&new_book("Persuasion", "Jane Austen", 1), None).await.unwrap();

        let query = BookQuery {
            search: Some("AUSTEN".into()),
            ..Default::default()
        };
        let (books, total) = repo.search(&query).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(books[0].title, "Emma");
        assert_eq!(books[1].title, "Persuasion");
    }

    #[tokio::test]
    async fn delete_missing_book_is_not_found() {
        let repo = BooksRepository::new(connect_in_memory().await.unwrap());
        assert!(matches!(repo.delete(42).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleted_book_leaves_the_catalog_and_frees_its_isbn() {
        let repo = BooksRepository::new(connect_in_memory().await.unwrap());
        let book = repo
            .create(&new_book("Dune", "Frank Herbert", 2), Some("9780441013593".into()))
            .await
            .unwrap();

        repo.delete(book.id).await.unwrap();

        assert!(matches!(repo.get_by_id(book.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(repo.delete(book.id).await, Err(AppError::NotFound(_))));
        let (books, total) = repo.search(&BookQuery::default()).await.unwrap();
        assert!(books.is_empty());
        assert_eq!(total, 0);

        assert!(!repo.isbn_exists("9780441013593", None).await.unwrap());
        repo.create(&new_book("Dune", "Frank Herbert", 1), Some("9780441013593".into()))
            .await
            .unwrap();
    }
}
