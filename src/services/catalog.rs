//! Catalog management service

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookQuery, CreateBook, UpdateBook},
        validation::check_isbn,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search books with filters
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.repository.books.search(query).await
    }

    /// Get book by ID
    pub async fn get_book(&self, id: i64) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Add a book to the catalog
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;
        let isbn = check_isbn(book.isbn.as_deref())?;

        if let Some(ref isbn) = isbn {
            if self.repository.books.isbn_exists(isbn, None).await? {
                return Err(AppError::Conflict(format!("ISBN {} already exists", isbn)));
            }
        }

        let created = self.repository.books.create(&book, isbn).await?;
        tracing::info!(
            "Catalog: added '{}' (id={}, {} copies)",
            created.title, created.id, created.total_copies
        );
        Ok(created)
    }

    /// Update a book; the copy count cannot drop below the copies on loan
    pub async fn update_book(&self, id: i64, update: UpdateBook) -> AppResult<Book> {
        update.validate()?;
        let isbn = check_isbn(update.isbn.as_deref())?;

        if let Some(ref isbn) = isbn {
            if self.repository.books.isbn_exists(isbn, Some(id)).await? {
                return Err(AppError::Conflict(format!("ISBN {} already exists", isbn)));
            }
        }

        self.repository.books.update(id, &update, isbn).await
    }

    /// Remove a book; refused while a copy is on loan
    pub async fn delete_book(&self, id: i64) -> AppResult<()> {
        self.repository.books.delete(id).await?;
        tracing::info!("Catalog: deleted book id={}", id);
        Ok(())
    }
}
