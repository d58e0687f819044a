//! Data models for Libris

pub mod book;
pub mod borrow;
pub mod member;
pub mod validation;

// Re-export commonly used types
pub use book::Book;
pub use borrow::{Borrow, BorrowDetails, BorrowStatus};
pub use member::{Member, MemberClaims, MemberShort, Role};
