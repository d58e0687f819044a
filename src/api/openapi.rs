//! OpenAPI documentation

use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::api::{auth, books, borrows, health, members, stats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Libris API",
        version = "1.0.0",
        description = "Library lending REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::register,
        auth::login,
        auth::me,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Members
        members::list_members,
        members::get_member,
        members::create_member,
        members::update_member,
        members::delete_member,
        // Borrows
        borrows::list_borrows,
        borrows::overdue_borrows,
        borrows::issue_borrow,
        borrows::return_borrow,
        borrows::member_borrows,
        borrows::my_borrows,
        borrows::borrow_for_self,
        // Stats
        stats::get_stats,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::LoginResponse,
            crate::models::member::RegisterMember,
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            crate::api::BookPage,
            // Members
            crate::models::member::Role,
            crate::models::member::Member,
            crate::models::member::MemberShort,
            crate::models::member::MemberDetails,
            crate::models::member::CreateMember,
            crate::models::member::UpdateMember,
            crate::api::MemberPage,
            // Borrows
            borrows::IssueRequest,
            borrows::BorrowRequest,
            crate::models::borrow::BorrowDetails,
            crate::models::borrow::BorrowStatus,
            crate::api::BorrowPage,
            // Stats
            crate::services::stats::LibraryStats,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration and login"),
        (name = "books", description = "Catalog management"),
        (name = "members", description = "Member management"),
        (name = "borrows", description = "Issuing and returning books"),
        (name = "stats", description = "Statistics")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serve the OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
