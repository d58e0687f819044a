//! Lending desk endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::borrow::{BorrowDetails, BorrowQuery, IssueBorrow},
};

use super::{AuthenticatedUser, BorrowPage, PaginatedResponse};

/// Issue request from the lending desk
#[derive(Deserialize, ToSchema)]
pub struct IssueRequest {
    pub book_id: i64,
    pub member_id: i64,
    /// Overrides the default loan period; must be in the future
    pub due_at: Option<DateTime<Utc>>,
}

/// Self-service borrow request
#[derive(Deserialize, ToSchema)]
pub struct BorrowRequest {
    pub book_id: i64,
}

/// List borrows
#[utoipa::path(
    get,
    path = "/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(BorrowQuery),
    responses(
        (status = 200, description = "Borrows, newest first", body = BorrowPage),
        (status = 403, description = "Staff only")
    )
)]
pub async fn list_borrows(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<BorrowQuery>,
) -> AppResult<Json<PaginatedResponse<BorrowDetails>>> {
    claims.require_staff()?;

    let (borrows, total) = state.services.lending.list(&query).await?;
    Ok(Json(PaginatedResponse::new(borrows, total, query.page, query.per_page)))
}

/// List overdue borrows with the fee accrued so far
#[utoipa::path(
    get,
    path = "/borrows/overdue",
    tag = "borrows",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue borrows, most overdue first", body = Vec<BorrowDetails>),
        (status = 403, description = "Staff only")
    )
)]
pub async fn overdue_borrows(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    claims.require_staff()?;

    let borrows = state.services.lending.overdue().await?;
    Ok(Json(borrows))
}

/// Issue a book to a member
#[utoipa::path(
    post,
    path = "/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    request_body = IssueRequest,
    responses(
        (status = 201, description = "Book issued", body = BorrowDetails),
        (status = 400, description = "Due date in the past"),
        (status = 404, description = "Book or member not found"),
        (status = 409, description = "No copy available, or the member already holds this book"),
        (status = 422, description = "Member inactive or borrow limit reached")
    )
)]
pub async fn issue_borrow(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<IssueRequest>,
) -> AppResult<(StatusCode, Json<BorrowDetails>)> {
    claims.require_staff()?;

    let borrow = state
        .services
        .lending
        .issue(IssueBorrow {
            book_id: request.book_id,
            member_id: request.member_id,
            due_at: request.due_at,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(borrow)))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/borrows/{id}/return",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Borrow ID")),
    responses(
        (status = 200, description = "Book returned, late fee applied", body = BorrowDetails),
        (status = 403, description = "Not your borrow"),
        (status = 404, description = "Borrow not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_borrow(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<BorrowDetails>> {
    let borrow = state.services.lending.return_borrow(&claims, id).await?;
    Ok(Json(borrow))
}

/// Books a member currently holds
#[utoipa::path(
    get,
    path = "/members/{id}/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Member ID")),
    responses(
        (status = 200, description = "Open borrows, soonest due first", body = Vec<BorrowDetails>),
        (status = 404, description = "Member not found")
    )
)]
pub async fn member_borrows(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(member_id): Path<i64>,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    claims.require_staff()?;

    let borrows = state.services.lending.member_borrows(member_id).await?;
    Ok(Json(borrows))
}

/// Books the authenticated member currently holds
#[utoipa::path(
    get,
    path = "/me/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Open borrows, soonest due first", body = Vec<BorrowDetails>)
    )
)]
pub async fn my_borrows(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    let borrows = state.services.lending.member_borrows(claims.member_id).await?;
    Ok(Json(borrows))
}

/// Borrow a book for oneself
#[utoipa::path(
    post,
    path = "/me/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Book issued", body = BorrowDetails),
        (status = 404, description = "Book not found"),
        (status = 409, description = "No copy available, or already borrowed"),
        (status = 422, description = "Account inactive or borrow limit reached")
    )
)]
pub async fn borrow_for_self(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<BorrowDetails>)> {
    let borrow = state
        .services
        .lending
        .issue(IssueBorrow {
            book_id: request.book_id,
            member_id: claims.member_id,
            due_at: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(borrow)))
}
