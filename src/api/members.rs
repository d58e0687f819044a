//! Member management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::member::{CreateMember, Member, MemberDetails, MemberQuery, MemberShort, UpdateMember},
};

use super::{AuthenticatedUser, MemberPage, PaginatedResponse};

/// List members
#[utoipa::path(
    get,
    path = "/members",
    tag = "members",
    security(("bearer_auth" = [])),
    params(MemberQuery),
    responses(
        (status = 200, description = "Members ordered by name", body = MemberPage),
        (status = 403, description = "Staff only")
    )
)]
pub async fn list_members(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<MemberQuery>,
) -> AppResult<Json<PaginatedResponse<MemberShort>>> {
    claims.require_staff()?;

    let (members, total) = state.services.members.search_members(&query).await?;
    Ok(Json(PaginatedResponse::new(members, total, query.page, query.per_page)))
}

/// Get member by ID, with open-borrow counts
#[utoipa::path(
    get,
    path = "/members/{id}",
    tag = "members",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Member ID")),
    responses(
        (status = 200, description = "Member details", body = MemberDetails),
        (status = 404, description = "Member not found")
    )
)]
pub async fn get_member(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<MemberDetails>> {
    claims.require_staff()?;

    let member = state.services.members.get_details(id).await?;
    Ok(Json(member))
}

/// Create a member account
#[utoipa::path(
    post,
    path = "/members",
    tag = "members",
    security(("bearer_auth" = [])),
    request_body = CreateMember,
    responses(
        (status = 201, description = "Member created", body = Member),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Staff only; staff accounts need an administrator"),
        (status = 409, description = "Username or email already exists")
    )
)]
pub async fn create_member(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(member): Json<CreateMember>,
) -> AppResult<(StatusCode, Json<Member>)> {
    claims.require_staff()?;

    let created = state.services.members.create_member(&claims, member).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Update a member
#[utoipa::path(
    put,
    path = "/members/{id}",
    tag = "members",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Member ID")),
    request_body = UpdateMember,
    responses(
        (status = 200, description = "Member updated", body = Member),
        (status = 403, description = "Role changes need an administrator"),
        (status = 404, description = "Member not found"),
        (status = 409, description = "Email already exists")
    )
)]
pub async fn update_member(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(update): Json<UpdateMember>,
) -> AppResult<Json<Member>> {
    claims.require_staff()?;

    let member = state.services.members.update_member(&claims, id, update).await?;
    Ok(Json(member))
}

/// Delete a member
#[utoipa::path(
    delete,
    path = "/members/{id}",
    tag = "members",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Member ID")),
    responses(
        (status = 204, description = "Member deleted"),
        (status = 403, description = "Administrators only"),
        (status = 404, description = "Member not found"),
        (status = 409, description = "Member has open borrows")
    )
)]
pub async fn delete_member(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    claims.require_admin()?;

    state.services.members.delete_member(&claims, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
