//! Statistics endpoints

use axum::{extract::State, Json};

use crate::{error::AppResult, services::stats::LibraryStats};

use super::AuthenticatedUser;

/// Library-wide totals
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Library statistics", body = LibraryStats),
        (status = 403, description = "Staff only")
    )
)]
pub async fn get_stats(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<LibraryStats>> {
    claims.require_staff()?;

    let stats = state.services.stats.get_stats().await?;
    Ok(Json(stats))
}
