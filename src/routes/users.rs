//! Admin-only user listing.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::AccessClaims;
use crate::coordinator::{AuthCoordinator, DEFAULT_PAGE_SIZE};
use crate::directory::{UserProjection, ADMIN_ROLE};
use crate::error::{AppError, AuthError};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub page: u32,
    pub page_size: u32,
    pub users: Vec<UserProjection>,
}

/// GET /users?page=&pageSize=
///
/// **Requires the `Admin` role claim.**
///
/// # Errors
/// - 400: page < 1 or pageSize outside 1..=100
/// - 401: Missing or invalid token (handled by middleware)
/// - 403: Caller is not an admin
pub async fn list_users(
    claims: web::ReqData<AccessClaims>,
    query: web::Query<ListUsersQuery>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    if !claims.has_role(ADMIN_ROLE) {
        tracing::warn!(user_id = %claims.sub, "User listing without admin role");
        return Err(AuthError::Forbidden(ADMIN_ROLE.to_string()).into());
    }

    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let users = coordinator.list_users(page, page_size).await?;

    Ok(HttpResponse::Ok().json(UserPage {
        page,
        page_size,
        users,
    }))
}
