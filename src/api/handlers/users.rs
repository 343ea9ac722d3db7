//! Account management handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::handlers::parse_user_id;
use crate::api::routes::ApiState;
use crate::auth::account_service::{CreateUserRequest, UpdateUserRequest};
use crate::auth::gate::{require_admin, require_admin_or_self};
use crate::auth::models::{AuthContext, User};
use crate::domain::UserId;

/// Account as exposed over HTTP. Never carries the password hash or token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<String>,
    pub permanent_api_token: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            roles: user.role_names(),
            permanent_api_token: user.permanent_api_token,
            created_at: user.created_at,
        }
    }
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn list_users_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    require_admin(&context, &state.admin_role)?;
    let users = state.accounts.list_users().await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn get_user_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin_or_self(&context, &state.admin_role, &id)?;
    let user = state.accounts.get_user(&id).await?;
    Ok(Json(UserView::from(&user)))
}

#[instrument(skip(state, context, payload), fields(caller = %context.username(), username = %payload.username))]
pub async fn create_user_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    require_admin(&context, &state.admin_role)?;
    let user = state.accounts.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

#[instrument(skip(state, context, payload), fields(caller = %context.username()))]
pub async fn update_user_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin_or_self(&context, &state.admin_role, &id)?;
    let user = state.accounts.update_user(&id, payload).await?;
    Ok(Json(UserView::from(&user)))
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn delete_user_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin_or_self(&context, &state.admin_role, &id)?;
    state.accounts.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
