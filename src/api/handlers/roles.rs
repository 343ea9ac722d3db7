//! Role membership handlers. Administrators only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::handlers::parse_user_id;
use crate::api::handlers::users::UserView;
use crate::api::routes::ApiState;
use crate::auth::gate::require_admin;
use crate::auth::models::AuthContext;

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRoleBody {
    pub name: String,
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn add_role_member_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path((role, id)): Path<(String, String)>,
) -> Result<Json<UserView>, ApiError> {
    require_admin(&context, &state.admin_role)?;
    let id = parse_user_id(&id)?;
    let user = state.accounts.add_role(&role, &id).await?;
    Ok(Json(UserView::from(&user)))
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn remove_role_member_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path((role, id)): Path<(String, String)>,
) -> Result<Json<UserView>, ApiError> {
    require_admin(&context, &state.admin_role)?;
    let id = parse_user_id(&id)?;
    let user = state.accounts.remove_role(&role, &id).await?;
    Ok(Json(UserView::from(&user)))
}

#[instrument(skip(state, context, body), fields(caller = %context.username(), to = %body.name))]
pub async fn rename_role_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(role): Path<String>,
    Json(body): Json<RenameRoleBody>,
) -> Result<StatusCode, ApiError> {
    require_admin(&context, &state.admin_role)?;
    state.accounts.rename_role(&role, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn delete_role_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(role): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&context, &state.admin_role)?;
    state.accounts.delete_role(&role).await?;
    Ok(StatusCode::NO_CONTENT)
}
