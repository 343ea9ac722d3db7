//! API token handlers under `/users/{id}/api-token`.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::handlers::parse_user_id;
use crate::api::routes::ApiState;
use crate::auth::gate::{require_admin, require_admin_or_self};
use crate::auth::models::{AuthContext, AuthUpdateMessage, User};
use crate::errors::Error;

/// Token details returned to the account owner or an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTokenView {
    pub username: String,
    pub api_token: String,
    pub roles: Vec<String>,
    pub expires_at: String,
    pub permanent: bool,
}

impl From<AuthUpdateMessage> for ApiTokenView {
    fn from(message: AuthUpdateMessage) -> Self {
        Self {
            username: message.username,
            api_token: message.api_token,
            roles: message.roles,
            expires_at: message.expires_at,
            permanent: message.permanent,
        }
    }
}

fn view_of(state: &ApiState, user: &User) -> Result<ApiTokenView, ApiError> {
    state
        .token_manager
        .auth_update_for(user)
        .map(ApiTokenView::from)
        .ok_or_else(|| Error::not_found("api_token", user.username.as_str()).into())
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateApiTokenBody {
    pub permanent: bool,
}

#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn get_api_token_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiTokenView>, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin_or_self(&context, &state.admin_role, &id)?;

    let mut user = state.accounts.get_user(&id).await?;
    user.api_token = Some(state.token_manager.token_for(&user).await?);
    Ok(Json(view_of(&state, &user)?))
}

#[instrument(skip(state, context, body), fields(caller = %context.username(), permanent = body.permanent))]
pub async fn update_api_token_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateApiTokenBody>,
) -> Result<Json<ApiTokenView>, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin(&context, &state.admin_role)?;

    let user = state.accounts.set_permanent_api_token(&id, body.permanent).await?;
    Ok(Json(view_of(&state, &user)?))
}

/// Invalidate the current token and hand out a new one.
#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn regenerate_api_token_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiTokenView>, ApiError> {
    let id = parse_user_id(&id)?;
    require_admin_or_self(&context, &state.admin_role, &id)?;

    let user = state.accounts.regenerate_api_token(&id).await?;
    Ok(Json(view_of(&state, &user)?))
}
