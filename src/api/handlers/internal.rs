//! Internal live feeds consumed by trusted services.

use axum::{
    extract::{Path, State},
    response::Response,
    Extension,
};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::api::error::ApiError;
use crate::api::routes::ApiState;
use crate::api::stream::{event_stream_response, feed};
use crate::auth::models::{AuthContext, UserDirectoryEvent};

/// Stream token and role changes of the caller's own account.
///
/// The first frame is built from the account as resolved by the gate. The
/// subscription is opened before that frame is produced so nothing published
/// in between is missed.
#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn watch_auth_changes_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Response, ApiError> {
    if username != context.username() {
        warn!(requested = %username, "Refusing to watch another account");
        return Err(ApiError::unauthorized("Cannot watch another account"));
    }
    if context.user.live_token(Utc::now()).is_none() {
        return Err(ApiError::unauthorized("API token expired"));
    }

    let subscription = state.token_manager.watch_user(&username);
    let first = state
        .token_manager
        .auth_update_for(&context.user)
        .ok_or_else(|| ApiError::unauthorized("API token expired"))?;

    info!(subscription_id = %subscription.id(), "Watching auth changes");
    Ok(event_stream_response(feed(vec![first], subscription)))
}

/// Stream every existing username, then live create/delete events.
#[instrument(skip(state, context), fields(caller = %context.username()))]
pub async fn user_directory_handler(
    State(state): State<ApiState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let subscription = state.token_manager.watch_directory();
    let snapshot = state
        .accounts
        .list_users()
        .await?
        .iter()
        .map(|user| UserDirectoryEvent::created(user.username.as_str()))
        .collect();

    info!(subscription_id = %subscription.id(), "Watching user directory");
    Ok(event_stream_response(feed(snapshot, subscription)))
}
