//! Login and logout.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{debug, instrument};

use crate::api::error::ApiError;
use crate::api::handlers::users::UserView;
use crate::api::routes::ApiState;
use crate::auth::account_service::LoginRequest;
use crate::auth::session::SESSION_COOKIE_NAME;

/// Response wrapper that includes both JSON body and Set-Cookie header
pub struct LoginResponse {
    body: UserView,
    cookie: Cookie<'static>,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Json(self.body)).into_response();
        if let Ok(cookie_value) = self.cookie.to_string().parse() {
            response.headers_mut().insert(header::SET_COOKIE, cookie_value);
        }
        response
    }
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn login_handler(
    State(state): State<ApiState>,
    Json(payload): Json<LoginRequest>,
) -> Result<LoginResponse, ApiError> {
    let (user, session) = state.accounts.login(payload).await?;
    Ok(LoginResponse { body: UserView::from(&user), cookie: state.sessions.cookie(&session) })
}

pub async fn logout_handler(State(state): State<ApiState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        let destroyed = state.accounts.logout(cookie.value());
        debug!(destroyed, "Logout");
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(cookie_value) = state.sessions.removal_cookie().to_string().parse() {
        response.headers_mut().insert(header::SET_COOKIE, cookie_value);
    }
    response
}
