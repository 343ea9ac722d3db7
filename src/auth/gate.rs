//! Request gate: resolves the caller and keeps their token fresh.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use tracing::{debug, field, info_span, warn, Instrument};

use crate::api::error::ApiError;
use crate::auth::models::{AuthContext, CredentialKind, User};
use crate::auth::session::{SessionStore, SESSION_COOKIE_NAME};
use crate::auth::token_format::looks_like_api_token;
use crate::auth::token_manager::TokenManager;
use crate::domain::UserId;
use crate::errors::{Error, Result};
use crate::storage::{TokenRepository, UserRepository};

pub type GateState = Arc<RequestGate>;

pub struct RequestGate {
    sessions: Arc<SessionStore>,
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenRepository>,
    token_manager: Arc<TokenManager>,
}

impl RequestGate {
    pub fn new(
        sessions: Arc<SessionStore>,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenRepository>,
        token_manager: Arc<TokenManager>,
    ) -> Self {
        Self { sessions, users, tokens, token_manager }
    }

    /// Resolve the caller from the session cookie, else from a bearer token,
    /// then opportunistically issue a token if theirs is missing or expired.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let jar = CookieJar::from_headers(headers);
        let session_id = jar.get(SESSION_COOKIE_NAME).map(|cookie| cookie.value().to_string());

        let (mut user, via) = match (session_id, bearer_token(headers)) {
            (Some(id), None) => (self.resolve_session(&id).await?, CredentialKind::Session),
            (Some(id), Some(_)) if self.sessions.get(&id).is_some() => {
                (self.resolve_session(&id).await?, CredentialKind::Session)
            }
            (_, Some(token)) => (self.resolve_bearer(token).await?, CredentialKind::ApiToken),
            (None, None) => return Err(Error::unauthorized("Authentication required")),
        };

        if let Err(e) = self.token_manager.issue_if_absent_or_expired(&mut user).await {
            warn!(username = %user.username, error = %e, "Failed to refresh API token");
        }
        Ok(AuthContext::new(user, via))
    }

    async fn resolve_session(&self, id: &str) -> Result<User> {
        let session =
            self.sessions.get(id).ok_or_else(|| Error::unauthorized("Session expired"))?;

        match self.users.find_by_id(&session.user_id).await? {
            Some(user) if session.matches(&user) => Ok(user),
            _ => {
                self.sessions.destroy(id);
                debug!(username = %session.username, "Session no longer matches account");
                Err(Error::unauthorized("Session is no longer valid"))
            }
        }
    }

    async fn resolve_bearer(&self, token: &str) -> Result<User> {
        if !looks_like_api_token(token) {
            return Err(Error::unauthorized("Invalid or expired API token"));
        }
        let record = self
            .tokens
            .find_by_token(token)
            .await?
            .filter(|record| record.is_live(Utc::now()))
            .ok_or_else(|| Error::unauthorized("Invalid or expired API token"))?;

        self.users
            .find_by_id(&record.user_id)
            .await?
            .ok_or_else(|| Error::unauthorized("Invalid or expired API token"))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?.trim();
    (!token.is_empty()).then_some(token)
}

/// Middleware entry point resolving the caller through the [`RequestGate`].
pub async fn authenticate(
    State(gate): State<GateState>,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let correlation_id = uuid::Uuid::new_v4();
    let span = info_span!(
        "gate.authenticate",
        http.method = %request.method(),
        http.path = %request.uri().path(),
        auth.username = field::Empty,
        correlation_id = %correlation_id
    );

    let context = match gate.resolve(request.headers()).instrument(span.clone()).await {
        Ok(context) => context,
        Err(err) => {
            span.in_scope(|| warn!(%correlation_id, error = %err, "authentication failed"));
            return Err(ApiError::from(err));
        }
    };
    span.record("auth.username", field::display(context.username()));
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub fn require_admin(context: &AuthContext, admin_role: &str) -> Result<()> {
    if context.user.has_role(admin_role) {
        Ok(())
    } else {
        Err(Error::forbidden("Administrator role required"))
    }
}

pub fn require_admin_or_self(context: &AuthContext, admin_role: &str, id: &UserId) -> Result<()> {
    if context.user.has_role(admin_role) || context.user_id() == id {
        Ok(())
    } else {
        Err(Error::forbidden("Only administrators or the account owner may do this"))
    }
}

/// Peers allowed on internal endpoints: loopback, private ranges and
/// explicitly configured addresses.
#[derive(Debug, Clone, Default)]
pub struct InternalNetwork {
    extra: Vec<IpAddr>,
}

impl InternalNetwork {
    pub fn new(extra: Vec<IpAddr>) -> Self {
        Self { extra }
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        let internal = match ip {
            IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
            // fc00::/7
            IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        };
        internal || self.extra.contains(&ip)
    }
}

/// Middleware rejecting peers outside [`InternalNetwork`].
pub async fn allow_internal_network(
    State(network): State<Arc<InternalNetwork>>,
    request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    match peer {
        Some(ip) if network.allows(ip) => Ok(next.run(request).await),
        Some(ip) => {
            warn!(peer = %ip, path = %request.uri().path(), "Rejected non-internal peer");
            Err(ApiError::forbidden("Internal endpoint"))
        }
        None => {
            warn!(path = %request.uri().path(), "Peer address unavailable");
            Err(ApiError::forbidden("Internal endpoint"))
        }
    }
}
