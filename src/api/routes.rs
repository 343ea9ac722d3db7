use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::account_service::AccountService;
use crate::auth::gate::{allow_internal_network, authenticate, InternalNetwork, RequestGate};
use crate::auth::session::SessionStore;
use crate::auth::token_manager::TokenManager;
use crate::config::AppConfig;
use crate::storage::{DbPool, SqlxTokenRepository, SqlxUserRepository};

use super::handlers::{
    add_role_member_handler, create_user_handler, delete_role_handler, delete_user_handler,
    get_api_token_handler, get_user_handler, health_handler, list_users_handler, login_handler,
    logout_handler, regenerate_api_token_handler, remove_role_member_handler,
    rename_role_handler, update_api_token_handler, update_user_handler, user_directory_handler,
    watch_auth_changes_handler,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub accounts: Arc<AccountService>,
    pub token_manager: Arc<TokenManager>,
    pub sessions: Arc<SessionStore>,
    pub gate: Arc<RequestGate>,
    pub internal_network: Arc<InternalNetwork>,
    pub admin_role: Arc<str>,
}

impl ApiState {
    /// Wire the services on top of a migrated pool.
    pub fn from_pool(pool: DbPool, config: &AppConfig) -> Self {
        let users = Arc::new(SqlxUserRepository::new(pool.clone()));
        let tokens = Arc::new(SqlxTokenRepository::new(pool));
        let token_manager =
            Arc::new(TokenManager::new(tokens.clone(), config.auth.token_expiration()));
        let sessions =
            Arc::new(SessionStore::new(config.auth.session_ttl(), config.auth.cookie_secure));
        let accounts = Arc::new(AccountService::new(
            users.clone(),
            token_manager.clone(),
            sessions.clone(),
            config.auth.admin_role.clone(),
        ));
        let gate =
            Arc::new(RequestGate::new(sessions.clone(), users, tokens, token_manager.clone()));

        Self {
            accounts,
            token_manager,
            sessions,
            gate,
            internal_network: Arc::new(InternalNetwork::new(config.auth.internal_addrs())),
            admin_role: Arc::from(config.auth.admin_role.as_str()),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.gate.clone(), authenticate);
    let internal_layer =
        middleware::from_fn_with_state(state.internal_network.clone(), allow_internal_network);

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler));

    let secured = Router::new()
        .route("/users", get(list_users_handler).post(create_user_handler))
        .route(
            "/users/{id}",
            get(get_user_handler).put(update_user_handler).delete(delete_user_handler),
        )
        .route(
            "/users/{id}/api-token",
            get(get_api_token_handler)
                .put(update_api_token_handler)
                .delete(regenerate_api_token_handler),
        )
        .route("/roles/{role}", put(rename_role_handler).delete(delete_role_handler))
        .route(
            "/roles/{role}/users/{id}",
            put(add_role_member_handler).delete(remove_role_member_handler),
        )
        .route_layer(auth_layer.clone());

    // The network guard runs before the gate.
    let internal = Router::new()
        .route("/internal/authenticate/{username}", post(watch_auth_changes_handler))
        .route("/internal/users", get(user_directory_handler))
        .route_layer(auth_layer)
        .route_layer(internal_layer);

    Router::new()
        .merge(public)
        .merge(secured)
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
