//! HTTP request handlers organized by resource type

pub mod auth;
pub mod health;
pub mod internal;
pub mod roles;
pub mod tokens;
pub mod users;

pub use auth::{login_handler, logout_handler};
pub use health::health_handler;
pub use internal::{user_directory_handler, watch_auth_changes_handler};
pub use roles::{
    add_role_member_handler, delete_role_handler, remove_role_member_handler, rename_role_handler,
};
pub use tokens::{get_api_token_handler, regenerate_api_token_handler, update_api_token_handler};
pub use users::{
    create_user_handler, delete_user_handler, get_user_handler, list_users_handler,
    update_user_handler,
};

use crate::api::error::ApiError;
use crate::domain::UserId;

/// Path segments carry user ids as UUID strings.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    UserId::parse(raw).map_err(|_| ApiError::bad_request(format!("Invalid user id '{}'", raw)))
}
