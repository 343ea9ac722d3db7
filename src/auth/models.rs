//! Account, role and token models plus the messages pushed to watchers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RoleId, UserId};

/// A named role. Role names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// Persisted API token record. There is at most one per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken {
    pub token: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    /// Ignored when `permanent` is set.
    pub expires_at: DateTime<Utc>,
    pub permanent: bool,
}

impl ApiToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.expires_at > now
    }

    /// First characters of the token, safe to log.
    pub fn redacted(&self) -> String {
        let visible: String = self.token.chars().take(12).collect();
        format!("{}...", visible)
    }
}

/// A fully loaded account: roles and the current token come with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    /// Newly issued tokens for this user never expire.
    pub permanent_api_token: bool,
    pub roles: Vec<Role>,
    pub api_token: Option<ApiToken>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            password_hash: password_hash.into(),
            permanent_api_token: false,
            roles: Vec::new(),
            api_token: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.name.clone()).collect()
    }

    /// The loaded token if it is still live at `now`.
    pub fn live_token(&self, now: DateTime<Utc>) -> Option<&ApiToken> {
        self.api_token.as_ref().filter(|token| token.is_live(now))
    }
}

/// Pushed to watchers of a username whenever its token or roles change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUpdateMessage {
    pub username: String,
    pub api_token: String,
    pub expires_at: String,
    pub permanent: bool,
    pub roles: Vec<String>,
}

impl AuthUpdateMessage {
    pub fn new(user: &User, token: &ApiToken) -> Self {
        Self {
            username: user.username.clone(),
            api_token: token.token.clone(),
            expires_at: token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            permanent: token.permanent,
            roles: user.role_names(),
        }
    }
}

/// Entry of the user directory feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectoryEvent {
    pub username: String,
    pub removed: bool,
}

impl UserDirectoryEvent {
    pub fn created(username: impl Into<String>) -> Self {
        Self { username: username.into(), removed: false }
    }

    pub fn removed(username: impl Into<String>) -> Self {
        Self { username: username.into(), removed: true }
    }
}

/// Identity resolved by the request gate, stored as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    /// How the caller authenticated
    pub via: CredentialKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Session,
    ApiToken,
}

impl AuthContext {
    pub fn new(user: User, via: CredentialKind) -> Self {
        Self { user, via }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn token_for(user: &User, expires_at: DateTime<Utc>, permanent: bool) -> ApiToken {
        ApiToken {
            token: "API-TOK_abcd-efgh-ijkl-mnop-qrst".to_string(),
            user_id: user.id.clone(),
            issued_at: expires_at - Duration::days(3),
            expires_at,
            permanent,
        }
    }

    #[test]
    fn liveness_respects_permanent_flag() {
        let user = User::new("alice", "hash");
        let now = Utc::now();

        assert!(token_for(&user, now + Duration::seconds(1), false).is_live(now));
        assert!(!token_for(&user, now, false).is_live(now));
        assert!(token_for(&user, now - Duration::days(30), true).is_live(now));
    }

    #[test]
    fn auth_update_message_wire_shape() {
        let mut user = User::new("alice", "hash");
        user.roles.push(Role { id: RoleId::new(), name: "admin".to_string() });
        let expires_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = token_for(&user, expires_at, false);

        let value = serde_json::to_value(AuthUpdateMessage::new(&user, &token)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "username": "alice",
                "api_token": "API-TOK_abcd-efgh-ijkl-mnop-qrst",
                "expires_at": "2024-05-01T12:00:00Z",
                "permanent": false,
                "roles": ["admin"],
            })
        );
    }

    #[test]
    fn directory_event_wire_shape() {
        let json = serde_json::to_string(&UserDirectoryEvent::removed("bob")).unwrap();
        assert_eq!(json, r#"{"username":"bob","removed":true}"#);
    }

    #[test]
    fn redacted_token_hides_secret_part() {
        let user = User::new("alice", "hash");
        let token = token_for(&user, Utc::now(), false);
        assert_eq!(token.redacted(), "API-TOK_abcd...");
    }
}
