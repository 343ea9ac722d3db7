//! Login sessions for browser clients.
//!
//! A session records the username and password hash the user had when they
//! logged in. The request gate compares them against the stored account so
//! that a rename or password change forces a new login.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::debug;

use crate::auth::models::User;
use crate::domain::UserId;

/// Session cookie name
pub const SESSION_COOKIE_NAME: &str = "warden_session";

const SESSION_ID_LEN: usize = 43;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the account still has the credentials captured at login.
    pub fn matches(&self, user: &User) -> bool {
        self.user_id == user.id
            && self.username == user.username
            && self.password_hash == user.password_hash
    }
}

/// In-process session store keyed by session id.
#[derive(Debug)]
pub struct SessionStore {
    ttl: chrono::Duration,
    cookie_secure: bool,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration, cookie_secure: bool) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(1)),
            cookie_secure,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session capturing the user's current credentials.
    pub fn create(&self, user: &User) -> Session {
        let id: String =
            OsRng.sample_iter(&Alphanumeric).take(SESSION_ID_LEN).map(char::from).collect();
        let session = Session {
            id: id.clone(),
            user_id: user.id.clone(),
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions().insert(id, session.clone());
        debug!(username = %user.username, "Opened session");
        session
    }

    /// Look up a live session. Expired sessions are removed on the way.
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions();
        let session = sessions.get(id)?.clone();
        if session.expires_at <= Utc::now() {
            sessions.remove(id);
            return None;
        }
        Some(session)
    }

    pub fn destroy(&self, id: &str) -> bool {
        self.sessions().remove(id).is_some()
    }

    /// Drop every session of a user, e.g. after the account is deleted.
    pub fn destroy_for_user(&self, user_id: &UserId) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| &session.user_id != user_id);
        before - sessions.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Set-Cookie` value carrying the session id.
    pub fn cookie(&self, session: &Session) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, session.id.clone()))
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .max_age(cookie_duration(self.ttl))
            .build()
    }

    /// Cookie that clears the session on the client.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .max_age(cookie_duration(chrono::Duration::zero()))
            .build()
    }
}

fn cookie_duration(ttl: chrono::Duration) -> time::Duration {
    time::Duration::seconds(ttl.num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trip_and_destroy() {
        let store = SessionStore::new(Duration::from_secs(60), false);
        let user = User::new("alice", "hash");

        let session = store.create(&user);
        assert_eq!(session.id.len(), SESSION_ID_LEN);
        assert_eq!(store.get(&session.id), Some(session.clone()));

        assert!(store.destroy(&session.id));
        assert_eq!(store.get(&session.id), None);
    }

    #[test]
    fn credentials_change_breaks_match() {
        let store = SessionStore::new(Duration::from_secs(60), false);
        let mut user = User::new("alice", "hash");
        let session = store.create(&user);
        assert!(session.matches(&user));

        user.password_hash = "new-hash".to_string();
        assert!(!session.matches(&user));

        user.password_hash = "hash".to_string();
        user.username = "alicia".to_string();
        assert!(!session.matches(&user));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let store = SessionStore::new(Duration::from_secs(0), false);
        let session = store.create(&User::new("alice", "hash"));
        assert_eq!(store.get(&session.id), None);
        assert!(store.is_empty());
    }

    #[test]
    fn destroy_for_user_removes_all_sessions() {
        let store = SessionStore::new(Duration::from_secs(60), false);
        let alice = User::new("alice", "hash");
        store.create(&alice);
        store.create(&alice);
        store.create(&User::new("bob", "hash"));

        assert_eq!(store.destroy_for_user(&alice.id), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cookie_attributes() {
        let store = SessionStore::new(Duration::from_secs(60), true);
        let session = store.create(&User::new("alice", "hash"));
        let cookie = store.cookie(&session);

        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), session.id);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
    }
}
