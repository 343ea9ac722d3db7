//! Token lifecycle and live auth update fan-out.
//!
//! The manager owns token issuance policy and two subscriber registries: one
//! keyed by username for token/role updates and one un-keyed feed of user
//! created/deleted events. Each registry has its own lock.
//!
//! Per user a token moves `absent -> live -> (expired | invalidated) -> absent`.
//! It is never renewed in place; regeneration deletes and then issues, so
//! watchers see exactly one message carrying the final state.
//!
//! Token writes and the pushes that follow them run under one async lock, so
//! the order watchers observe is the order the store was written in.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::auth::models::{ApiToken, AuthUpdateMessage, User, UserDirectoryEvent};
use crate::auth::registry::{ScopedSubscription, SubscriberSet, Subscription, TopicRegistry};
use crate::auth::token_format::generate_api_token;
use crate::errors::{Error, Result};
use crate::observability::metrics;
use crate::storage::{DbPool, SqlxTokenRepository, TokenRepository};

/// Lifetime of a non-permanent token unless configured otherwise (3 days).
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

pub struct TokenManager {
    tokens: Arc<dyn TokenRepository>,
    expiration: chrono::Duration,
    user_updates: Arc<TopicRegistry<String, AuthUpdateMessage>>,
    directory: Arc<SubscriberSet<UserDirectoryEvent>>,
    token_writes: Mutex<()>,
}

impl TokenManager {
    pub fn new(tokens: Arc<dyn TokenRepository>, expiration: Duration) -> Self {
        Self {
            tokens,
            expiration: chrono::Duration::from_std(expiration).unwrap_or(chrono::Duration::MAX),
            user_updates: Arc::new(TopicRegistry::new(metrics::FEED_USER)),
            directory: Arc::new(SubscriberSet::new(metrics::FEED_DIRECTORY)),
            token_writes: Mutex::new(()),
        }
    }

    pub fn with_sqlx(pool: DbPool, expiration: Duration) -> Self {
        Self::new(Arc::new(SqlxTokenRepository::new(pool)), expiration)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.expiration).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Issue a token unless `user` already carries a live one.
    ///
    /// A live token already in the store (issued by a concurrent caller) is
    /// adopted into `user.api_token` instead and `false` is returned. On
    /// issuance the token is persisted first, then pushed to the user's
    /// watchers, then stored in `user.api_token`. A persistence failure
    /// returns before anything is published.
    #[instrument(skip(self, user), fields(username = %user.username, user_id = %user.id))]
    pub async fn issue_if_absent_or_expired(&self, user: &mut User) -> Result<bool> {
        if user.live_token(Utc::now()).is_some() {
            return Ok(false);
        }

        let _writes = self.token_writes.lock().await;
        let now = Utc::now();
        if let Some(stored) = self.stored_live_token(user, now).await? {
            debug!(token = %stored.redacted(), "Adopted token issued concurrently");
            user.api_token = Some(stored);
            return Ok(false);
        }
        self.issue_locked(user, now).await?;
        Ok(true)
    }

    async fn stored_live_token(&self, user: &User, now: DateTime<Utc>) -> Result<Option<ApiToken>> {
        Ok(self.tokens.find_by_user_id(&user.id).await?.filter(|token| token.is_live(now)))
    }

    /// Mint, persist and push a token. Callers hold `token_writes`.
    async fn issue_locked(&self, user: &mut User, now: DateTime<Utc>) -> Result<ApiToken> {
        let token = ApiToken {
            token: generate_api_token(),
            user_id: user.id.clone(),
            issued_at: now,
            expires_at: self.expiry_from(now),
            permanent: user.permanent_api_token,
        };
        self.tokens.save(&token).await.map_err(|e| e.context("Failed to issue API token"))?;
        metrics::record_token_issued();

        let delivered = self.user_updates.publish(
            &user.username,
            AuthUpdateMessage::new(user, &token),
        );
        info!(token = %token.redacted(), permanent = token.permanent, delivered, "Issued API token");

        user.api_token = Some(token.clone());
        Ok(token)
    }

    /// Drop the current token without notifying, then issue a replacement.
    /// Returns the new token.
    #[instrument(skip(self, user), fields(username = %user.username, user_id = %user.id))]
    pub async fn regenerate_token(&self, user: &mut User) -> Result<ApiToken> {
        let _writes = self.token_writes.lock().await;
        self.tokens
            .delete_by_user_id(&user.id)
            .await
            .map_err(|e| e.context("Failed to invalidate API token"))?;
        user.api_token = None;

        self.issue_locked(user, Utc::now()).await
    }

    /// The identity `user.username` is no longer valid (renamed, credentials
    /// changed or deleted). Deletes the persisted token and terminates every
    /// watcher of that username. Watchers are left alone if the delete fails.
    #[instrument(skip(self, user), fields(username = %user.username, user_id = %user.id))]
    pub async fn notify_username_invalid(&self, user: &User) -> Result<()> {
        let _writes = self.token_writes.lock().await;
        let existed = self
            .tokens
            .delete_by_user_id(&user.id)
            .await
            .map_err(|e| e.context("Failed to invalidate API token"))?;
        if existed {
            metrics::record_token_invalidated();
        }

        let terminated = self.user_updates.terminate(&user.username);
        info!(token_existed = existed, terminated, "Invalidated username");
        Ok(())
    }

    /// Push the new role set of `user` to its watchers with the token
    /// currently stored for them.
    ///
    /// With watchers present a live token must be stored; anything else
    /// means a role change overtook token issuance for a watched user.
    #[instrument(skip(self, user), fields(username = %user.username, user_id = %user.id))]
    pub async fn notify_role_update(&self, user: &User) -> Result<()> {
        if self.user_updates.subscriber_count(&user.username) == 0 {
            return Ok(());
        }

        let _writes = self.token_writes.lock().await;
        let stored = self.stored_live_token(user, Utc::now()).await?;
        let delivered = self.user_updates.publish_with(&user.username, || {
            let token = stored.as_ref().ok_or_else(|| {
                Error::invariant(format!(
                    "role update for watched user '{}' without a live token",
                    user.username
                ))
            })?;
            Ok(AuthUpdateMessage::new(user, token))
        })?;
        debug!(delivered, roles = ?user.role_names(), "Pushed role update");
        Ok(())
    }

    pub fn notify_user_created(&self, user: &User) -> usize {
        self.directory.publish(UserDirectoryEvent::created(&user.username))
    }

    pub fn notify_user_deleted(&self, user: &User) -> usize {
        self.directory.publish(UserDirectoryEvent::removed(&user.username))
    }

    pub fn subscribe_to_changes(&self, username: &str) -> Subscription<AuthUpdateMessage> {
        self.user_updates.subscribe(username.to_string())
    }

    pub fn unsubscribe_from_changes(
        &self,
        username: &str,
        subscription: &Subscription<AuthUpdateMessage>,
    ) -> Result<()> {
        self.user_updates.unsubscribe(&username.to_string(), subscription.id())
    }

    pub fn subscribe_to_user_create_delete_events(&self) -> Subscription<UserDirectoryEvent> {
        self.directory.subscribe()
    }

    pub fn unsubscribe_from_user_create_delete_events(
        &self,
        subscription: &Subscription<UserDirectoryEvent>,
    ) -> Result<()> {
        self.directory.unsubscribe(subscription.id())
    }

    /// Subscribe to `username` for as long as the returned handle lives.
    pub fn watch_user(&self, username: &str) -> ScopedSubscription<AuthUpdateMessage> {
        self.user_updates.subscribe_scoped(username.to_string())
    }

    /// Subscribe to the directory feed for as long as the returned handle lives.
    pub fn watch_directory(&self) -> ScopedSubscription<UserDirectoryEvent> {
        self.directory.subscribe_scoped()
    }

    pub fn subscriber_count(&self, username: &str) -> usize {
        self.user_updates.subscriber_count(&username.to_string())
    }

    pub fn directory_subscriber_count(&self) -> usize {
        self.directory.len()
    }

    /// Snapshot message built from an already loaded user.
    pub fn auth_update_for(&self, user: &User) -> Option<AuthUpdateMessage> {
        user.live_token(Utc::now()).map(|token| AuthUpdateMessage::new(user, token))
    }

    /// The user's live token as currently stored.
    pub async fn token_for(&self, user: &User) -> Result<ApiToken> {
        let now = Utc::now();
        self.tokens
            .find_by_user_id(&user.id)
            .await?
            .filter(|token| token.is_live(now))
            .ok_or_else(|| Error::not_found("api_token", user.username.as_str()))
    }

    /// Flip the permanent flag of the live token and push the result.
    ///
    /// Clearing the flag on a token whose expiry already passed restarts its
    /// lifetime from now.
    #[instrument(skip(self, user), fields(username = %user.username, user_id = %user.id))]
    pub async fn set_permanent(&self, user: &mut User, permanent: bool) -> Result<ApiToken> {
        let _writes = self.token_writes.lock().await;
        let mut token = self.token_for(user).await?;
        let now = Utc::now();
        token.permanent = permanent;
        if !permanent && token.expires_at <= now {
            token.expires_at = self.expiry_from(now);
        }
        self.tokens.save(&token).await.map_err(|e| e.context("Failed to update API token"))?;

        let delivered =
            self.user_updates.publish(&user.username, AuthUpdateMessage::new(user, &token));
        info!(permanent, delivered, "Updated API token permanence");

        user.permanent_api_token = permanent;
        user.api_token = Some(token.clone());
        Ok(token)
    }
}
