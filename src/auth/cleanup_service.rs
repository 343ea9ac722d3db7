//! Background maintenance: purge expired tokens and stale sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::auth::session::SessionStore;
use crate::errors::Result;
use crate::observability::metrics;
use crate::storage::{DbPool, SqlxTokenRepository, TokenRepository};

#[derive(Clone)]
pub struct TokenCleanupService {
    repository: Arc<dyn TokenRepository>,
    sessions: Arc<SessionStore>,
}

/// Counts removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tokens: u64,
    pub sessions: usize,
}

impl TokenCleanupService {
    pub fn new(repository: Arc<dyn TokenRepository>, sessions: Arc<SessionStore>) -> Self {
        Self { repository, sessions }
    }

    pub fn with_sqlx(pool: DbPool, sessions: Arc<SessionStore>) -> Self {
        Self::new(Arc::new(SqlxTokenRepository::new(pool)), sessions)
    }

    /// Delete expired, non-permanent tokens and expired sessions.
    pub async fn run_once(&self) -> Result<CleanupReport> {
        let tokens = self.repository.delete_expired(Utc::now()).await?;
        metrics::record_tokens_purged(tokens);
        let sessions = self.sessions.purge_expired();
        Ok(CleanupReport { tokens, sessions })
    }

    /// Run [`Self::run_once`] every `period` until the runtime shuts down.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        info!(period_secs = period.as_secs(), "Starting token cleanup task");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match self.run_once().await {
                    Ok(report) if report.tokens > 0 || report.sessions > 0 => {
                        info!(
                            tokens = report.tokens,
                            sessions = report.sessions,
                            "Purged expired credentials"
                        );
                    }
                    Ok(_) => debug!("Nothing to purge"),
                    Err(e) => error!(error = %e, "Token cleanup failed"),
                }
            }
        })
    }
}
