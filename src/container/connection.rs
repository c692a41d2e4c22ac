//! # Connection Manager
//!
//! Per-container cache of authenticated sessions, keyed by project scope.
//! A session is reused until it comes within the renewal margin of its
//! expiry; then the next caller re-authenticates. The cache lock is held
//! across authentication so concurrent workflows sharing a container
//! authenticate once, not once each.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{OrchestratorError, Result};
use crate::remote::{PlatformConnector, RemotePlatformClient, SessionToken};

struct CachedSession {
    token: SessionToken,
    client: Arc<dyn RemotePlatformClient>,
    expires_at: DateTime<Utc>,
}

impl CachedSession {
    fn needs_renewal(&self, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
        now + margin >= self.expires_at
    }
}

pub struct ConnectionManager {
    container_name: String,
    connector: Arc<dyn PlatformConnector>,
    config: ConnectionConfig,
    sessions: Mutex<HashMap<Option<String>, CachedSession>>,
}

impl ConnectionManager {
    pub fn new(
        container_name: impl Into<String>,
        connector: Arc<dyn PlatformConnector>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            connector,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Ready-to-use client for `scope`, authenticating only when needed
    pub async fn get_connection(&self, scope: Option<&str>) -> Result<Arc<dyn RemotePlatformClient>> {
        let key = scope.map(str::to_string);
        let margin = to_chrono(self.config.renewal_margin());
        let now = Utc::now();

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            if !session.needs_renewal(now, margin) {
                return Ok(Arc::clone(&session.client));
            }
            debug!(
                container = %self.container_name,
                scope = ?scope,
                expires_at = %session.expires_at,
                "Session token near expiry, renewing"
            );
        }

        let token = self
            .connector
            .authenticate(scope)
            .await
            .map_err(|e| OrchestratorError::Connection {
                container: self.container_name.clone(),
                reason: e.to_string(),
            })?;

        let expires_at = token
            .expires_at
            .unwrap_or_else(|| now + to_chrono(self.config.token_ttl()));
        let client = self.connector.connect(&token);

        info!(
            container = %self.container_name,
            platform = %self.connector.platform(),
            scope = ?scope,
            expires_at = %expires_at,
            "Authenticated remote session"
        );

        sessions.insert(
            key,
            CachedSession {
                token,
                client: Arc::clone(&client),
                expires_at,
            },
        );
        Ok(client)
    }

    /// Drop the cached session for `scope`, e.g. after the platform answered 401
    pub async fn invalidate(&self, scope: Option<&str>) -> bool {
        let removed = self
            .sessions
            .lock()
            .await
            .remove(&scope.map(str::to_string))
            .is_some();
        if removed {
            warn!(container = %self.container_name, scope = ?scope, "Session invalidated");
        }
        removed
    }

    pub async fn invalidate_all(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn cached_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Service catalog of the cached session for `scope`
    pub async fn catalog(&self, scope: Option<&str>) -> Option<serde_json::Value> {
        self.sessions
            .lock()
            .await
            .get(&scope.map(str::to_string))
            .map(|s| s.token.catalog.clone())
    }
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(36_500))
}
