//! Upstream credentials.
//!
//! The executor asks for a token before every attempt and invalidates it at
//! most once per logical call after a 401/403.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Error)]
#[error("token unavailable: {0}")]
pub struct TokenError(pub String);

/// Source of bearer tokens. `invalidate` must be safe to call concurrently
/// and later `get_token` calls must observe it.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    async fn get_token(&self) -> Result<String, TokenError>;

    async fn invalidate(&self);
}

/// Fixed token (personal access tokens). Invalidation is counted only.
#[derive(Debug)]
pub struct StaticTokenProvider {
    token: String,
    invalidations: AtomicU64,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Static token invalidated");
    }
}

/// Mints fresh tokens (OAuth refresh, app installation tokens, ...).
#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    async fn fetch(&self) -> Result<String, TokenError>;
}

/// Caches a token from a [`TokenSource`] until invalidated.
#[derive(Debug)]
pub struct CachingTokenProvider {
    source: Arc<dyn TokenSource>,
    cached: RwLock<Option<String>>,
    fetches: AtomicU64,
}

impl CachingTokenProvider {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TokenProvider for CachingTokenProvider {
    async fn get_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.source.fetch().await?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Fetched fresh upstream token");
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::info!("Upstream token invalidated");
    }
}
