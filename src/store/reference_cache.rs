use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::ReadError;
use crate::model::ReferenceContext;
use crate::store::traits::ModelReader;

/// Cache entry for the reference context
#[derive(Clone, Debug)]
struct CacheEntry {
    context: ReferenceContext,
    fetched: Instant,
}

/// Read-through cache of the model's instrument dimension with TTL.
/// There is no write-back path; it only ever feeds validation.
#[derive(Debug, Clone)]
pub struct ReferenceCache {
    entry: Arc<RwLock<Option<CacheEntry>>>,
    ttl: Duration,
}

impl ReferenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Arc::new(RwLock::new(None)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached context if present and not expired
    pub async fn cached(&self) -> Option<ReferenceContext> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|entry| entry.fetched.elapsed() < self.ttl)
            .map(|entry| entry.context.clone())
    }

    /// Cached context, or a fresh one read through `reader` when missing or expired
    pub async fn context<R: ModelReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<ReferenceContext, ReadError> {
        if let Some(context) = self.cached().await {
            return Ok(context);
        }

        let known = reader.list_instruments().await?;
        log::debug!("Reference cache refreshed with {} instruments", known.len());
        let context = ReferenceContext::with_instruments(known);

        let mut entry = self.entry.write().await;
        *entry = Some(CacheEntry {
            context: context.clone(),
            fetched: Instant::now(),
        });

        Ok(context)
    }

    /// Force the next `context` call to hit the reader
    pub async fn invalidate(&self) {
        let mut entry = self.entry.write().await;
        *entry = None;
    }
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600)) // 1 hour
    }
}
