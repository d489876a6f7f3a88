//! Production implementation of TransitContext using Tokio.

use crate::TransitContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::debug;

/// Production context backed by Tokio.
///
/// The monotonic clock is `tokio::time::Instant`, so under a paused
/// Tokio runtime (`start_paused = true`) every timer built on `now()`
/// advances only with virtual time.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Seed handed to sensor noise generators
    seed: u64,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates a context whose producers draw from the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransitContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning task");
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
