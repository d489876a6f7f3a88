//! Core environment context trait for the transit fusion engine.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

use crate::types::Moment;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the fusion engine can run
/// against the wall clock in production and against a paused, manually
/// advanced clock in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
///
/// # Determinism
///
/// Every timer in the core (door debounce, safety timeout, entry/exit
/// windows) is measured on `now()`, never on `SystemTime`. Pausing the
/// clock behind `now()` therefore freezes all domain timers at once.
#[async_trait]
pub trait TransitContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for internal timers and duration measurements.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time for event timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// In production: `tokio::spawn`
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// Sensor producers derive their noise generators from it.
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;

    /// Captures the monotonic and wall clocks together.
    ///
    /// Core operations take a `Moment` rather than reading clocks
    /// themselves, so a single operation sees one consistent instant.
    fn moment(&self) -> Moment {
        let unix_ms = self
            .system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Moment {
            monotonic: self.now(),
            unix_ms,
        }
    }
}
