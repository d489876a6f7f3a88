//! Transit Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction that lets the fusion
//! engine run against the real clock in production and against Tokio's
//! paused virtual clock in tests.
//!
//! # Core Concept: Time Is Injected
//!
//! The fusion core never calls `Instant::now()` or `SystemTime::now()`.
//! Everything time-dependent receives a [`Moment`] captured from a
//! [`TransitContext`]:
//! - Time (`now()`, `sleep()`, `moment()`)
//! - Task spawning (`spawn()`)
//! - Noise seeding (`seed()`)
//!
//! # Example
//!
//! ```ignore
//! use transit_env::{TransitContext, TokioContext};
//!
//! async fn tick_loop<Ctx: TransitContext>(ctx: &Ctx) {
//!     loop {
//!         ctx.sleep(Duration::from_millis(100)).await;
//!         engine.fuse(ctx.moment());
//!     }
//! }
//! ```

mod context;
mod types;
mod tokio_impl;

pub use context::TransitContext;
pub use types::{DeviceId, Moment};
pub use tokio_impl::TokioContext;
