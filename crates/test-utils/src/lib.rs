//! Shared test utilities for the sos-cache workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Observation network fixtures and a seeded in-memory store
//! - Instrumented content sources (gated, failing, counting)
//! - A persistence strategy that records its checkpoints
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, GatedSource, RecordingPersistence};
//! ```

pub mod fixtures;
pub mod persistence;
pub mod sources;

pub use fixtures::ids;
pub use persistence::{Checkpoint, Recorded, RecordingPersistence};
pub use sources::{CountingSource, FailingSource, GatedSource, RebuildProbe};

/// Macro to poll a condition until it holds, failing the test after a
/// timeout.
///
/// Uses `tokio::time`, so it also works under paused time.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_eventually;
///
/// assert_eventually!(controller.status().deduplicated_rebuilds == 1);
/// assert_eventually!(probe.started() == 2, std::time::Duration::from_secs(1));
/// ```
#[macro_export]
macro_rules! assert_eventually {
    ($cond:expr) => {
        $crate::assert_eventually!($cond, ::std::time::Duration::from_secs(5))
    };
    ($cond:expr, $timeout:expr) => {{
        let deadline = ::tokio::time::Instant::now() + $timeout;
        loop {
            if $cond {
                break;
            }
            if ::tokio::time::Instant::now() >= deadline {
                panic!(
                    "assertion failed: `{}` did not hold within {:?}",
                    stringify!($cond),
                    $timeout
                );
            }
            ::tokio::time::sleep(::std::time::Duration::from_millis(1)).await;
        }
    }};
}
