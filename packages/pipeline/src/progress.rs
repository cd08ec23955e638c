//! Progress reporting for long-running pipeline stages.
//!
//! Stages report through a [`ProgressCallback`] trait object so the
//! rendering backend stays out of this crate; the CLI plugs in
//! `indicatif` bars, tests and batch callers use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a running stage.
///
/// Implementations must be `Send + Sync`; stages may report from worker
/// threads.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work, once known.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);

    /// Mark progress as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
