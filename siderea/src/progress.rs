//! Progress reporting and cooperative cancellation for long-running operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Receives progress from detection, stacking and drizzle runs.
///
/// Called from worker threads; implementations must be cheap and thread-safe.
pub trait ProgressObserver: Send + Sync {
    /// Overall completion in `[0, 1]`.
    fn on_progress(&self, fraction: f32);

    /// Human-readable status line.
    fn on_message(&self, message: &str);
}

/// Discards all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {
    fn on_progress(&self, _fraction: f32) {}

    fn on_message(&self, _message: &str) {}
}

/// Observer built from two closures.
pub struct FnObserver<P, M> {
    progress: P,
    message: M,
}

impl<P, M> FnObserver<P, M>
where
    P: Fn(f32) + Send + Sync,
    M: Fn(&str) + Send + Sync,
{
    pub fn new(progress: P, message: M) -> Self {
        Self { progress, message }
    }
}

impl<P, M> ProgressObserver for FnObserver<P, M>
where
    P: Fn(f32) + Send + Sync,
    M: Fn(&str) + Send + Sync,
{
    fn on_progress(&self, fraction: f32) {
        (self.progress)(fraction)
    }

    fn on_message(&self, message: &str) {
        (self.message)(message)
    }
}

/// Stage of a run, used in status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Stage {
    #[strum(serialize = "Opening frames")]
    Opening,
    #[strum(serialize = "Estimating frame statistics")]
    Estimating,
    #[strum(serialize = "Integrating")]
    Integrating,
    #[strum(serialize = "Detecting stars")]
    Detecting,
    #[strum(serialize = "Fitting PSFs")]
    Fitting,
    #[strum(serialize = "Drizzling")]
    Drizzling,
}

/// Shared flag polled between bands, candidates and frames.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation cancelled")]
pub struct Cancelled;

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Maps completed work units of one stage onto a slice `[start, start + span]`
/// of overall progress. Safe to advance from several threads.
pub(crate) struct ProgressTracker<'a> {
    observer: &'a dyn ProgressObserver,
    total: usize,
    done: AtomicUsize,
    start: f32,
    span: f32,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        observer: &'a dyn ProgressObserver,
        stage: Stage,
        total: usize,
        start: f32,
        span: f32,
    ) -> Self {
        observer.on_message(&stage.to_string());
        observer.on_progress(start);
        Self {
            observer,
            total: total.max(1),
            done: AtomicUsize::new(0),
            start,
            span,
        }
    }

    pub(crate) fn advance(&self, units: usize) {
        let done = self.done.fetch_add(units, Ordering::Relaxed) + units;
        let fraction = done.min(self.total) as f32 / self.total as f32;
        self.observer.on_progress(self.start + self.span * fraction);
    }

    /// Reports the end of the stage regardless of the order workers finished in.
    pub(crate) fn finish(&self) {
        self.observer.on_progress(self.start + self.span);
    }

    pub(crate) fn message(&self, message: &str) {
        self.observer.on_message(message);
    }
}
