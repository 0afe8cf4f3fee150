//! Progress reporting and cancellation for source lifecycle operations.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SourceError, SourceResult};

/// A progress step reported during a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProgress {
    /// Units completed so far.
    pub current: u64,
    /// Total units, when known.
    pub total: Option<u64>,
    /// Name of the phase being executed.
    pub phase: &'static str,
}

type ProgressSink = dyn Fn(SourceProgress) + Send + Sync;

struct ProgressInner {
    cancelled: AtomicBool,
    sink: Option<Box<ProgressSink>>,
}

/// Shared cancellation flag and progress sink handed through a lifecycle
/// operation. Observed at least at every network and extraction boundary.
#[derive(Clone)]
pub struct ProgressToken {
    inner: Arc<ProgressInner>,
}

impl ProgressToken {
    /// A token with no sink; cancellation only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                cancelled: AtomicBool::new(false),
                sink: None,
            }),
        }
    }

    /// A token that forwards progress reports to `sink`.
    #[must_use]
    pub fn with_sink(sink: impl Fn(SourceProgress) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                cancelled: AtomicBool::new(false),
                sink: Some(Box::new(sink)),
            }),
        }
    }

    /// Request cancellation of the operation holding this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Report a progress step to the sink, when one is attached.
    pub fn report(&self, progress: SourceProgress) {
        if let Some(sink) = &self.inner.sink {
            sink(progress);
        }
    }

    /// Fail with a cancellation error when cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cancelled`] after [`Self::cancel`] was
    /// called.
    pub fn check(&self) -> SourceResult<()> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        Ok(())
    }
}

impl Default for ProgressToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn cancellation_is_observed() {
        let token = ProgressToken::new();
        assert!(token.check().is_ok());

        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SourceError::Cancelled)));
    }

    #[test]
    fn clones_share_the_flag() {
        let token = ProgressToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn sink_receives_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let token = ProgressToken::with_sink(move |progress| {
            sink_seen.lock().expect("sink lock").push(progress);
        });

        token.report(SourceProgress {
            current: 1,
            total: Some(2),
            phase: "fetch",
        });
        assert_eq!(seen.lock().expect("seen lock").len(), 1);
    }
}
