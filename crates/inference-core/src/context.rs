//! Per-request execution context

use authenticity_common::{DetectionError, PipelineStage};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// Shared cancellation flag, checked between stages
///
/// A child token fires with its parent but can also be cancelled on its own.
/// Work that publishes results claims completion with [`try_complete`], after
/// which cancelling that token has no effect.
///
/// [`try_complete`]: CancellationToken::try_complete
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is cancelled when `self` is, and independently
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RUNNING)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.cancel_pending();
    }

    /// Cancel unless the work already claimed completion; `true` when the cancel took effect
    pub fn cancel_pending(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(state) => state == CANCELLED,
        }
    }

    /// Claim completion unless this token or an ancestor was cancelled first
    pub fn try_complete(&self) -> bool {
        if self.parent.as_ref().is_some_and(|p| p.is_cancelled()) {
            return false;
        }
        match self
            .state
            .compare_exchange(RUNNING, COMPLETED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(state) => state == COMPLETED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// `Err(Cancelled)` once the token has fired
    pub fn check(&self, stage: PipelineStage) -> Result<(), DetectionError> {
        if self.is_cancelled() {
            Err(DetectionError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

/// Execution mode that determines how much is recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Full debug trace in the response
    #[default]
    Debug,

    /// Scores only, no per-stage trace
    Performance,
}

/// Context passed down the pipeline for one request
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub mode: ExecutionMode,
    pub cancellation: CancellationToken,
}

impl Context {
    pub fn debug() -> Self {
        Self {
            mode: ExecutionMode::Debug,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn performance() -> Self {
        Self {
            mode: ExecutionMode::Performance,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn records_trace(&self) -> bool {
        self.mode == ExecutionMode::Debug
    }
}
