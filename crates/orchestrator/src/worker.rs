//! Bounded-time stage execution
//!
//! The stage closure runs on its own thread and reports through a
//! `bounded(1)` channel. When the deadline passes first the caller gets
//! `Timeout` and the worker's eventual result is dropped with the channel.
//! [`run_cancellable`] also fires a token on timeout so the abandoned worker
//! can stop and undo its side effects.

use authenticity_common::{DetectionError, PipelineStage};
use authenticity_inference_core::CancellationToken;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::warn;

pub fn run_with_timeout<T, F>(stage: PipelineStage, timeout: Duration, work: F) -> Result<T, DetectionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DetectionError> + Send + 'static,
{
    let rx = spawn_stage(stage, work)?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(timed_out(stage, timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(worker_exited(stage)),
    }
}

/// Run `work` with a deadline, cancelling `cancel` when it passes
///
/// `work` must call [`CancellationToken::try_complete`] before returning a
/// result it wants delivered. If it wins that race against the deadline the
/// caller waits for the result instead of reporting a timeout.
pub fn run_cancellable<T, F>(
    stage: PipelineStage,
    timeout: Duration,
    cancel: CancellationToken,
    work: F,
) -> Result<T, DetectionError>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T, DetectionError> + Send + 'static,
{
    let worker_token = cancel.clone();
    let rx = spawn_stage(stage, move || work(worker_token))?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) if cancel.cancel_pending() => Err(timed_out(stage, timeout)),
        // completed at the deadline; the result is already on its way
        Err(RecvTimeoutError::Timeout) => rx.recv().unwrap_or_else(|_| Err(worker_exited(stage))),
        Err(RecvTimeoutError::Disconnected) => Err(worker_exited(stage)),
    }
}

fn spawn_stage<T, F>(stage: PipelineStage, work: F) -> Result<Receiver<Result<T, DetectionError>>, DetectionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DetectionError> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(format!("{stage}-worker"))
        .spawn(move || {
            // receiver is gone after a timeout
            let _ = tx.send(work());
        })?;
    Ok(rx)
}

fn timed_out(stage: PipelineStage, timeout: Duration) -> DetectionError {
    warn!("Stage {} exceeded {}ms", stage, timeout.as_millis());
    DetectionError::Timeout { stage, after: timeout }
}

fn worker_exited(stage: PipelineStage) -> DetectionError {
    DetectionError::Inference(format!("{stage} worker exited without a result"))
}
