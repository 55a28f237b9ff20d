use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

/// Why a listener produced no vote.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("listener panicked")]
    Panicked,
    #[error("listener did not vote within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Runs `f` on the calling thread, turning a panic into [`VoteError::Panicked`].
pub fn run_guarded<T>(f: impl FnOnce() -> T) -> Result<T, VoteError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|_| VoteError::Panicked)
}

/// Runs `f` on a dedicated thread and waits up to `timeout` for it.
///
/// A listener that overruns keeps running in the background; threads cannot
/// be killed safely. Its eventual result is dropped.
pub fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, VoteError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<T, VoteError>>();
    let spawned = std::thread::Builder::new()
        .name("jdsync-listener".to_owned())
        .spawn(move || {
            let _ = tx.send(run_guarded(f));
        });
    if let Err(err) = spawned {
        tracing::warn!(target: "jdsync.dispatch", error = %err, "failed to spawn listener thread");
        return Err(VoteError::Panicked);
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(VoteError::DeadlineExceeded(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(VoteError::Panicked),
    }
}
