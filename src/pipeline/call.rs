//! Deadline-bounded, cancellable collaborator calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::warn;

use crate::error::ExternalCallError;

struct CancelState {
    cancelled: AtomicBool,
    // Dropped on cancel so every receiver observes a disconnect.
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Cloneable cancellation handle shared between a caller and a running
/// pipeline.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                signal: rx,
            }),
        }
    }

    /// Cancels every call waiting on this token. Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        match self.state.trigger.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once cancelled.
    #[must_use]
    pub fn signal(&self) -> Receiver<()> {
        self.state.signal.clone()
    }
}

/// Runs `f` on a named worker thread and waits for whichever comes first:
/// its reply, cancellation, or `timeout`.
///
/// On timeout or cancellation the worker is detached; its eventual reply is
/// discarded.
pub fn call_with_deadline<T, F>(
    service: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, ExternalCallError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExternalCallError> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ExternalCallError::Cancelled {
            service: service.to_string(),
        });
    }

    let (reply_tx, reply_rx) = bounded::<Result<T, ExternalCallError>>(1);
    thread::Builder::new()
        .name(format!("xreason-{service}"))
        .spawn(move || {
            let _ = reply_tx.send(f());
        })
        .map_err(|e| ExternalCallError::unavailable(service, format!("failed to spawn worker: {e}")))?;

    let signal = cancel.signal();
    select! {
        recv(reply_rx) -> msg => match msg {
            Ok(result) => result,
            Err(_) => Err(ExternalCallError::unavailable(service, "worker exited without replying")),
        },
        recv(signal) -> _ => Err(ExternalCallError::Cancelled {
            service: service.to_string(),
        }),
        default(timeout) => {
            let duration_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(service, duration_ms, "external call timed out");
            Err(ExternalCallError::Timeout {
                service: service.to_string(),
                duration_ms,
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn returns_the_reply() {
        let token = CancellationToken::new();
        let out = call_with_deadline("svc", Duration::from_secs(5), &token, || Ok(42));
        assert_eq!(out, Ok(42));
    }

    #[test]
    fn propagates_collaborator_errors() {
        let token = CancellationToken::new();
        let out: Result<(), _> = call_with_deadline("svc", Duration::from_secs(5), &token, || {
            Err(ExternalCallError::unavailable("svc", "down"))
        });
        assert!(matches!(out, Err(ExternalCallError::Unavailable { .. })));
    }

    #[test]
    fn times_out() {
        let token = CancellationToken::new();
        let started = Instant::now();
        let out = call_with_deadline("slow", Duration::from_millis(50), &token, || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert!(matches!(out, Err(ExternalCallError::Timeout { duration_ms: 50, .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let out = call_with_deadline("slow", Duration::from_secs(10), &token, || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert!(matches!(out, Err(ExternalCallError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();

        let again: Result<(), _> = call_with_deadline("svc", Duration::from_secs(1), &token, || Ok(()));
        assert!(matches!(again, Err(ExternalCallError::Cancelled { .. })));
    }
}
