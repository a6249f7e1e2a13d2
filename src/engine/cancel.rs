//! Cooperative cancellation.
//!
//! A cancel stops new steps from being dispatched. A terminate additionally
//! stops in-flight steps from writing checkpoints or touching counters once
//! their provider call returns. Neither interrupts a provider call.

use tokio::sync::watch;

/// Cancellation level, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelState {
    /// Running normally.
    Running,
    /// No new steps may start.
    Canceled,
    /// No new steps may start and finished steps skip bookkeeping.
    Terminated,
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<CancelState>,
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<CancelState>,
}

impl CancellationSource {
    /// Creates a signal in the running state.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(CancelState::Running);
        Self { sender }
    }

    /// Returns a token observing this signal.
    #[must_use]
    pub fn token(&self) -> Cancellation {
        Cancellation {
            receiver: self.sender.subscribe(),
        }
    }

    /// Requests a graceful cancel.
    pub fn cancel(&self) {
        self.raise(CancelState::Canceled);
    }

    /// Requests termination.
    pub fn terminate(&self) {
        self.raise(CancelState::Terminated);
    }

    fn raise(&self, state: CancelState) {
        self.sender.send_if_modified(|current| {
            if *current < state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// Returns a token that never fires.
    #[must_use]
    pub fn none() -> Self {
        CancellationSource::new().token()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CancelState {
        *self.receiver.borrow()
    }

    /// Returns true once a cancel or terminate was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state() >= CancelState::Canceled
    }

    /// Returns true once termination was requested.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == CancelState::Terminated
    }
}
