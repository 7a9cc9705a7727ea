//! Cancellable operation contexts.
//!
//! Every store operation takes a [`Context`]. A context ends when its
//! [`CancelHandle`] is cancelled (or dropped) or when its deadline passes.
//! Blocking waits select on the context so they wake up as soon as it ends.

use crate::error::{Result, StoreError};
use crossbeam_channel::{never, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Operation context carrying cancellation and an optional deadline.
#[derive(Clone, Debug)]
pub struct Context {
    /// Disconnects when the context is cancelled. Never carries a message.
    done: Receiver<()>,
    deadline: Option<Instant>,
}

/// Cancels the [`Context`] it was created with.
///
/// Dropping the handle cancels as well.
#[derive(Debug)]
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancel the context. Idempotent.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Context {
    /// A context that never ends.
    pub fn background() -> Self {
        Self {
            done: never(),
            deadline: None,
        }
    }

    /// A context ended by the returned handle.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, done) = crossbeam_channel::bounded(0);
        let handle = CancelHandle {
            sender: Mutex::new(Some(sender)),
        };
        (
            Self {
                done,
                deadline: None,
            },
            handle,
        )
    }

    /// Derive a context that also ends after `timeout`.
    ///
    /// Keeps this context's cancellation and the earlier of the two deadlines.
    /// A timeout too large to represent adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context that also ends at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            done: self.done.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has been cancelled. Deadlines are not consulted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Fail fast if the context has ended.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleep for `duration`, waking early if the context ends.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        let timer = crossbeam_channel::after(duration);
        select! {
            recv(timer) -> _ => Ok(()),
            recv(self.done) -> _ => Err(StoreError::Cancelled),
            recv(self.deadline_signal()) -> _ => Err(StoreError::DeadlineExceeded),
        }
    }

    /// Disconnects on cancellation.
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }

    /// Fires once at the deadline; never fires without one.
    pub(crate) fn deadline_signal(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => never(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
