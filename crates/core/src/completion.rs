//! One-shot completion signal handed from a requester to a worker thread.

use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Why a [`Completion`] produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// The completer was dropped without firing.
    #[error("request abandoned before completion")]
    Abandoned,
    #[error("timed out waiting for completion")]
    TimedOut,
}

enum Slot<T> {
    Pending,
    Ready(T),
    Abandoned,
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    fired: Condvar,
}

/// Worker side: fires the signal exactly once.
///
/// Dropping a `Completer` without calling [`Completer::complete`] wakes the
/// waiter with [`CompletionError::Abandoned`], so a requester never waits on
/// work that can no longer finish.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    /// Hand `value` to the waiter.
    pub fn complete(self, value: T) {
        let mut slot = self.shared.slot.lock();
        *slot = Slot::Ready(value);
        self.shared.fired.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Abandoned;
            self.shared.fired.notify_all();
        }
    }
}

/// Requester side of the signal.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// Block until the completer fires or is dropped.
    pub fn wait(self) -> Result<T, CompletionError> {
        let mut slot = self.shared.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(value) => return Ok(value),
                Slot::Pending => {
                    *slot = Slot::Pending;
                    self.shared.fired.wait(&mut slot);
                }
                Slot::Abandoned | Slot::Taken => return Err(CompletionError::Abandoned),
            }
        }
    }

    /// Like [`Completion::wait`] but gives up after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, CompletionError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(value) => return Ok(value),
                Slot::Pending => {
                    *slot = Slot::Pending;
                    if self.shared.fired.wait_until(&mut slot, deadline).timed_out()
                        && matches!(*slot, Slot::Pending)
                    {
                        return Err(CompletionError::TimedOut);
                    }
                }
                Slot::Abandoned | Slot::Taken => return Err(CompletionError::Abandoned),
            }
        }
    }

    /// Whether the completer has fired or been dropped.
    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Pending)
    }
}

/// Create a connected completer/completion pair.
///
/// # Example
/// ```rust
/// use hwimg_core::completion::completion;
///
/// let (done, waiter) = completion::<u32>();
/// std::thread::spawn(move || done.complete(5));
/// assert_eq!(waiter.wait(), Ok(5));
/// ```
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        fired: Condvar::new(),
    });
    (
        Completer {
            shared: shared.clone(),
        },
        Completion { shared },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn value_crosses_threads() {
        let (done, waiter) = completion::<String>();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            done.complete("ok".to_string());
        });
        assert_eq!(waiter.wait().as_deref(), Ok("ok"));
        worker.join().unwrap();
    }

    #[test]
    fn dropped_completer_abandons() {
        let (done, waiter) = completion::<u8>();
        drop(done);
        assert!(waiter.is_done());
        assert_eq!(waiter.wait(), Err(CompletionError::Abandoned));
    }

    #[test]
    fn wait_timeout_expires() {
        let (_done, waiter) = completion::<u8>();
        assert_eq!(
            waiter.wait_timeout(Duration::from_millis(10)),
            Err(CompletionError::TimedOut)
        );
    }
}
