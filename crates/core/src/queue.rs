use crossbeam_queue::{ArrayQueue, SegQueue};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Result of attempting to enqueue.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::{bounded, SendOutcome};
///
/// let (tx, _rx) = bounded::<u8>(1);
/// assert_eq!(tx.send(1), SendOutcome::Ok);
/// assert_eq!(tx.send(2), SendOutcome::Full);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Value was accepted.
    Ok,
    /// Queue is full.
    Full,
    /// Queue is closed.
    Closed,
}

/// Result of attempting to dequeue.
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue has been closed and drained.
    Closed,
    /// Nothing arrived before the deadline.
    Empty,
}

enum Storage<T> {
    Bounded(ArrayQueue<T>),
    Unbounded(SegQueue<T>),
}

impl<T> Storage<T> {
    fn push(&self, value: T) -> Result<(), T> {
        match self {
            Storage::Bounded(q) => q.push(value),
            Storage::Unbounded(q) => {
                q.push(value);
                Ok(())
            }
        }
    }

    fn pop(&self) -> Option<T> {
        match self {
            Storage::Bounded(q) => q.pop(),
            Storage::Unbounded(q) => q.pop(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Bounded(q) => q.len(),
            Storage::Unbounded(q) => q.len(),
        }
    }
}

struct QueueInner<T> {
    queue: Storage<T>,
    closed: AtomicBool,
    // Held while checking for data and while notifying, so a consumer going to
    // sleep cannot miss a wakeup.
    gate: Mutex<()>,
    ready: Condvar,
    space: Condvar,
}

impl<T> QueueInner<T> {
    fn wake(&self) {
        let _gate = self.gate.lock();
        self.ready.notify_all();
        self.space.notify_all();
    }

    /// Pop with the gate already held by the caller.
    fn take_locked(&self) -> RecvOutcome<T> {
        let outcome = match self.queue.pop() {
            Some(value) => RecvOutcome::Data(value),
            None if self.closed.load(Ordering::Acquire) => {
                // A send may have raced the close.
                match self.queue.pop() {
                    Some(value) => RecvOutcome::Data(value),
                    None => RecvOutcome::Closed,
                }
            }
            None => RecvOutcome::Empty,
        };
        if matches!(outcome, RecvOutcome::Data(_)) {
            self.space.notify_one();
        }
        outcome
    }
}

/// Sender half of a blocking FIFO.
///
/// Any number of threads may hold a clone and submit concurrently; values are
/// delivered in the order their `send` calls linearize.
pub struct WorkTx<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for WorkTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkTx<T> {
    /// Enqueue without blocking.
    pub fn send(&self, value: T) -> SendOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return SendOutcome::Closed;
        }
        match self.inner.queue.push(value) {
            Ok(()) => {
                self.inner.wake();
                SendOutcome::Ok
            }
            Err(_) => SendOutcome::Full,
        }
    }

    /// Enqueue, waiting for room when a bounded queue is full.
    ///
    /// Returns [`SendOutcome::Closed`] if the queue is closed before the value
    /// fits; never returns [`SendOutcome::Full`].
    pub fn send_blocking(&self, value: T) -> SendOutcome {
        let mut value = value;
        let mut gate = self.inner.gate.lock();
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return SendOutcome::Closed;
            }
            match self.inner.queue.push(value) {
                Ok(()) => {
                    self.inner.ready.notify_all();
                    return SendOutcome::Ok;
                }
                Err(back) => {
                    value = back;
                    self.inner.space.wait(&mut gate);
                }
            }
        }
    }

    /// Close the queue to further sends and wake the consumer.
    ///
    /// Values already queued are still delivered.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Receiver half of a blocking FIFO.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::{unbounded, RecvOutcome};
///
/// let (tx, rx) = unbounded::<u8>();
/// tx.send(7);
/// tx.close();
/// assert!(matches!(rx.recv(), RecvOutcome::Data(7)));
/// assert!(matches!(rx.recv(), RecvOutcome::Closed));
/// ```
pub struct WorkRx<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> WorkRx<T> {
    /// Take the next value without blocking.
    pub fn try_recv(&self) -> RecvOutcome<T> {
        let _gate = self.inner.gate.lock();
        self.inner.take_locked()
    }

    /// Block until a value arrives or the queue is closed and drained.
    pub fn recv(&self) -> RecvOutcome<T> {
        let mut gate = self.inner.gate.lock();
        loop {
            match self.inner.take_locked() {
                RecvOutcome::Empty => self.inner.ready.wait(&mut gate),
                other => return other,
            }
        }
    }

    /// Block for at most `timeout`; returns `Empty` if nothing arrived.
    pub fn recv_timeout(&self, timeout: Duration) -> RecvOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut gate = self.inner.gate.lock();
        loop {
            match self.inner.take_locked() {
                RecvOutcome::Empty => {
                    if self.inner.ready.wait_until(&mut gate, deadline).timed_out() {
                        return self.inner.take_locked();
                    }
                }
                other => return other,
            }
        }
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close from the consumer side; senders see `Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wake();
    }
}

fn make<T>(queue: Storage<T>) -> (WorkTx<T>, WorkRx<T>) {
    let inner = Arc::new(QueueInner {
        queue,
        closed: AtomicBool::new(false),
        gate: Mutex::new(()),
        ready: Condvar::new(),
        space: Condvar::new(),
    });
    (
        WorkTx {
            inner: inner.clone(),
        },
        WorkRx { inner },
    )
}

/// Create a FIFO holding at most `capacity` values.
pub fn bounded<T>(capacity: usize) -> (WorkTx<T>, WorkRx<T>) {
    make(Storage::Bounded(ArrayQueue::new(capacity.max(1))))
}

/// Create a FIFO without a capacity limit.
pub fn unbounded<T>() -> (WorkTx<T>, WorkRx<T>) {
    make(Storage::Unbounded(SegQueue::new()))
}
