//! Units of I/O work handed to the [`RequestScheduler`](crate::scheduler::RequestScheduler).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one fetch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A shared `f64` the tile writes every frame and the scheduler reads when
/// ordering queued requests. Lower is more urgent.
#[derive(Clone, Debug, Default)]
pub struct PriorityCell(Arc<AtomicU64>);

impl PriorityCell {
    pub fn new(priority: f64) -> Self {
        Self(Arc::new(AtomicU64::new(priority.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, priority: f64) {
        self.0.store(priority.to_bits(), Ordering::Relaxed);
    }
}

/// Cooperative cancellation flag shared with the fetch worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lifecycle of a [`Request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Created but not yet handed to the scheduler.
    Unissued,
    /// Queued in the scheduler, waiting for a slot.
    Issued,
    /// Bytes are being transferred.
    Active,
    /// Bytes arrived.
    Received,
    /// Cancelled explicitly or bumped from the queue.
    Cancelled,
    /// The transfer failed.
    Failed,
}

/// One fetch attempt. A retry creates a new request.
#[derive(Clone, Debug)]
pub struct Request {
    pub id: RequestId,
    pub url: String,
    pub server_key: String,
    /// Subject to the global request limit.
    pub throttle: bool,
    /// Subject to the per-server request limit.
    pub throttle_by_server: bool,
    pub priority: PriorityCell,
    pub cancel: CancelToken,
    pub state: RequestState,
}

impl Request {
    /// A throttled tile request reading its priority from `priority`.
    pub fn new(url: String, server_key: String, priority: PriorityCell) -> Self {
        Self {
            id: RequestId::next(),
            url,
            server_key,
            throttle: true,
            throttle_by_server: true,
            priority,
            cancel: CancelToken::new(),
            state: RequestState::Unissued,
        }
    }

    pub fn unthrottled(mut self) -> Self {
        self.throttle = false;
        self.throttle_by_server = false;
        self
    }

    pub fn priority(&self) -> f64 {
        self.priority.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The priority cell is shared between clones.
    #[test]
    fn test_priority_cell_is_live() {
        let cell = PriorityCell::new(5.0);
        let request = Request::new("a".into(), "file".into(), cell.clone());
        cell.set(1.5);
        assert_eq!(request.priority(), 1.5);
    }

    /// Cancelling a token is visible through every clone.
    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let worker_copy = token.clone();
        assert!(!worker_copy.is_cancelled());
        token.cancel();
        assert!(worker_copy.is_cancelled());
    }

    /// Each request gets a fresh id and starts unissued.
    #[test]
    fn test_new_request_ids_are_unique() {
        let a = Request::new("a".into(), "file".into(), PriorityCell::default());
        let b = Request::new("a".into(), "file".into(), PriorityCell::default());
        assert_ne!(a.id, b.id);
        assert_eq!(a.state, RequestState::Unissued);
        assert!(a.throttle && a.throttle_by_server);
    }
}
