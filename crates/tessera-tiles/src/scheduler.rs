//! Throttled, priority-ordered request scheduling over a pool of fetch workers.
//!
//! Requests wait in a bounded queue ordered by their live priority and are
//! started when a global slot and a per-server slot are free. Byte transfer
//! runs on background threads; results are drained once per frame by
//! [`RequestScheduler::update`].

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rustc_hash::FxHashMap;
use tessera_config::RequestConfig;

use crate::error::{FetchError, TileError};
use crate::fetcher::ByteFetcher;
use crate::request::{CancelToken, Request, RequestId, RequestState};

/// Scheduler limits.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum concurrently active throttled requests.
    pub max_requests: usize,
    /// Maximum concurrently active requests per server key.
    pub max_requests_per_server: usize,
    /// Maximum requests waiting in the queue.
    pub priority_heap_length: usize,
    /// When false every request starts immediately.
    pub throttle_requests: bool,
    /// Number of fetch worker threads.
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&RequestConfig::default())
    }
}

impl From<&RequestConfig> for SchedulerConfig {
    fn from(config: &RequestConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            max_requests_per_server: config.max_requests_per_server,
            priority_heap_length: config.priority_heap_length,
            throttle_requests: config.throttle_requests,
            worker_threads: config.worker_threads,
        }
    }
}

/// How a scheduled request ended.
#[derive(Debug)]
pub enum FetchOutcome {
    Received(Vec<u8>),
    /// Bumped from the queue by a more urgent request. Retryable.
    Cancelled,
    Failed(FetchError),
}

/// A finished request, reported by [`RequestScheduler::update`].
#[derive(Debug)]
pub struct FetchCompletion {
    pub id: RequestId,
    pub url: String,
    pub outcome: FetchOutcome,
}

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStatistics {
    pub attempted: u64,
    pub started: u64,
    pub received: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Requests refused because the queue was full of more urgent ones.
    pub rejected: u64,
}

struct FetchJob {
    id: RequestId,
    url: String,
    cancel: CancelToken,
}

struct FetchResult {
    id: RequestId,
    /// `None` when the worker saw the request cancelled.
    result: Option<Result<Vec<u8>, FetchError>>,
}

/// Throttles requests globally and per server and dispatches them by priority.
pub struct RequestScheduler {
    config: SchedulerConfig,
    job_sender: Option<Sender<FetchJob>>,
    result_receiver: Receiver<FetchResult>,
    worker_handles: Vec<JoinHandle<()>>,
    /// Admitted requests waiting for a slot.
    issued: Vec<Request>,
    active: FxHashMap<RequestId, Request>,
    active_by_server: FxHashMap<String, usize>,
    /// Queue evictions reported on the next update.
    bumped: Vec<FetchCompletion>,
    statistics: SchedulerStatistics,
}

impl RequestScheduler {
    /// Spawn the fetch workers.
    pub fn new(config: SchedulerConfig, fetcher: Arc<dyn ByteFetcher>) -> Result<Self, TileError> {
        let (job_sender, job_receiver) = unbounded::<FetchJob>();
        let (result_sender, result_receiver) = unbounded::<FetchResult>();

        let worker_count = config.worker_threads.max(1);
        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let receiver = job_receiver.clone();
            let sender = result_sender.clone();
            let fetcher = Arc::clone(&fetcher);

            let handle = std::thread::Builder::new()
                .name("tile-fetch-worker".into())
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        // Check cancellation before starting the transfer.
                        if job.cancel.is_cancelled() {
                            let _ = sender.send(FetchResult {
                                id: job.id,
                                result: None,
                            });
                            continue;
                        }

                        let result = fetcher.fetch(&job.url);

                        // Check cancellation after the transfer.
                        let result = (!job.cancel.is_cancelled()).then_some(result);
                        let _ = sender.send(FetchResult { id: job.id, result });
                    }
                })
                .map_err(TileError::WorkerSpawn)?;
            worker_handles.push(handle);
        }

        Ok(Self {
            config,
            job_sender: Some(job_sender),
            result_receiver,
            worker_handles,
            issued: Vec::new(),
            active: FxHashMap::default(),
            active_by_server: FxHashMap::default(),
            bumped: Vec::new(),
            statistics: SchedulerStatistics::default(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether `server_key` can take `desired` more active requests.
    pub fn server_has_open_slots(&self, server_key: &str, desired: usize) -> bool {
        if !self.config.throttle_requests {
            return true;
        }
        let active = self.active_by_server.get(server_key).copied().unwrap_or(0);
        active + desired <= self.config.max_requests_per_server
    }

    /// Whether all of `server_keys` could be admitted at once.
    pub fn has_open_slots(&self, server_keys: &[&str]) -> bool {
        if !self.config.throttle_requests {
            return true;
        }
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for key in server_keys {
            *counts.entry(*key).or_default() += 1;
        }
        counts
            .iter()
            .all(|(key, &count)| self.server_has_open_slots(key, count))
            && self.issued.len() + server_keys.len() <= self.config.priority_heap_length
    }

    /// Admit a request.
    ///
    /// Returns `None` when it was not admitted; that is not an error and the
    /// caller should try again on a later frame.
    pub fn request(&mut self, mut request: Request) -> Option<RequestId> {
        self.statistics.attempted += 1;
        let throttle = self.config.throttle_requests;

        if throttle && request.throttle_by_server && !self.server_has_open_slots(&request.server_key, 1)
        {
            return None;
        }
        if !throttle || !request.throttle {
            let id = request.id;
            self.start(request);
            return Some(id);
        }
        if self.active.len() >= self.config.max_requests {
            return None;
        }

        if self.issued.len() >= self.config.priority_heap_length {
            let worst = self
                .issued
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.priority().total_cmp(&b.priority()))
                .map(|(index, r)| (index, r.priority()));
            let Some((index, worst_priority)) = worst else {
                self.statistics.rejected += 1;
                return None;
            };
            if request.priority() >= worst_priority {
                self.statistics.rejected += 1;
                return None;
            }
            let mut bumped = self.issued.swap_remove(index);
            bumped.cancel.cancel();
            bumped.state = RequestState::Cancelled;
            self.statistics.cancelled += 1;
            tracing::debug!("request {} bumped from the queue: {}", bumped.id, bumped.url);
            self.bumped.push(FetchCompletion {
                id: bumped.id,
                url: bumped.url,
                outcome: FetchOutcome::Cancelled,
            });
        }

        request.state = RequestState::Issued;
        let id = request.id;
        self.issued.push(request);
        Some(id)
    }

    /// Cancel a queued or active request. Its completion is never reported.
    ///
    /// Returns `false` if the request already finished.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        if let Some(index) = self.issued.iter().position(|r| r.id == id) {
            let request = self.issued.swap_remove(index);
            request.cancel.cancel();
            self.statistics.cancelled += 1;
            return true;
        }
        if let Some(request) = self.active.remove(&id) {
            request.cancel.cancel();
            self.release_server_slot(&request.server_key);
            self.statistics.cancelled += 1;
            return true;
        }
        false
    }

    /// Collect finished requests and start queued ones in priority order.
    ///
    /// Call this once per frame on the control thread.
    pub fn update(&mut self) -> Vec<FetchCompletion> {
        let mut completions = std::mem::take(&mut self.bumped);

        while let Ok(FetchResult { id, result }) = self.result_receiver.try_recv() {
            // Requests cancelled by the caller are no longer tracked.
            let Some(mut request) = self.active.remove(&id) else {
                continue;
            };
            self.release_server_slot(&request.server_key);
            let outcome = match result {
                Some(Ok(bytes)) => {
                    request.state = RequestState::Received;
                    self.statistics.received += 1;
                    FetchOutcome::Received(bytes)
                }
                Some(Err(error)) => {
                    request.state = RequestState::Failed;
                    self.statistics.failed += 1;
                    FetchOutcome::Failed(error)
                }
                None => {
                    request.state = RequestState::Cancelled;
                    FetchOutcome::Cancelled
                }
            };
            completions.push(FetchCompletion {
                id,
                url: request.url,
                outcome,
            });
        }

        let mut queued = std::mem::take(&mut self.issued);
        queued.sort_by(|a, b| a.priority().total_cmp(&b.priority()));
        let open_slots = self.config.max_requests.saturating_sub(self.active.len());
        let mut filled = 0;
        for request in queued {
            if request.is_cancelled() {
                continue;
            }
            let server_full = request.throttle_by_server
                && !self.server_has_open_slots(&request.server_key, 1);
            if filled >= open_slots || server_full {
                self.issued.push(request);
                continue;
            }
            self.start(request);
            filled += 1;
        }

        completions
    }

    fn start(&mut self, mut request: Request) {
        request.state = RequestState::Active;
        self.statistics.started += 1;
        *self
            .active_by_server
            .entry(request.server_key.clone())
            .or_default() += 1;

        let job = FetchJob {
            id: request.id,
            url: request.url.clone(),
            cancel: request.cancel.clone(),
        };
        let sent = self
            .job_sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !sent {
            self.release_server_slot(&request.server_key);
            self.statistics.failed += 1;
            self.bumped.push(FetchCompletion {
                id: request.id,
                url: request.url.clone(),
                outcome: FetchOutcome::Failed(FetchError::Transport {
                    url: request.url,
                    message: "fetch workers have shut down".to_string(),
                }),
            });
            return;
        }
        self.active.insert(request.id, request);
    }

    fn release_server_slot(&mut self, server_key: &str) {
        if let Some(count) = self.active_by_server.get_mut(server_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.active_by_server.remove(server_key);
            }
        }
    }

    /// Requests waiting for a slot.
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    /// Requests currently transferring.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        self.statistics
    }

    /// Shut down all worker threads.
    ///
    /// Drops the job sender to signal workers to exit, then joins all threads.
    pub fn shutdown(&mut self) {
        for request in self.active.values() {
            request.cancel.cancel();
        }
        self.job_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
