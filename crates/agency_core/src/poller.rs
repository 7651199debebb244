use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::notifications::{Notification, NotificationSink};
use crate::task::{SnapshotDiffer, TaskEntry};

/// Backend feed returning the full current task list for one staff member.
/// There is no delta protocol; every call returns the whole list.
pub trait TaskSource: Send + Sync {
    fn fetch_tasks(&self, actor_id: &str) -> Result<Vec<TaskEntry>>;
}

struct PollerShared {
    source: Arc<dyn TaskSource>,
    sink: Arc<dyn NotificationSink>,
    differ: Mutex<SnapshotDiffer>,
    running: AtomicBool,
    sleep_lock: Mutex<()>,
    stop_signal: Condvar,
}

impl PollerShared {
    /// One fetch against the backend. Failures go to the log side channel and
    /// leave the stored snapshot untouched; the next tick retries.
    fn fetch(&self, actor_id: &str) -> Option<Vec<TaskEntry>> {
        match self.source.fetch_tasks(actor_id) {
            Ok(entries) => Some(entries),
            Err(err) => {
                warn!(actor_id, %err, "task fetch failed, keeping previous snapshot");
                None
            }
        }
    }

    /// Diff-and-emit step. At most one notification per tick: the first new
    /// task in fetch order represents the batch.
    fn apply(&self, entries: Vec<TaskEntry>) {
        let fresh = self.differ.lock().observe(&entries);
        if let Some(first) = fresh.first() {
            debug!(new_tasks = fresh.len(), "detected newly assigned tasks");
            self.sink.notify(Notification::new_task(&first.name));
        }
    }
}

/// Watches one actor's task list on a fixed interval and pushes a transient
/// notification when a task shows up that the previous snapshot did not have.
///
/// Ticks run sequentially on a single worker thread, so a fetch slower than
/// the interval delays the next tick instead of overlapping it.
pub struct TaskPoller {
    shared: Arc<PollerShared>,
    worker: Option<JoinHandle<()>>,
}

impl TaskPoller {
    pub fn new(source: Arc<dyn TaskSource>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                source,
                sink,
                differ: Mutex::new(SnapshotDiffer::new()),
                running: AtomicBool::new(false),
                sleep_lock: Mutex::new(()),
                stop_signal: Condvar::new(),
            }),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Last task list the poller observed, in fetch order.
    pub fn snapshot(&self) -> Option<Vec<TaskEntry>> {
        self.shared.differ.lock().snapshot().map(|entries| entries.to_vec())
    }

    /// Starts the repeating fetch-diff-notify cycle for `actor_id`. The first
    /// successful fetch only seeds the snapshot; notifications begin with the
    /// second. Errors if already started; call [`TaskPoller::stop`] first
    /// when the actor changes.
    pub fn start(&mut self, actor_id: &str, interval: Duration) -> Result<()> {
        ensure!(!actor_id.trim().is_empty(), "actor id must not be empty");
        ensure!(!interval.is_zero(), "poll interval must be positive");
        ensure!(self.worker.is_none(), "poller is already running");

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let actor = actor_id.to_string();
        let handle = thread::Builder::new()
            .name("task-poller".to_string())
            .spawn(move || poll_loop(shared, actor, interval))
            .context("failed to spawn poller thread")?;
        self.worker = Some(handle);
        debug!(actor_id, interval_ms = interval.as_millis() as u64, "polling started");
        Ok(())
    }

    /// Stops the cycle and waits for the worker to wind down. Idempotent. A
    /// fetch already in flight finishes but its result is discarded, so no
    /// notification can arrive after this returns.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.worker.take() else {
            return;
        };
        {
            let _guard = self.shared.sleep_lock.lock();
            self.shared.stop_signal.notify_all();
        }
        if handle.join().is_err() {
            warn!("poller thread panicked during shutdown");
        }
        debug!("polling stopped");
    }

    /// Runs one fetch-diff-notify cycle on the caller's thread, for the
    /// host's manual refresh action. Shares the snapshot with the background
    /// loop, so a task already seen there stays seen here.
    pub fn poll_now(&self, actor_id: &str) {
        if let Some(entries) = self.shared.fetch(actor_id) {
            self.shared.apply(entries);
        }
    }

    /// Forgets the snapshot, e.g. after switching actors.
    pub fn reset(&self) {
        self.shared.differ.lock().reset();
    }
}

impl Drop for TaskPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(shared: Arc<PollerShared>, actor: String, interval: Duration) {
    while shared.running.load(Ordering::SeqCst) {
        let fetched = shared.fetch(&actor);
        // A stop issued while the fetch was in flight discards its result.
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        if let Some(entries) = fetched {
            shared.apply(entries);
        }

        let mut guard = shared.sleep_lock.lock();
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        shared.stop_signal.wait_for(&mut guard, interval);
    }
}
