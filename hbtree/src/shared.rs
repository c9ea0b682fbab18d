//! State shared by every node of one heartbeat tree.
//!
//! The root node creates a [`SharedState`]; children hold clones of the
//! root's `Arc`. All cross-node bookkeeping goes through one mutex:
//!
//! - the tree-wide event counter that assigns shared ids
//! - the last global timestamp and total elapsed time between any two events
//! - the clock
//! - the energy backends
//!
//! The only way to read the clock, assign a shared id or sample energy is
//! through a [`SharedGuard`], so those operations always run under the lock
//! and siblings observe one serialized sequence of timestamps and energy
//! readings. Per-node state never lives here.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::clock::Clock;
use crate::energy::EnergyBackendSet;

/// Identifies a node within its tree. The root is always node 0.
pub type NodeId = u64;

/// Clock, counter and energy backends shared across a heartbeat tree.
pub struct SharedState {
    clock: Arc<dyn Clock>,
    inner: Mutex<SharedInner>,
    next_node_id: AtomicU64,
}

#[derive(Debug, Default)]
struct SharedInner {
    /// Set once the first event has been recorded.
    valid: bool,
    counter: u64,
    last_timestamp: i64,
    total_time: i64,
    backends: EnergyBackendSet,
    /// Set when a non-empty backend set has been finished.
    backends_finished: bool,
    warned_after_finish: bool,
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedState")
            .field("counter", &inner.counter)
            .field("last_timestamp", &inner.last_timestamp)
            .field("total_time", &inner.total_time)
            .field("backends", &inner.backends)
            .field("backends_finished", &inner.backends_finished)
            .finish_non_exhaustive()
    }
}

impl SharedState {
    /// Creates the shared state for a new tree.
    pub(crate) fn new(clock: Arc<dyn Clock>, backends: EnergyBackendSet) -> Self {
        Self {
            clock,
            inner: Mutex::new(SharedInner {
                backends,
                ..SharedInner::default()
            }),
            next_node_id: AtomicU64::new(0),
        }
    }

    /// Acquires the shared lock.
    pub(crate) fn lock(&self) -> SharedGuard<'_> {
        SharedGuard {
            clock: self.clock.as_ref(),
            inner: self.inner.lock(),
        }
    }

    /// Hands out the next node id.
    pub(crate) fn allocate_node_id(&self) -> NodeId {
        self.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Finishes every energy backend. Later samples read 0.
    pub(crate) fn finish_backends(&self) {
        let mut inner = self.inner.lock();
        if !inner.backends.is_empty() {
            inner.backends.finish();
            inner.backends_finished = true;
        }
    }

    /// Number of heartbeats registered across the whole tree.
    pub fn event_count(&self) -> u64 {
        self.inner.lock().counter
    }

    /// Nanoseconds elapsed between the first and the latest event in the tree.
    pub fn elapsed_ns(&self) -> i64 {
        self.inner.lock().total_time
    }

    /// Timestamp of the latest event in the tree, if any.
    pub fn last_timestamp(&self) -> Option<i64> {
        let inner = self.inner.lock();
        inner.valid.then_some(inner.last_timestamp)
    }

    /// Source names of the tree's active energy backends.
    pub fn backend_sources(&self) -> Vec<String> {
        self.inner.lock().backends.sources()
    }

    /// Whether the tree's energy backends have been finished by the root.
    ///
    /// Heartbeats registered afterwards read a cumulative energy of 0, so
    /// their energy delta is negative.
    pub fn backends_finished(&self) -> bool {
        self.inner.lock().backends_finished
    }
}

/// Exclusive access to a tree's shared state.
///
/// Dropping the guard releases the lock.
pub struct SharedGuard<'a> {
    clock: &'a dyn Clock,
    inner: MutexGuard<'a, SharedInner>,
}

impl SharedGuard<'_> {
    /// Reads the tree's clock.
    pub fn now(&self) -> i64 {
        self.clock.now_ns()
    }

    /// Records one event at `timestamp` and returns its shared id.
    ///
    /// The first event only sets the baseline timestamp; every later event
    /// adds the gap since the previous one to the tree's elapsed time.
    pub fn record_event(&mut self, timestamp: i64) -> u64 {
        let inner = &mut *self.inner;
        let shared_id = inner.counter;
        inner.counter += 1;

        if inner.valid {
            inner.total_time += timestamp - inner.last_timestamp;
        } else {
            inner.valid = true;
        }
        inner.last_timestamp = timestamp;

        shared_id
    }

    /// Samples every energy backend once and returns the summed reading.
    ///
    /// After the root has finished the backends this reads 0; the first such
    /// sample logs a warning.
    pub fn sample_energy(&mut self) -> f64 {
        let inner = &mut *self.inner;
        if inner.backends_finished && !inner.warned_after_finish {
            inner.warned_after_finish = true;
            warn!(
                event = inner.counter,
                "registration after the tree's energy backends were finished; energy reads 0"
            );
        }
        inner.backends.read_total()
    }
}
