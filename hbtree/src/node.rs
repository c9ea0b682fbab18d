//! Heartbeat nodes: construction, registration, queries and teardown.
//!
//! A [`Heartbeat`] is one node of a heartbeat tree. The root node is built
//! with [`HeartbeatBuilder::build`] and owns the tree's [`SharedState`]
//! (clock, tree-wide event counter, energy backends); children are built
//! with [`HeartbeatBuilder::build_child`] and share their parent's state.
//!
//! # Design
//!
//! - Registration holds the shared lock only while it adopts a baseline,
//!   reads the clock, assigns the shared id and samples energy
//! - Window and global totals, the ring buffer and the sink belong to the
//!   node alone; `register` takes `&mut self`, so there is one writer
//! - Records reach the sink in full-ring batches when the write cursor
//!   wraps, and the remainder at teardown
//! - Sink failures never fail a registration; the first one is kept for
//!   [`Heartbeat::take_sink_error`] and [`Heartbeat::finish`]
//!
//! # Example
//!
//! ```rust
//! use hbtree::{HeartbeatBuilder, HeartbeatConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = HeartbeatBuilder::new(HeartbeatConfig::new(10, 20)?).build()?;
//! let mut stage = HeartbeatBuilder::new(HeartbeatConfig::new(10, 20)?).build_child(&root)?;
//!
//! for item in 0..5 {
//!     stage.beat(item, 1);
//! }
//! assert_eq!(stage.history(10).len(), 5);
//! assert_eq!(root.shared().event_count(), 5);
//!
//! stage.finish()?;
//! root.finish()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HeartbeatConfig;
use crate::energy::{EnergyBackend, EnergyBackendSet};
use crate::error::{ConstructionError, HbError, Result, SinkError};
use crate::record::{BeatIds, Record};
use crate::ring::RecordRing;
use crate::shared::{NodeId, SharedState};
use crate::sink::{RecordSink, open_sink};
use crate::window::{Baseline, LocalState};

/// Builds root and child heartbeat nodes.
pub struct HeartbeatBuilder {
    config: HeartbeatConfig,
    backends: Vec<Box<dyn EnergyBackend>>,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Box<dyn RecordSink>>,
}

impl fmt::Debug for HeartbeatBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatBuilder")
            .field("config", &self.config)
            .field("backends", &self.backends.len())
            .field("custom_clock", &self.clock.is_some())
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

impl HeartbeatBuilder {
    /// Starts a builder for a node with the given configuration.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            backends: Vec::new(),
            clock: None,
            sink: None,
        }
    }

    /// Adds an energy backend. Root nodes only.
    #[must_use]
    pub fn energy_backend<B: EnergyBackend + 'static>(mut self, backend: B) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    /// Adds several energy backends, in order. Root nodes only.
    #[must_use]
    pub fn energy_backends(mut self, backends: Vec<Box<dyn EnergyBackend>>) -> Self {
        self.backends.extend(backends);
        self
    }

    /// Replaces the system clock. Root nodes only.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sends records to `sink` instead of the log file in the configuration.
    #[must_use]
    pub fn sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the root node of a new tree.
    ///
    /// Energy backends are initialized first, in order. If anything after
    /// that fails, the initialized backends are finished before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) if the configuration is invalid;
    ///   nothing has been initialized or opened in that case
    /// - [`ConstructionError`](crate::error::ConstructionError) if a backend, the
    ///   ring buffer, or the sink cannot be set up
    pub fn build(self) -> Result<Heartbeat> {
        self.config.validate()?;

        let mut backends = EnergyBackendSet::init(self.backends)?;
        let (ring, output) = match prepare(&self.config, self.sink) {
            Ok(parts) => parts,
            Err(e) => {
                backends.finish();
                return Err(e);
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let shared = Arc::new(SharedState::new(clock, backends));
        Ok(Heartbeat::assemble(self.config, shared, None, ring, output))
    }

    /// Builds a child of `parent`, sharing its clock, event counter and
    /// energy backends.
    ///
    /// Energy backends or a clock given to this builder are ignored.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) if the configuration is invalid
    /// - [`ConstructionError`](crate::error::ConstructionError) if the ring buffer
    ///   or the sink cannot be set up
    pub fn build_child(self, parent: &Heartbeat) -> Result<Heartbeat> {
        self.config.validate()?;

        if !self.backends.is_empty() {
            warn!(
                parent = parent.id,
                count = self.backends.len(),
                "ignoring energy backends given to a child node"
            );
        }
        if self.clock.is_some() {
            warn!(parent = parent.id, "ignoring clock given to a child node");
        }

        let (ring, output) = prepare(&self.config, self.sink)?;
        Ok(Heartbeat::assemble(
            self.config,
            Arc::clone(&parent.shared),
            Some(parent.id),
            ring,
            output,
        ))
    }
}

/// Allocates the ring and opens the sink, writing its header.
fn prepare(
    config: &HeartbeatConfig,
    sink: Option<Box<dyn RecordSink>>,
) -> Result<(RecordRing, Option<Output>)> {
    let ring = RecordRing::with_depth(config.buffer_depth)?;

    let sink = match (sink, &config.log) {
        (Some(sink), _) => Some(sink),
        (None, Some(log)) => Some(open_sink(log)?),
        (None, None) => None,
    };

    let output = match sink {
        Some(mut sink) => {
            sink.write_header()
                .map_err(ConstructionError::SinkHeader)?;
            Some(Output::new(sink))
        }
        None => None,
    };

    Ok((ring, output))
}

/// A node's sink plus its failure bookkeeping.
struct Output {
    sink: Box<dyn RecordSink>,
    /// First failure not yet handed to the caller.
    pending: Option<SinkError>,
    failures: u64,
}

impl Output {
    fn new(sink: Box<dyn RecordSink>) -> Self {
        Self {
            sink,
            pending: None,
            failures: 0,
        }
    }

    fn deliver(&mut self, records: &[Record], node: NodeId) {
        match self.sink.write_records(records) {
            Ok(()) => debug!(node, count = records.len(), "flushed heartbeat records"),
            Err(e) => self.fail(e, node),
        }
    }

    fn fail(&mut self, error: SinkError, node: NodeId) {
        warn!(node, error = %error, "heartbeat sink write failed");
        self.failures += 1;
        if self.pending.is_none() {
            self.pending = Some(error);
        }
    }

    /// Writes the remaining records and closes the sink.
    fn close(&mut self, remaining: &[Record], node: NodeId) -> std::result::Result<(), SinkError> {
        if !remaining.is_empty() {
            self.deliver(remaining, node);
        }
        if let Err(e) = self.sink.close() {
            self.fail(e, node);
        }
        self.pending.take().map_or(Ok(()), Err)
    }
}

/// One node of a heartbeat tree.
///
/// # Thread Safety
///
/// A node is `Send` but registers through `&mut self`. Sibling nodes can
/// live on different threads; they synchronize only on the tree's shared
/// lock.
pub struct Heartbeat {
    id: NodeId,
    parent: Option<NodeId>,
    window_size: usize,
    default_accuracy: f64,
    shared: Arc<SharedState>,
    local: LocalState,
    ring: RecordRing,
    output: Option<Output>,
    finished: bool,
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("window_size", &self.window_size)
            .field("buffer_depth", &self.ring.depth())
            .field("produced", &self.ring.produced())
            .field("has_sink", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl Heartbeat {
    fn assemble(
        config: HeartbeatConfig,
        shared: Arc<SharedState>,
        parent: Option<NodeId>,
        ring: RecordRing,
        output: Option<Output>,
    ) -> Self {
        let id = shared.allocate_node_id();
        debug!(
            node = id,
            ?parent,
            window_size = config.window_size,
            buffer_depth = config.buffer_depth,
            "created heartbeat node"
        );

        Self {
            id,
            parent,
            window_size: config.window_size,
            default_accuracy: config.default_accuracy,
            shared,
            local: LocalState::default(),
            ring,
            output,
            finished: false,
        }
    }

    /// Registers a heartbeat and returns its timestamp in nanoseconds.
    ///
    /// `work` is the number of work units completed since the previous
    /// heartbeat and `accuracy` their accuracy, falling back to the node's
    /// default accuracy when absent or not finite. With a `baseline` (taken from another node through
    /// [`Heartbeat::baseline`]), latency and energy are measured from that
    /// baseline rather than from this node's previous heartbeat.
    ///
    /// The first heartbeat of a node only establishes its reference point:
    /// its latency, work, accuracy and energy are recorded as zero.
    ///
    /// Sink failures during a flush are logged and kept for
    /// [`take_sink_error`](Self::take_sink_error); registration itself
    /// cannot fail.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use hbtree::{HeartbeatBuilder, HeartbeatConfig, ManualClock};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let clock = Arc::new(ManualClock::new(0));
    /// let mut node = HeartbeatBuilder::new(HeartbeatConfig::new(2, 2)?)
    ///     .clock(clock.clone())
    ///     .build()?;
    ///
    /// node.register(0, 0, None, None);
    /// clock.advance(1_000_000_000);
    /// node.register(0, 10, Some(0.5), None);
    ///
    /// assert_eq!(node.instant_rate(), 10.0);
    /// assert_eq!(node.instant_accuracy(), 0.5);
    /// # Ok(())
    /// # }
    /// ```
    pub fn register(
        &mut self,
        user_tag: u64,
        work: u64,
        accuracy: Option<f64>,
        baseline: Option<Baseline>,
    ) -> i64 {
        let accuracy = match accuracy {
            Some(value) if !value.is_finite() => {
                warn!(node = self.id, accuracy = value, "non-finite accuracy, using default");
                self.default_accuracy
            }
            Some(value) => value,
            None => self.default_accuracy,
        };

        let (timestamp, shared_id, energy) = {
            let mut shared = self.shared.lock();
            if let Some(baseline) = baseline {
                self.local.adopt(baseline);
            }
            let timestamp = shared.now();
            let shared_id = shared.record_event(timestamp);
            let energy = shared.sample_energy();
            (timestamp, shared_id, energy)
        };

        let evicted = self.ring.evicted(self.window_size).delta();
        let delta = self
            .local
            .observe(timestamp, energy, work, accuracy, &evicted);

        let ids = BeatIds {
            id: self.ring.produced(),
            shared_id,
            user_tag,
        };
        let record = Record::new(
            ids,
            timestamp,
            &delta,
            self.local.global(),
            self.local.window(),
        );

        if self.ring.push(record)
            && let Some(output) = self.output.as_mut()
        {
            output.deliver(self.ring.slots(), self.id);
        }

        timestamp
    }

    /// Registers a heartbeat with the default accuracy and no baseline.
    pub fn beat(&mut self, user_tag: u64, work: u64) -> i64 {
        self.register(user_tag, work, None, None)
    }

    /// This node's reference point, for handing to another node's
    /// [`register`](Self::register). `None` until the node's first heartbeat.
    pub fn baseline(&self) -> Option<Baseline> {
        self.local.baseline()
    }

    /// The last `n` records, oldest first.
    ///
    /// Returns fewer than `n` records when fewer have been produced or the
    /// ring buffer retains fewer.
    pub fn history(&self, n: usize) -> Vec<Record> {
        self.ring.history(n)
    }

    /// The most recent record, if any heartbeat has been registered.
    pub fn current(&self) -> Option<Record> {
        (!self.ring.is_empty()).then(|| *self.ring.latest())
    }

    /// Number of heartbeats registered on this node.
    pub fn beats(&self) -> u64 {
        self.ring.produced()
    }

    /// Lifetime work per second, as of the latest heartbeat.
    pub fn global_rate(&self) -> f64 {
        self.ring.latest().global_rate()
    }

    /// Window work per second, as of the latest heartbeat.
    pub fn window_rate(&self) -> f64 {
        self.ring.latest().window_rate()
    }

    /// Work per second of the latest heartbeat.
    pub fn instant_rate(&self) -> f64 {
        self.ring.latest().instant_rate()
    }

    /// Lifetime accuracy per second, as of the latest heartbeat.
    pub fn global_accuracy(&self) -> f64 {
        self.ring.latest().global_accuracy()
    }

    /// Window accuracy per second, as of the latest heartbeat.
    pub fn window_accuracy(&self) -> f64 {
        self.ring.latest().window_accuracy()
    }

    /// Accuracy per second of the latest heartbeat.
    pub fn instant_accuracy(&self) -> f64 {
        self.ring.latest().instant_accuracy()
    }

    /// Lifetime power, as of the latest heartbeat.
    pub fn global_power(&self) -> f64 {
        self.ring.latest().global_power()
    }

    /// Window power, as of the latest heartbeat.
    pub fn window_power(&self) -> f64 {
        self.ring.latest().window_power()
    }

    /// Power of the latest heartbeat.
    pub fn instant_power(&self) -> f64 {
        self.ring.latest().instant_power()
    }

    /// Nanoseconds covered by all heartbeats since the first.
    pub fn global_time(&self) -> i64 {
        self.local.global().time
    }

    /// Nanoseconds covered by the heartbeats in the window.
    pub fn window_time(&self) -> i64 {
        self.local.window().time
    }

    /// Work of all heartbeats since the first.
    pub fn global_work(&self) -> u64 {
        self.local.global().work
    }

    /// Work of the heartbeats in the window.
    pub fn window_work(&self) -> u64 {
        self.local.window().work
    }

    /// Energy consumed across all heartbeats since the first.
    pub fn global_energy(&self) -> f64 {
        self.local.global().energy
    }

    /// Energy consumed across the heartbeats in the window.
    pub fn window_energy(&self) -> f64 {
        self.local.window().energy
    }

    /// Sum of the accuracy of all heartbeats since the first.
    pub fn total_accuracy(&self) -> f64 {
        self.local.global().accuracy
    }

    /// Sum of the accuracy of the heartbeats in the window.
    pub fn window_accuracy_sum(&self) -> f64 {
        self.local.window().accuracy
    }

    /// This node's id within its tree. The root is 0.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The parent's id, or `None` for the root.
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns whether this node created the tree.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Heartbeats covered by window metrics.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Records retained by the ring buffer.
    pub fn buffer_depth(&self) -> usize {
        self.ring.depth()
    }

    /// The tree's shared state.
    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Takes the first sink error not yet reported, if any.
    pub fn take_sink_error(&mut self) -> Option<SinkError> {
        self.output.as_mut().and_then(|o| o.pending.take())
    }

    /// Number of failed sink writes so far.
    pub fn sink_failures(&self) -> u64 {
        self.output.as_ref().map_or(0, |o| o.failures)
    }

    /// Flushes and closes the sink, and finishes the energy backends if this
    /// is the root.
    ///
    /// Dropping a node does the same but can only log errors.
    ///
    /// # Errors
    ///
    /// Returns [`HbError::Sink`] with the first sink error not yet taken
    /// through [`take_sink_error`](Self::take_sink_error), including failures
    /// of the final flush.
    pub fn finish(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let result = match self.output.as_mut() {
            Some(output) => output.close(self.ring.pending(), self.id),
            None => Ok(()),
        };

        if self.is_root() {
            self.shared.finish_backends();
        }

        debug!(node = self.id, beats = self.ring.produced(), "finished heartbeat node");
        result.map_err(HbError::from)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(node = self.id, error = %e, "error finishing heartbeat node");
        }
    }
}
