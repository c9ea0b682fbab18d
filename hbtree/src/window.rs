//! Running totals and sliding-window sums for one node.
//!
//! Every registration produces a [`Delta`]: the elapsed time, work, accuracy
//! and energy attributed to that heartbeat. A node keeps two [`Totals`]:
//!
//! - **global**: sum of every delta since the node was created
//! - **window**: sum of the deltas of the last `window_size` registrations
//!
//! The window is maintained incrementally: each registration adds its own
//! delta and subtracts the delta stored in the ring slot `window_size`
//! positions behind the write cursor. Slots that have never been written
//! hold zeroed records, so the window is correct before it fills without
//! any special case.

/// The amounts attributed to a single heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Delta {
    /// Nanoseconds since the previous reference timestamp.
    pub time: i64,
    /// Work units completed.
    pub work: u64,
    /// Accuracy reported for the work.
    pub accuracy: f64,
    /// Energy consumed since the previous reference reading.
    pub energy: f64,
}

/// Accumulated amounts over some span of heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    /// Nanoseconds.
    pub time: i64,
    /// Work units.
    pub work: u64,
    /// Accuracy.
    pub accuracy: f64,
    /// Energy.
    pub energy: f64,
}

impl Totals {
    /// Adds one delta.
    pub fn accumulate(&mut self, delta: &Delta) {
        self.time += delta.time;
        self.work = self.work.wrapping_add(delta.work);
        self.accuracy += delta.accuracy;
        self.energy += delta.energy;
    }

    /// Adds `entering` and removes `leaving`, sliding the window by one.
    pub fn slide(&mut self, entering: &Delta, leaving: &Delta) {
        self.time += entering.time - leaving.time;
        // Modular so the intermediate sum cannot trap; the result is exact
        // because `leaving.work` is already part of the window sum.
        self.work = self.work.wrapping_add(entering.work).wrapping_sub(leaving.work);
        self.accuracy += entering.accuracy - leaving.accuracy;
        self.energy += entering.energy - leaving.energy;
    }
}

/// A node's last reference point, handed to another node for one registration.
///
/// Passing an upstream node's baseline to a downstream node's registration
/// makes the downstream latency and energy delta measure from the upstream
/// node's last heartbeat instead of the downstream node's own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Timestamp of the node's latest heartbeat, in nanoseconds.
    pub timestamp: i64,
    /// Cumulative energy reading taken at that heartbeat.
    pub energy: f64,
}

/// Per-node aggregates. Never shared, never locked.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalState {
    /// Set once the bootstrap heartbeat has been observed.
    valid: bool,
    last_timestamp: i64,
    last_energy: f64,
    global: Totals,
    window: Totals,
}

impl LocalState {
    /// Reference point of the latest heartbeat, once there has been one.
    pub(crate) fn baseline(&self) -> Option<Baseline> {
        self.valid.then_some(Baseline {
            timestamp: self.last_timestamp,
            energy: self.last_energy,
        })
    }

    /// Replaces the reference point the next delta is measured from.
    pub(crate) fn adopt(&mut self, baseline: Baseline) {
        self.last_timestamp = baseline.timestamp;
        self.last_energy = baseline.energy;
    }

    /// Folds one heartbeat into the totals and returns its delta.
    ///
    /// The first heartbeat is the bootstrap event: its delta is all zeros
    /// whatever work and accuracy were reported. `evicted` is the delta of
    /// the record leaving the window.
    pub(crate) fn observe(
        &mut self,
        timestamp: i64,
        energy: f64,
        work: u64,
        accuracy: f64,
        evicted: &Delta,
    ) -> Delta {
        let delta = if self.valid {
            Delta {
                time: timestamp - self.last_timestamp,
                work,
                accuracy,
                energy: energy - self.last_energy,
            }
        } else {
            self.valid = true;
            Delta::default()
        };

        self.global.accumulate(&delta);
        self.window.slide(&delta, evicted);
        self.last_timestamp = timestamp;
        self.last_energy = energy;

        delta
    }

    pub(crate) fn global(&self) -> &Totals {
        &self.global
    }

    pub(crate) fn window(&self) -> &Totals {
        &self.window
    }
}
