//! Energy-measurement backends.
//!
//! A backend reports a cumulative energy reading each time it is read. The
//! root node of a tree owns the set of configured backends; every
//! registration in the tree samples all of them once, under the shared lock,
//! and sums the readings.
//!
//! # Contract
//!
//! - [`EnergyBackend::source`] names the backend for logs and must not be empty
//! - [`EnergyBackend::read`] returns the cumulative energy; a negative or
//!   non-finite value signals a failed reading, which is logged and left out
//!   of that sample
//! - [`EnergyBackend::init`] and [`EnergyBackend::finish`] are optional setup
//!   and teardown hooks
//!
//! Units are whatever the backend reports (the bundled [`RaplBackend`] uses
//! microjoules). Power metrics are expressed in those units per second.

use std::fmt;
use std::io;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::ConstructionError;

/// A pluggable source of cumulative energy readings.
pub trait EnergyBackend: Send {
    /// Human-readable name of the energy source.
    fn source(&self) -> &str;

    /// Takes one cumulative energy reading. Negative or non-finite values
    /// signal an error.
    fn read(&mut self) -> f64;

    /// Prepares the backend for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be used.
    fn init(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases whatever [`init`](Self::init) acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown failed. Callers log it and move on.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The initialized backends of one heartbeat tree.
#[derive(Default)]
pub struct EnergyBackendSet {
    backends: Vec<Box<dyn EnergyBackend>>,
}

impl fmt::Debug for EnergyBackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyBackendSet")
            .field("sources", &self.sources())
            .finish()
    }
}

impl EnergyBackendSet {
    /// Initializes every backend, in order.
    ///
    /// Initialization is all-or-nothing: if any backend has an empty source
    /// name or fails to initialize, the backends already initialized are
    /// finished before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`ConstructionError::MissingSource`] if a backend has no source name
    /// - [`ConstructionError::BackendInit`] if a backend's `init` fails
    pub fn init(backends: Vec<Box<dyn EnergyBackend>>) -> Result<Self, ConstructionError> {
        let mut started = Self {
            backends: Vec::with_capacity(backends.len()),
        };

        for (index, mut backend) in backends.into_iter().enumerate() {
            if backend.source().is_empty() {
                started.finish();
                return Err(ConstructionError::MissingSource { index });
            }

            if let Err(e) = backend.init() {
                let source_name = backend.source().to_string();
                started.finish();
                return Err(ConstructionError::BackendInit {
                    index,
                    source_name,
                    source: e,
                });
            }

            info!(source = backend.source(), "initialized energy reading");
            started.backends.push(backend);
        }

        Ok(started)
    }

    /// Reads every backend once and returns the sum of the valid readings.
    ///
    /// Negative and non-finite readings are logged and skipped. Returns 0 when
    /// no backends are configured.
    pub fn read_total(&mut self) -> f64 {
        let mut total = 0.0;
        for backend in &mut self.backends {
            let reading = backend.read();
            if !reading.is_finite() || reading < 0.0 {
                warn!(source = backend.source(), reading, "bad energy reading");
                continue;
            }
            total += reading;
        }
        total
    }

    /// Finishes and removes every backend.
    ///
    /// Teardown is best-effort: failures are logged and the remaining
    /// backends are still finished. Calling this again is a no-op.
    pub fn finish(&mut self) {
        for mut backend in self.backends.drain(..) {
            match backend.finish() {
                Ok(()) => info!(source = backend.source(), "finished energy reading"),
                Err(e) => warn!(
                    source = backend.source(),
                    error = %e,
                    "error finishing energy reading"
                ),
            }
        }
    }

    /// Source names of the active backends.
    pub fn sources(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.source().to_string()).collect()
    }

    /// Number of active backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backends are active.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// A backend whose readings come from a closure.
///
/// ```rust
/// use hbtree::energy::{EnergyBackend, FnBackend};
///
/// let mut joules = 0.0;
/// let mut backend = FnBackend::new("counter", move || {
///     joules += 1_000_000.0;
///     joules
/// });
/// assert_eq!(backend.read(), 1_000_000.0);
/// assert_eq!(backend.read(), 2_000_000.0);
/// ```
pub struct FnBackend<F> {
    source: String,
    read: F,
}

impl<F> FnBackend<F>
where
    F: FnMut() -> f64 + Send,
{
    /// Creates a backend named `source` that calls `read` for every sample.
    pub fn new(source: impl Into<String>, read: F) -> Self {
        Self {
            source: source.into(),
            read,
        }
    }
}

impl<F> EnergyBackend for FnBackend<F>
where
    F: FnMut() -> f64 + Send,
{
    fn source(&self) -> &str {
        &self.source
    }

    fn read(&mut self) -> f64 {
        (self.read)()
    }
}

/// Default RAPL package zone exposed by the Linux powercap framework.
pub const DEFAULT_RAPL_ZONE: &str = "/sys/class/powercap/intel-rapl:0";

/// Reads a Linux powercap (RAPL) zone's energy counter, in microjoules.
///
/// The hardware counter wraps at `max_energy_range_uj`; the backend
/// accumulates across wraps so readings stay cumulative.
#[derive(Debug)]
pub struct RaplBackend {
    zone: PathBuf,
    source: String,
    max_range_uj: u64,
    last_raw_uj: Option<u64>,
    wrapped_uj: u64,
}

impl RaplBackend {
    /// Creates a backend for the given powercap zone directory.
    pub fn new<P: Into<PathBuf>>(zone: P) -> Self {
        let zone = zone.into();
        let source = format!("RAPL ({})", zone.display());
        Self {
            zone,
            source,
            max_range_uj: 0,
            last_raw_uj: None,
            wrapped_uj: 0,
        }
    }

    fn read_counter(&self, file: &str) -> io::Result<u64> {
        let raw = std::fs::read_to_string(self.zone.join(file))?;
        raw.trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{file}: {e}")))
    }
}

impl Default for RaplBackend {
    fn default() -> Self {
        Self::new(DEFAULT_RAPL_ZONE)
    }
}

impl EnergyBackend for RaplBackend {
    fn source(&self) -> &str {
        &self.source
    }

    #[allow(clippy::cast_precision_loss)] // Microjoule counters are far below 2^53 between wraps
    fn read(&mut self) -> f64 {
        let raw = match self.read_counter("energy_uj") {
            Ok(raw) => raw,
            Err(_) => return -1.0,
        };

        if let Some(last) = self.last_raw_uj
            && raw < last
        {
            self.wrapped_uj += self.max_range_uj;
        }
        self.last_raw_uj = Some(raw);

        (self.wrapped_uj + raw) as f64
    }

    fn init(&mut self) -> io::Result<()> {
        self.max_range_uj = self.read_counter("max_energy_range_uj")?;
        self.last_raw_uj = Some(self.read_counter("energy_uj")?);
        self.wrapped_uj = 0;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.last_raw_uj = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Backend that records lifecycle calls into a shared journal.
    struct Journaled {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
        fail_finish: bool,
        reading: f64,
    }

    impl Journaled {
        fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                fail_init: false,
                fail_finish: false,
                reading: 1.0,
            }
        }

        fn reading(mut self, reading: f64) -> Self {
            self.reading = reading;
            self
        }

        fn failing_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        fn failing_finish(mut self) -> Self {
            self.fail_finish = true;
            self
        }

        fn boxed(self) -> Box<dyn EnergyBackend> {
            Box::new(self)
        }
    }

    impl EnergyBackend for Journaled {
        fn source(&self) -> &str {
            &self.name
        }

        fn read(&mut self) -> f64 {
            self.reading
        }

        fn init(&mut self) -> io::Result<()> {
            self.journal.lock().push(format!("init {}", self.name));
            if self.fail_init {
                return Err(io::Error::other("no such device"));
            }
            Ok(())
        }

        fn finish(&mut self) -> io::Result<()> {
            self.journal.lock().push(format!("finish {}", self.name));
            if self.fail_finish {
                return Err(io::Error::other("busy"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_empty_set_reads_zero() {
        let mut set = EnergyBackendSet::init(Vec::new()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.read_total(), 0.0);
    }

    #[test]
    fn test_readings_are_summed() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let a = Journaled::new("a", &journal).reading(2.5).boxed();
        let b = Journaled::new("b", &journal).reading(4.0).boxed();

        let mut set = EnergyBackendSet::init(vec![a, b]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.sources(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(set.read_total(), 6.5);
    }

    #[test]
    fn test_non_finite_reading_is_excluded() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let infinite = Journaled::new("inf", &journal).reading(f64::INFINITY).boxed();
        let nan = Journaled::new("nan", &journal).reading(f64::NAN).boxed();
        let good = Journaled::new("good", &journal).reading(2.5).boxed();

        let mut set = EnergyBackendSet::init(vec![infinite, nan, good]).unwrap();
        assert_eq!(set.read_total(), 2.5);
    }

    #[test]
    fn test_negative_reading_is_excluded() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let bad = Journaled::new("bad", &journal).reading(-1.0).boxed();
        let good = Journaled::new("good", &journal).reading(3.0).boxed();

        let mut set = EnergyBackendSet::init(vec![bad, good]).unwrap();
        assert_eq!(set.read_total(), 3.0);
        // Still excluded on the next sample, and no retry happened in between.
        assert_eq!(set.read_total(), 3.0);
    }

    #[test]
    fn test_init_failure_finishes_started_backends() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let a = Journaled::new("a", &journal).boxed();
        let b = Journaled::new("b", &journal).boxed();
        let c = Journaled::new("c", &journal).failing_init().boxed();
        let d = Journaled::new("d", &journal).boxed();

        let result = EnergyBackendSet::init(vec![a, b, c, d]);
        match result.unwrap_err() {
            ConstructionError::BackendInit {
                index, source_name, ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(source_name, "c");
            }
            other => panic!("Expected BackendInit error, got: {:?}", other),
        }

        assert_eq!(
            *journal.lock(),
            vec!["init a", "init b", "init c", "finish a", "finish b"]
        );
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let a = Journaled::new("a", &journal).boxed();
        let unnamed = Journaled::new("", &journal).boxed();

        let result = EnergyBackendSet::init(vec![a, unnamed]);
        assert!(matches!(
            result,
            Err(ConstructionError::MissingSource { index: 1 })
        ));
        assert_eq!(*journal.lock(), vec!["init a", "finish a"]);
    }

    #[test]
    fn test_finish_is_best_effort_and_idempotent() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let a = Journaled::new("a", &journal).failing_finish().boxed();
        let b = Journaled::new("b", &journal).boxed();

        let mut set = EnergyBackendSet::init(vec![a, b]).unwrap();
        set.finish();
        set.finish();

        assert!(set.is_empty());
        assert_eq!(
            *journal.lock(),
            vec!["init a", "init b", "finish a", "finish b"]
        );
    }

    #[test]
    fn test_fn_backend() {
        let mut count = 0.0;
        let mut backend = FnBackend::new("counter", move || {
            count += 10.0;
            count
        });
        assert_eq!(backend.source(), "counter");
        assert_eq!(backend.read(), 10.0);
        assert_eq!(backend.read(), 20.0);
    }

    #[test]
    fn test_rapl_backend_reads_and_unwraps_counter() {
        let temp_dir = tempdir().unwrap();
        let zone = temp_dir.path();
        std::fs::write(zone.join("max_energy_range_uj"), "1000\n").unwrap();
        std::fs::write(zone.join("energy_uj"), "900\n").unwrap();

        let mut backend = RaplBackend::new(zone);
        backend.init().unwrap();
        assert_eq!(backend.read(), 900.0);

        std::fs::write(zone.join("energy_uj"), "950\n").unwrap();
        assert_eq!(backend.read(), 950.0);

        // Counter wrapped past max_energy_range_uj.
        std::fs::write(zone.join("energy_uj"), "50\n").unwrap();
        assert_eq!(backend.read(), 1050.0);

        backend.finish().unwrap();
    }

    #[test]
    fn test_rapl_backend_missing_zone() {
        let temp_dir = tempdir().unwrap();
        let mut backend = RaplBackend::new(temp_dir.path().join("nope"));
        assert!(backend.init().is_err());
        assert!(backend.read() < 0.0);
    }
}
