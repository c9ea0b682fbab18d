//! # hbtree
//!
//! Heartbeat instrumentation for applications and pipelines.
//!
//! An application registers a *heartbeat* each time it completes a unit of
//! work. hbtree timestamps the heartbeat, samples the configured energy
//! counters and derives throughput (work per second), accuracy per second
//! and power, each over the node's lifetime, over a sliding window of recent
//! heartbeats, and over the latest interval alone.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Constant-time registration: window sums are maintained incrementally
//! - Bounded memory: every node keeps a fixed-size ring of records
//! - Trees of nodes share one clock, one event sequence and one set of
//!   energy backends, so pipeline stages on different threads stay comparable
//! - Records are flushed to a log sink in batches, each exactly once
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hbtree::{FnBackend, HeartbeatBuilder, HeartbeatConfig, LogFormat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Window of 20 heartbeats, 100 records retained, logged as text
//! let config = HeartbeatConfig::new(20, 100)?.with_log("app.log", LogFormat::Text);
//!
//! let mut joules = 0.0;
//! let mut app = HeartbeatBuilder::new(config)
//!     .energy_backend(FnBackend::new("simulated", move || {
//!         joules += 1.5;
//!         joules
//!     }))
//!     .build()?;
//!
//! for frame in 0..1_000 {
//!     // ... do one frame of work ...
//!     app.beat(frame, 1);
//! }
//!
//! println!("window rate: {:.1}/s", app.window_rate());
//! println!("window power: {:.1}", app.window_power());
//! app.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Heartbeat`]: One node; registration, queries and teardown
//! - [`HeartbeatBuilder`]: Builds the root of a tree or a child of a node
//! - [`HeartbeatConfig`]: Window size, ring depth, default accuracy, log
//! - [`Record`]: Immutable snapshot of one heartbeat and its metrics
//! - [`SharedState`]: Clock, event counter and energy backends of a tree
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`node`]: Node construction, registration, queries
//! - [`config`]: Node configuration
//! - [`shared`]: Tree-wide shared state
//! - [`window`]: Delta, totals and baseline types
//! - [`record`]: Heartbeat records and derived metrics
//! - [`ring`]: Fixed-capacity record ring buffer
//! - [`sink`]: Text and JSON-lines record sinks and log readers
//! - [`energy`]: Energy backends
//! - [`clock`]: Clock sources
//! - [`error`]: Error types

pub mod clock;
pub mod config;
pub mod energy;
pub mod error;
pub mod node;
pub mod record;
pub mod ring;
pub mod shared;
pub mod sink;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_ACCURACY, HeartbeatConfig, LogConfig, LogFormat};
pub use energy::{EnergyBackend, FnBackend, RaplBackend};
pub use error::{HbError, Result};
pub use node::{Heartbeat, HeartbeatBuilder};
pub use record::{Rates, Record};
pub use shared::{NodeId, SharedState};
pub use sink::{JsonLinesSink, RecordSink, TextSink, read_log, read_text_log};
pub use window::Baseline;
