//! # Flow Pipeline
//!
//! Turns a pulse-output flow sensor into live volume and rate statistics.
//!
//! ## Architecture
//!
//! ```text
//! RegisterBus ──► Ads1115 ──► Sampler ──► EdgeDetector ──► FlowAggregator
//!                                                              │
//!                                                        SnapshotSink
//!                                                       ┌──────┴──────┐
//!                                              BroadcastHub     persistence_task
//!                                                   │                 │
//!                                              live feed       SqliteIntervalWriter
//! ```
//!
//! Every stage is its own tokio task connected by bounded queues. The
//! aggregator is the only owner of the running totals; readers get
//! immutable `FlowSnapshot` values once per tick.
//!
//! ## Modules
//!
//! - `ads1115` - converter register driver
//! - `simulated` - emulated converter and sensor for running without hardware
//! - `sampler` - fixed-cadence polling into `Sample`s
//! - `edge` - hysteresis edge detection into `PulseEvent`s
//! - `window` - bounded trailing-window counters
//! - `aggregator` - totals, rates, maxima and interval records
//! - `sink`, `broadcast` - snapshot fan-out
//! - `persistence`, `db` - interval storage
//! - `feed` - JSON Lines snapshot feed
//! - `runtime` - task wiring and shutdown

pub mod ads1115;
pub mod aggregator;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod db;
pub mod edge;
pub mod feed;
pub mod persistence;
pub mod runtime;
pub mod sampler;
pub mod shutdown;
pub mod simulated;
pub mod sink;
pub mod types;
pub mod window;

pub use aggregator::{AggregatorSummary, FlowAggregator, IntervalTracker, RateState};
pub use broadcast::{BroadcastHub, SnapshotPublisher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PipelineConfig};
pub use db::{IntervalWriter, PersistError, SqliteIntervalWriter};
pub use edge::{Band, EdgeDetector};
pub use runtime::{FlowPipeline, PipelineError, PipelineReport};
pub use sampler::{AnalogSource, Sampler, ScriptedSource};
pub use types::{FlowSnapshot, IntervalRecord, PulseEvent, Sample};
