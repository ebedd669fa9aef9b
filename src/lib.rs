//! Ammeter Harness Library
//!
//! This library provides components for sampling current readings from
//! ammeter devices exposed as line-oriented TCP services:
//!
//! - **config**: YAML device profiles and sampling defaults
//! - **transport**: Blocking one-shot request/reply measurement transport
//! - **sampling**: Session engine with count and rate/duration modes
//! - **stats**: Summary statistics over collected readings
//! - **result**: Session result records and their persisted layout
//! - **store**: Write-once JSON result store
//! - **emulator**: Simulated ammeter devices for demos and tests
//!
//! # Example
//!
//! ```no_run
//! use ammeter_harness::config::Config;
//! use ammeter_harness::sampling::{SamplingEngine, SamplingOverrides};
//! use ammeter_harness::store::ResultStore;
//! use ammeter_harness::transport::TcpTransport;
//!
//! fn main() {
//!     // Load device profiles and defaults
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Results go to ./results/<run_id>.json
//!     let store = ResultStore::new("results").expect("Failed to open results dir");
//!     let engine = SamplingEngine::new(config, store);
//!
//!     // Sample for 3 seconds at roughly 10 Hz
//!     let result = engine
//!         .run_session(
//!             "greenlee",
//!             &TcpTransport::new(),
//!             &SamplingOverrides::rate(3.0, 10.0),
//!             true,
//!         )
//!         .expect("Session failed");
//!     println!("{} samples, mean {:.3} A", result.data.len(), result.stats.mean);
//! }
//! ```

// Module declarations
pub mod config;
pub mod emulator;
pub mod result;
pub mod sampling;
pub mod stats;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::{Config, ConfigError, DeviceProfile, Endpoint, SamplingDefaults};
pub use emulator::{AmmeterEmulator, EmulatorKind};
pub use result::{DeviceRecord, Sample, SampleSeries, SessionResult};
pub use sampling::{
    ResolvedParameters, SamplingEngine, SamplingOverrides, SamplingPlan, SessionError,
};
pub use stats::{StatsError, SummaryStatistics};
pub use store::{ResultStore, StoreError};
pub use transport::{MeasurementTransport, TcpTransport, TransportError};
