//! Sampling session engine.
//!
//! Turns the blocking "take one reading" transport primitive into a
//! time-disciplined acquisition session:
//!
//! 1. resolve each sampling parameter as `override ?? config default ?? absent`
//! 2. validate the resolved values into a [`SamplingPlan`] before any I/O
//! 3. run the plan's acquisition loop, one transport call at a time
//! 4. summarise the readings and assemble a [`SessionResult`]
//! 5. optionally persist it through the [`ResultStore`]
//!
//! ## Cadence
//!
//! Rate/duration mode is best-effort. Each iteration records its own start,
//! takes one reading, then sleeps for whatever is left of the period. There
//! is no drift compensation across iterations, so the sample count is
//! approximately `duration * frequency` and depends on transport latency
//! and timer granularity. A slow transport call can push the session past
//! its nominal duration.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError, DeviceProfile, SamplingDefaults};
use crate::result::{DeviceRecord, Sample, SampleSeries, SessionResult};
use crate::stats::{StatsError, SummaryStatistics};
use crate::store::{ResultStore, StoreError};
use crate::transport::{MeasurementTransport, TransportError};

/// Upper bound on the up-front sample buffer in count mode.
const MAX_PREALLOCATED_SAMPLES: u64 = 1024;

/// Errors that can end a sampling session.
#[derive(Debug)]
pub enum SessionError {
    /// The requested profile name is not configured
    UnknownProfile { name: String, available: Vec<String> },

    /// Neither a count nor both duration and frequency were given
    MissingParameters,

    /// A resolved parameter is out of range
    InvalidParameter { name: &'static str, value: String },

    /// Configuration could not be used
    Config(ConfigError),

    /// The transport failed; partial readings are discarded
    Transport(TransportError),

    /// No readings were collected
    EmptyResultSet,

    /// The result could not be written
    PersistenceFailure(StoreError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::UnknownProfile { name, available } => write!(
                f,
                "Unknown ammeter type '{}'. Available: {}",
                name,
                available.join(", ")
            ),
            SessionError::MissingParameters => write!(
                f,
                "Provide measurements_count OR (total_duration_seconds + sampling_frequency_hz)"
            ),
            SessionError::InvalidParameter { name, value } => {
                write!(f, "{} must be > 0 (got {})", name, value)
            }
            SessionError::Config(e) => write!(f, "{}", e),
            SessionError::Transport(e) => write!(f, "Measurement failed: {}", e),
            SessionError::EmptyResultSet => write!(f, "No measurements collected"),
            SessionError::PersistenceFailure(e) => write!(f, "Failed to persist result: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Config(e) => Some(e),
            SessionError::Transport(e) => Some(e),
            SessionError::PersistenceFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { name, available } => {
                SessionError::UnknownProfile { name, available }
            }
            other => SessionError::Config(other),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

impl From<StatsError> for SessionError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::EmptyResultSet => SessionError::EmptyResultSet,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::PersistenceFailure(err)
    }
}

/// Per-call overrides for the sampling parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingOverrides {
    pub measurements_count: Option<i64>,
    pub total_duration_seconds: Option<f64>,
    pub sampling_frequency_hz: Option<f64>,
}

impl SamplingOverrides {
    /// Override with a fixed number of readings.
    pub fn count(measurements_count: i64) -> Self {
        Self {
            measurements_count: Some(measurements_count),
            ..Self::default()
        }
    }

    /// Override with a duration and target frequency.
    pub fn rate(total_duration_seconds: f64, sampling_frequency_hz: f64) -> Self {
        Self {
            measurements_count: None,
            total_duration_seconds: Some(total_duration_seconds),
            sampling_frequency_hz: Some(sampling_frequency_hz),
        }
    }
}

/// Sampling parameters after override/default resolution, before validation.
///
/// This is also the `sampling` block of a persisted result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameters {
    pub measurements_count: Option<i64>,
    pub total_duration_seconds: Option<f64>,
    pub sampling_frequency_hz: Option<f64>,
}

impl ResolvedParameters {
    /// Pick each parameter from `overrides`, falling back to `defaults`.
    pub fn resolve(overrides: &SamplingOverrides, defaults: &SamplingDefaults) -> Self {
        Self {
            measurements_count: overrides.measurements_count.or(defaults.measurements_count),
            total_duration_seconds: overrides
                .total_duration_seconds
                .or(defaults.total_duration_seconds),
            sampling_frequency_hz: overrides
                .sampling_frequency_hz
                .or(defaults.sampling_frequency_hz),
        }
    }

    /// Validate into a plan.
    ///
    /// A present count wins and duration/frequency are ignored. Otherwise
    /// both duration and frequency are required.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidParameter` for a count `<= 0`, or a duration
    ///   or frequency that is not a finite positive number
    /// - `SessionError::MissingParameters` when no mode is fully specified
    ///
    /// Durations and periods too large for a `Duration` saturate at
    /// `Duration::MAX` rather than failing.
    pub fn validate(&self) -> Result<SamplingPlan, SessionError> {
        if let Some(count) = self.measurements_count {
            if count <= 0 {
                return Err(SessionError::InvalidParameter {
                    name: "measurements_count",
                    value: count.to_string(),
                });
            }
            return Ok(SamplingPlan::ByCount {
                count: count as u64,
            });
        }

        let (duration_secs, frequency_hz) =
            match (self.total_duration_seconds, self.sampling_frequency_hz) {
                (Some(d), Some(f)) => (d, f),
                _ => return Err(SessionError::MissingParameters),
            };

        let duration = positive_seconds("total_duration_seconds", duration_secs)?;
        positive_seconds("sampling_frequency_hz", frequency_hz)?;

        Ok(SamplingPlan::ByRateAndDuration {
            duration,
            frequency_hz,
        })
    }
}

/// Check that `value` is finite and positive; oversized values saturate.
fn positive_seconds(name: &'static str, value: f64) -> Result<Duration, SessionError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SessionError::InvalidParameter {
            name,
            value: value.to_string(),
        });
    }
    Ok(Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX))
}

/// Validated acquisition strategy for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingPlan {
    /// Take exactly `count` readings back to back
    ByCount { count: u64 },

    /// Sample at roughly `frequency_hz` until `duration` has elapsed
    ByRateAndDuration { duration: Duration, frequency_hz: f64 },
}

impl SamplingPlan {
    /// Target interval between readings; zero in count mode.
    pub fn period(&self) -> Duration {
        match self {
            SamplingPlan::ByCount { .. } => Duration::ZERO,
            SamplingPlan::ByRateAndDuration { frequency_hz, .. } => {
                Duration::try_from_secs_f64(1.0 / frequency_hz).unwrap_or(Duration::MAX)
            }
        }
    }

    /// Rough number of readings the plan will produce.
    pub fn expected_samples(&self) -> u64 {
        match self {
            SamplingPlan::ByCount { count } => *count,
            SamplingPlan::ByRateAndDuration {
                duration,
                frequency_hz,
            } => (duration.as_secs_f64() * frequency_hz).floor() as u64,
        }
    }
}

impl std::fmt::Display for SamplingPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingPlan::ByCount { count } => write!(f, "{} readings", count),
            SamplingPlan::ByRateAndDuration {
                duration,
                frequency_hz,
            } => write!(f, "{:.3}s at {} Hz", duration.as_secs_f64(), frequency_hz),
        }
    }
}

/// Session time base.
///
/// The wall clock is read once at session start; every later timestamp is
/// that value plus monotonic elapsed time, so timestamps never go backwards.
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    started_at_epoch: f64,
    origin: Instant,
}

impl SessionClock {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at_epoch: now.timestamp_micros() as f64 / 1_000_000.0,
            origin: Instant::now(),
        }
    }

    fn epoch_at(&self, instant: Instant) -> f64 {
        self.started_at_epoch + instant.saturating_duration_since(self.origin).as_secs_f64()
    }
}

/// Drives sampling sessions against configured device profiles.
///
/// The engine holds only immutable configuration and the store handle, so
/// one engine can be shared by sessions running on separate threads. Each
/// session's loop and result belong to the calling thread.
///
/// # Example
///
/// ```no_run
/// use ammeter_harness::config::Config;
/// use ammeter_harness::sampling::{SamplingEngine, SamplingOverrides};
/// use ammeter_harness::store::ResultStore;
/// use ammeter_harness::transport::TcpTransport;
///
/// let config = Config::from_file("config/config.yaml").expect("config");
/// let store = ResultStore::new("results").expect("results dir");
/// let engine = SamplingEngine::new(config, store);
///
/// let result = engine
///     .run_session("greenlee", &TcpTransport::new(), &SamplingOverrides::count(5), true)
///     .expect("session");
/// println!("mean = {}", result.stats.mean);
/// ```
#[derive(Debug, Clone)]
pub struct SamplingEngine {
    config: Config,
    store: ResultStore,
}

impl SamplingEngine {
    /// Create an engine over `config`, persisting into `store`.
    pub fn new(config: Config, store: ResultStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run one sampling session for `profile_name`.
    ///
    /// Parameters are resolved and validated before the transport is
    /// touched. Any transport error aborts the session immediately and the
    /// readings taken so far are dropped. With `persist` set, the result is
    /// written to the store before it is returned and a write failure is
    /// returned as `SessionError::PersistenceFailure`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` for an unknown profile, invalid or missing
    /// parameters, a transport failure, an empty reading set, or a
    /// persistence failure.
    pub fn run_session<T>(
        &self,
        profile_name: &str,
        transport: &T,
        overrides: &SamplingOverrides,
        persist: bool,
    ) -> Result<SessionResult, SessionError>
    where
        T: MeasurementTransport + ?Sized,
    {
        let profile = self.config.profile(profile_name)?;

        let parameters = ResolvedParameters::resolve(overrides, &self.config.sampling);
        let plan = parameters.validate()?;

        let run_id = Uuid::new_v4();
        let clock = SessionClock::start();

        info!(
            run_id = %run_id,
            profile = %profile.name,
            endpoint = %profile.endpoint,
            plan = %plan,
            "Starting sampling session"
        );

        let data = acquire(&plan, profile, transport, &clock).map_err(|e| {
            warn!(run_id = %run_id, profile = %profile.name, error = %e, "Sampling session aborted");
            SessionError::from(e)
        })?;

        if data.is_empty() {
            warn!(run_id = %run_id, profile = %profile.name, "No samples collected");
        }
        let stats = SummaryStatistics::from_values(&data.values())?;

        info!(
            run_id = %run_id,
            profile = %profile.name,
            samples = data.len(),
            expected = plan.expected_samples(),
            mean = stats.mean,
            std = stats.population_std_dev,
            "Sampling session complete"
        );

        let result = SessionResult {
            run_id,
            started_at_epoch: clock.started_at_epoch,
            ammeter_type: profile.name.clone(),
            ammeter: DeviceRecord::from(profile),
            sampling: parameters,
            data,
            stats,
        };

        if persist {
            self.store.save(&result)?;
        }

        Ok(result)
    }
}

/// Run the acquisition loop selected by `plan`.
fn acquire<T>(
    plan: &SamplingPlan,
    profile: &DeviceProfile,
    transport: &T,
    clock: &SessionClock,
) -> Result<SampleSeries, TransportError>
where
    T: MeasurementTransport + ?Sized,
{
    match *plan {
        SamplingPlan::ByCount { count } => sample_by_count(count, profile, transport, clock),
        SamplingPlan::ByRateAndDuration { duration, .. } => {
            sample_by_rate(duration, plan.period(), profile, transport, clock)
        }
    }
}

/// Take one reading, timestamped immediately before the transport call.
fn take_sample<T>(
    profile: &DeviceProfile,
    transport: &T,
    clock: &SessionClock,
) -> Result<Sample, TransportError>
where
    T: MeasurementTransport + ?Sized,
{
    let timestamp = clock.epoch_at(Instant::now());
    let value = transport.measure(&profile.endpoint, &profile.command)?;

    debug!(profile = %profile.name, timestamp, value, "Sample");
    Ok(Sample { timestamp, value })
}

fn sample_by_count<T>(
    count: u64,
    profile: &DeviceProfile,
    transport: &T,
    clock: &SessionClock,
) -> Result<SampleSeries, TransportError>
where
    T: MeasurementTransport + ?Sized,
{
    // Pre-allocate modestly; the count is caller-controlled
    let capacity = usize::try_from(count.min(MAX_PREALLOCATED_SAMPLES)).unwrap_or(0);
    let mut series = SampleSeries::with_capacity(capacity);
    for _ in 0..count {
        series.push(take_sample(profile, transport, clock)?);
    }
    Ok(series)
}

fn sample_by_rate<T>(
    duration: Duration,
    period: Duration,
    profile: &DeviceProfile,
    transport: &T,
    clock: &SessionClock,
) -> Result<SampleSeries, TransportError>
where
    T: MeasurementTransport + ?Sized,
{
    let mut series = SampleSeries::default();
    let loop_start = Instant::now();

    while loop_start.elapsed() < duration {
        let iteration_start = Instant::now();
        series.push(take_sample(profile, transport, clock)?);

        // Sleep only for what is left of this period; no catch-up
        if let Some(remaining) = period.checked_sub(iteration_start.elapsed()) {
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    Ok(series)
}
