//! Session result records.
//!
//! A `SessionResult` is assembled once at the end of a successful session
//! and never mutated afterwards. Its serde form is the persisted JSON
//! layout: readings and timestamps are stored as two parallel arrays under
//! `data`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DeviceProfile;
use crate::sampling::ResolvedParameters;
use crate::stats::SummaryStatistics;

/// One reading and the time it was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Epoch seconds, taken immediately before the transport call
    pub timestamp: f64,

    /// Reading in amperes
    pub value: f64,
}

/// Ordered readings of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SampleColumns", into = "SampleColumns")]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

/// Column layout used on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SampleColumns {
    measurements: Vec<f64>,
    timestamps_epoch: Vec<f64>,
}

impl From<SampleSeries> for SampleColumns {
    fn from(series: SampleSeries) -> Self {
        Self {
            measurements: series.values(),
            timestamps_epoch: series.timestamps(),
        }
    }
}

impl TryFrom<SampleColumns> for SampleSeries {
    type Error = String;

    fn try_from(columns: SampleColumns) -> Result<Self, Self::Error> {
        if columns.measurements.len() != columns.timestamps_epoch.len() {
            return Err(format!(
                "{} measurements but {} timestamps",
                columns.measurements.len(),
                columns.timestamps_epoch.len()
            ));
        }

        let samples = columns
            .timestamps_epoch
            .into_iter()
            .zip(columns.measurements)
            .map(|(timestamp, value)| Sample { timestamp, value })
            .collect();

        Ok(Self { samples })
    }
}

impl SampleSeries {
    /// Create an empty series with room for `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Get the number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the series is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Readings in acquisition order.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Timestamps in acquisition order.
    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }
}

/// Device identity as recorded in a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub host: String,
    pub port: u16,

    /// Command as text; undecodable bytes become U+FFFD
    pub command: String,
}

impl From<&DeviceProfile> for DeviceRecord {
    fn from(profile: &DeviceProfile) -> Self {
        Self {
            host: profile.endpoint.host.clone(),
            port: profile.endpoint.port,
            command: String::from_utf8_lossy(&profile.command).into_owned(),
        }
    }
}

/// Terminal artifact of one sampling session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Unique identifier of this run
    pub run_id: Uuid,

    /// Wall-clock start of the session, epoch seconds
    pub started_at_epoch: f64,

    /// Name of the device profile sampled
    pub ammeter_type: String,

    pub ammeter: DeviceRecord,

    /// Parameters after override/default resolution
    pub sampling: ResolvedParameters,

    pub data: SampleSeries,

    pub stats: SummaryStatistics,
}
