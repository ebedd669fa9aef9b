//! Summary statistics over a session's readings.

use serde::{Deserialize, Serialize};

/// Summary of one session's readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub mean: f64,
    pub median: f64,

    /// Population standard deviation (divides by `n`)
    #[serde(rename = "std")]
    pub population_std_dev: f64,

    pub min: f64,
    pub max: f64,
}

/// Errors from computing statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    /// No readings were collected
    EmptyResultSet,
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::EmptyResultSet => write!(f, "No measurements collected"),
        }
    }
}

impl std::error::Error for StatsError {}

impl SummaryStatistics {
    /// Compute statistics over `values`.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::EmptyResultSet` when `values` is empty.
    pub fn from_values(values: &[f64]) -> Result<Self, StatsError> {
        if values.is_empty() {
            return Err(StatsError::EmptyResultSet);
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Ok(Self {
            mean,
            median,
            population_std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}
