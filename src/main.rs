//! Ammeter Harness - sampling campaign runner
//!
//! Runs one sampling session per configured ammeter profile, each on its own
//! blocking context, persists every result and logs a summary.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `AMMETER_HARNESS_CONFIG`: Path to the YAML profile document (default: config/config.yaml)
//! - `AMMETER_HARNESS_RESULTS_DIR`: Output directory for result documents (default: results)
//! - `AMMETER_HARNESS_EMULATORS`: Start the built-in device emulators (default: true)
//! - `AMMETER_HARNESS_COUNT`: Override `measurements_count`
//! - `AMMETER_HARNESS_DURATION_SECS`: Override `total_duration_seconds`
//! - `AMMETER_HARNESS_FREQUENCY_HZ`: Override `sampling_frequency_hz`
//! - `RUST_LOG`: Logging level filter (default: info)

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ammeter_harness::config::Config;
use ammeter_harness::emulator;
use ammeter_harness::sampling::{SamplingEngine, SamplingOverrides};
use ammeter_harness::store::{ResultStore, DEFAULT_RESULTS_DIR};
use ammeter_harness::transport::TcpTransport;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting ammeter harness...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                profiles = ?config.profile_names(),
                defaults = ?config.sampling,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let overrides = match overrides_from_env() {
        Ok(overrides) => overrides,
        Err(message) => {
            error!(error = %message, "Invalid sampling override");
            std::process::exit(1);
        }
    };

    let results_dir =
        env::var("AMMETER_HARNESS_RESULTS_DIR").unwrap_or_else(|_| DEFAULT_RESULTS_DIR.to_string());
    let store = match ResultStore::new(&results_dir) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to prepare results directory");
            std::process::exit(1);
        }
    };

    // Emulators keep running on the runtime until the process exits
    let mut emulator_handles = Vec::new();
    if emulators_enabled() {
        match emulator::start_all().await {
            Ok(started) => {
                for (kind, addr, handle) in started {
                    info!(kind = %kind, addr = %addr, "Emulator started");
                    emulator_handles.push(handle);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to start emulators");
                std::process::exit(1);
            }
        }
    }

    let profiles = config.profile_names();
    let engine = Arc::new(SamplingEngine::new(config, store));

    // One blocking context per device; sessions share nothing mutable
    let mut sessions = Vec::with_capacity(profiles.len());
    for name in profiles {
        let engine = engine.clone();
        let task_name = name.clone();
        let handle = tokio::task::spawn_blocking(move || {
            engine.run_session(&task_name, &TcpTransport::new(), &overrides, true)
        });
        sessions.push((name, handle));
    }

    let mut failures = 0usize;
    for (name, handle) in sessions {
        match handle.await {
            Ok(Ok(result)) => {
                info!(
                    profile = %name,
                    run_id = %result.run_id,
                    samples = result.data.len(),
                    mean = format!("{:.4}", result.stats.mean),
                    median = format!("{:.4}", result.stats.median),
                    std = format!("{:.4}", result.stats.population_std_dev),
                    min = format!("{:.4}", result.stats.min),
                    max = format!("{:.4}", result.stats.max),
                    path = %engine.store().path_for(&result.run_id).display(),
                    "Session finished"
                );
            }
            Ok(Err(e)) => {
                failures += 1;
                error!(profile = %name, error = %e, "Session failed");
            }
            Err(e) => {
                failures += 1;
                warn!(profile = %name, error = %e, "Session task panicked");
            }
        }
    }

    for handle in emulator_handles {
        handle.abort();
    }

    if failures > 0 {
        error!(failures, "Campaign finished with failures");
        std::process::exit(1);
    }

    info!("Campaign complete");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn emulators_enabled() -> bool {
    env::var("AMMETER_HARNESS_EMULATORS")
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true)
}

/// Read the optional sampling overrides from the environment.
fn overrides_from_env() -> Result<SamplingOverrides, String> {
    Ok(SamplingOverrides {
        measurements_count: parse_env("AMMETER_HARNESS_COUNT")?,
        total_duration_seconds: parse_env("AMMETER_HARNESS_DURATION_SECS")?,
        sampling_frequency_hz: parse_env("AMMETER_HARNESS_FREQUENCY_HZ")?,
    })
}

fn parse_env<T: FromStr>(env_var: &str) -> Result<Option<T>, String> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{}: '{}' is not a valid number", env_var, value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_missing_is_none() {
        let value: Option<f64> = parse_env("AMMETER_HARNESS_TEST_UNSET_VAR").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_parse_env_invalid() {
        env::set_var("AMMETER_HARNESS_TEST_BAD_NUMBER", "fast");
        let result: Result<Option<f64>, String> = parse_env("AMMETER_HARNESS_TEST_BAD_NUMBER");
        env::remove_var("AMMETER_HARNESS_TEST_BAD_NUMBER");

        assert!(result.unwrap_err().contains("not a valid number"));
    }

    #[test]
    fn test_parse_env_value() {
        env::set_var("AMMETER_HARNESS_TEST_GOOD_NUMBER", " 2.5 ");
        let result: Option<f64> = parse_env("AMMETER_HARNESS_TEST_GOOD_NUMBER").unwrap();
        env::remove_var("AMMETER_HARNESS_TEST_GOOD_NUMBER");

        assert_eq!(result, Some(2.5));
    }
}
