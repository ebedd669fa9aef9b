//! Configuration module for the ammeter harness.
//!
//! This module loads the YAML document that binds each ammeter profile to a
//! network endpoint and request command, plus the global sampling defaults
//! used when a session does not override them.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default location of the harness configuration document
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Environment variable overriding the configuration document path
pub const CONFIG_PATH_ENV: &str = "AMMETER_HARNESS_CONFIG";

/// Host used when a profile does not name one
const DEFAULT_HOST: &str = "localhost";

/// Network address of one ammeter device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the local host.
    pub fn localhost(port: u16) -> Self {
        Self::new(DEFAULT_HOST, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One ammeter kind: where it listens and what to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Profile name as it appears under `ammeters`
    pub name: String,

    /// Device endpoint
    pub endpoint: Endpoint,

    /// Opaque request payload sent on each connection
    pub command: Vec<u8>,
}

/// Global sampling defaults from `testing.sampling`.
///
/// Every field is optional; a session override always takes precedence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SamplingDefaults {
    #[serde(default)]
    pub measurements_count: Option<i64>,

    #[serde(default)]
    pub total_duration_seconds: Option<f64>,

    #[serde(default)]
    pub sampling_frequency_hz: Option<f64>,
}

/// Raw `ammeters.<name>` entry.
#[derive(Debug, Clone, Deserialize)]
struct AmmeterEntry {
    #[serde(default)]
    host: Option<String>,
    port: u16,
    command: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TestingSection {
    #[serde(default)]
    sampling: Option<SamplingDefaults>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    ammeters: BTreeMap<String, AmmeterEntry>,

    #[serde(default)]
    testing: Option<TestingSection>,
}

/// Resolved harness configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Device profiles keyed by name
    profiles: BTreeMap<String, DeviceProfile>,

    /// Global sampling defaults
    pub sampling: SamplingDefaults,
}

/// Error type for configuration loading and profile lookup failures
#[derive(Debug)]
pub enum ConfigError {
    /// The document could not be read
    Read { path: PathBuf, source: std::io::Error },

    /// The document is not valid YAML or does not match the expected shape
    Parse(serde_yaml::Error),

    /// A profile entry failed validation
    InvalidProfile { name: String, message: String },

    /// The requested profile name is not configured
    UnknownProfile { name: String, available: Vec<String> },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::InvalidProfile { name, message } => {
                write!(f, "Invalid ammeter profile '{}': {}", name, message)
            }
            ConfigError::UnknownProfile { name, available } => write!(
                f,
                "Unknown ammeter type '{}'. Available: {}",
                name,
                available.join(", ")
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl Config {
    /// Load configuration from the path named by `AMMETER_HARNESS_CONFIG`,
    /// falling back to `config/config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document cannot be read or parsed, or if
    /// any profile fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ammeter_harness::config::Config;
    ///
    /// let config = Config::from_file("config/config.yaml").expect("Failed to load config");
    /// println!("Profiles: {:?}", config.profile_names());
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;

        let mut profiles = BTreeMap::new();
        for (name, entry) in raw.ammeters {
            let profile = Self::build_profile(name.clone(), entry)?;
            profiles.insert(name, profile);
        }

        let sampling = raw
            .testing
            .and_then(|t| t.sampling)
            .unwrap_or_default();

        Ok(Self { profiles, sampling })
    }

    /// Build a config directly from profiles and defaults.
    pub fn new(profiles: impl IntoIterator<Item = DeviceProfile>, sampling: SamplingDefaults) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            sampling,
        }
    }

    /// Validate one raw entry and turn it into a profile.
    fn build_profile(name: String, entry: AmmeterEntry) -> Result<DeviceProfile, ConfigError> {
        if entry.port == 0 {
            return Err(ConfigError::InvalidProfile {
                name,
                message: "port must be greater than 0".to_string(),
            });
        }

        if entry.command.trim().is_empty() {
            return Err(ConfigError::InvalidProfile {
                name,
                message: "command must not be empty".to_string(),
            });
        }

        let host = entry
            .host
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        Ok(DeviceProfile {
            name,
            endpoint: Endpoint::new(host, entry.port),
            command: entry.command.into_bytes(),
        })
    }

    /// Look up a profile by name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownProfile` listing the configured names
    /// (sorted) when `name` is absent.
    pub fn profile(&self, name: &str) -> Result<&DeviceProfile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.profile_names(),
            })
    }

    /// Names of all configured profiles, sorted.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
ammeters:
  greenlee:
    port: 5000
    command: "MEASURE_GREENLEE -get_measurement"
  entes:
    host: "127.0.0.1"
    port: 5001
    command: "MEASURE_ENTES -get_data"
testing:
  sampling:
    measurements_count: null
    total_duration_seconds: 3.0
    sampling_frequency_hz: 10.0
"#;

    #[test]
    fn test_parse_profiles_and_defaults() {
        let config = Config::from_yaml_str(SAMPLE_YAML).expect("Should parse");

        assert_eq!(config.profile_names(), vec!["entes", "greenlee"]);

        let greenlee = config.profile("greenlee").unwrap();
        assert_eq!(greenlee.endpoint, Endpoint::localhost(5000));
        assert_eq!(greenlee.command, b"MEASURE_GREENLEE -get_measurement".to_vec());

        let entes = config.profile("entes").unwrap();
        assert_eq!(entes.endpoint.host, "127.0.0.1");
        assert_eq!(entes.endpoint.port, 5001);

        assert_eq!(config.sampling.measurements_count, None);
        assert_eq!(config.sampling.total_duration_seconds, Some(3.0));
        assert_eq!(config.sampling.sampling_frequency_hz, Some(10.0));
    }

    #[test]
    fn test_missing_testing_section_yields_empty_defaults() {
        let yaml = "ammeters:\n  greenlee: { port: 5000, command: \"X\" }\n";
        let config = Config::from_yaml_str(yaml).expect("Should parse");
        assert_eq!(config.sampling, SamplingDefaults::default());
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let config = Config::from_yaml_str(SAMPLE_YAML).unwrap();
        let err = config.profile("fluke").unwrap_err();

        match &err {
            ConfigError::UnknownProfile { name, available } => {
                assert_eq!(name, "fluke");
                assert_eq!(available, &vec!["entes".to_string(), "greenlee".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            format!("{}", err),
            "Unknown ammeter type 'fluke'. Available: entes, greenlee"
        );
    }

    #[test]
    fn test_zero_port_rejected() {
        let yaml = "ammeters:\n  bad: { port: 0, command: \"X\" }\n";
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{}", err).contains("port must be greater than 0"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = "ammeters:\n  bad: { port: 5000, command: \"  \" }\n";
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{}", err).contains("command must not be empty"));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = Config::from_yaml_str("ammeters: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/definitely/not/here/config.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE_YAML).unwrap();

        let config = Config::from_file(&path).expect("Should load from file");
        assert_eq!(config.profile_names().len(), 2);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(format!("{}", Endpoint::localhost(5002)), "localhost:5002");
    }
}
