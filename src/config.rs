use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::BulkError;
use crate::grid::{BoundingBox, GridSpec};
use crate::nsrdb::{DEFAULT_ENDPOINT, RequestSettings};
use crate::retry::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy};
use crate::store::DEFAULT_VALIDITY_MARKER;

pub const CONFIG_FILE_NAME: &str = "nsrdb-bulk.json";
pub const DEFAULT_SLEEP_SECONDS: f64 = 0.25;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

pub const ENV_API_KEY: &str = "NREL_API_KEY";
pub const ENV_EMAIL: &str = "NSRDB_EMAIL";
pub const ENV_FULL_NAME: &str = "NSRDB_FULL_NAME";
pub const ENV_AFFILIATION: &str = "NSRDB_AFFILIATION";
pub const ENV_REASON: &str = "NSRDB_REASON";

const REQUIRED_ENV: [&str; 5] = [
    ENV_API_KEY,
    ENV_EMAIL,
    ENV_FULL_NAME,
    ENV_AFFILIATION,
    ENV_REASON,
];

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub out_dir: String,
    pub years: Vec<i32>,
    pub bbox: BoundingBox,
    pub grid_deg: GridStep,
    pub attributes: Vec<String>,
    pub interval: u32,
    #[serde(default)]
    pub utc: bool,
    #[serde(default)]
    pub leap_day: bool,
    #[serde(default)]
    pub sleep_between_calls_seconds: Option<f64>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub validity_marker: Option<String>,
    #[serde(default)]
    pub retry_client_errors: Option<bool>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct GridStep {
    pub dlat: f64,
    pub dlon: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_delay_seconds: Option<f64>,
    #[serde(default)]
    pub max_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub out_dir: Utf8PathBuf,
    pub grid: GridSpec,
    pub request: RequestSettings,
    pub pacing: Duration,
    pub retry: RetryPolicy,
    pub endpoint: String,
    pub timeout: Duration,
    pub validity_marker: String,
    pub retry_client_errors: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BulkError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => {
                let candidates = config_candidates();
                candidates
                    .iter()
                    .find(|candidate| candidate.exists())
                    .cloned()
                    .ok_or_else(|| {
                        BulkError::MissingConfig(
                            candidates
                                .iter()
                                .map(|p| p.display().to_string())
                                .collect::<Vec<_>>()
                                .join(", "),
                        )
                    })?
            }
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BulkError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BulkError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BulkError> {
        let grid = GridSpec::new(
            config.bbox,
            config.grid_deg.dlat,
            config.grid_deg.dlon,
            config.years,
        )?;

        if config.attributes.is_empty() {
            return Err(BulkError::ConfigParse(
                "attributes must list at least one attribute".to_string(),
            ));
        }

        let pacing = seconds(
            "sleep_between_calls_seconds",
            config
                .sleep_between_calls_seconds
                .unwrap_or(DEFAULT_SLEEP_SECONDS),
        )?;

        let retry_entry = config.retry.unwrap_or_default();
        let initial_delay = match retry_entry.initial_delay_seconds {
            Some(value) => seconds("retry.initial_delay_seconds", value)?,
            None => DEFAULT_INITIAL_DELAY,
        };
        let max_delay = match retry_entry.max_delay_seconds {
            Some(value) => seconds("retry.max_delay_seconds", value)?,
            None => DEFAULT_MAX_DELAY,
        };
        let retry = RetryPolicy::new(
            retry_entry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            initial_delay,
            max_delay,
        );

        Ok(ResolvedConfig {
            out_dir: Utf8PathBuf::from(config.out_dir),
            grid,
            request: RequestSettings {
                attributes: config.attributes,
                interval: config.interval,
                utc: config.utc,
                leap_day: config.leap_day,
                mailing_list: false,
            },
            pacing,
            retry,
            endpoint: config
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout: Duration::from_secs(config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)),
            validity_marker: config
                .validity_marker
                .unwrap_or_else(|| DEFAULT_VALIDITY_MARKER.to_string()),
            retry_client_errors: config.retry_client_errors.unwrap_or(true),
        })
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, BulkError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| BulkError::ConfigParse(format!("{field} must be a non-negative number")))
}

fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(dirs) = ProjectDirs::from("", "", "nsrdb-bulk") {
        candidates.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    candidates
}

/// Requester identity and API key sent with every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub email: String,
    pub full_name: String,
    pub affiliation: String,
    pub reason: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("affiliation", &self.affiliation)
            .field("reason", &self.reason)
            .finish()
    }
}

impl Credentials {
    /// Reads credentials from the process environment after loading `.env`, if any.
    pub fn from_env() -> Result<Self, BulkError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, BulkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let values: Vec<(&str, Option<String>)> = REQUIRED_ENV
            .iter()
            .map(|name| {
                let value = lookup(name)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty());
                (*name, value)
            })
            .collect();

        let missing: Vec<String> = values
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BulkError::MissingCredentials(missing));
        }

        let take = |name: &str| {
            values
                .iter()
                .find(|(key, _)| *key == name)
                .and_then(|(_, value)| value.clone())
                .unwrap_or_default()
        };

        Ok(Self {
            api_key: take(ENV_API_KEY),
            email: take(ENV_EMAIL),
            full_name: take(ENV_FULL_NAME),
            affiliation: take(ENV_AFFILIATION),
            reason: take(ENV_REASON),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn sample() -> Config {
        serde_json::from_str(
            r#"{
                "out_dir": "data/nsrdb",
                "years": [2019, 2020],
                "bbox": {"lat_min": 8.0, "lat_max": 9.0, "lon_min": 102.0, "lon_max": 103.0},
                "grid_deg": {"dlat": 0.5, "dlon": 0.5},
                "attributes": ["ghi", "dni", "dhi"],
                "interval": 60
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let resolved = ConfigLoader::resolve_config(sample()).unwrap();
        assert_eq!(resolved.pacing, Duration::from_millis(250));
        assert_eq!(resolved.timeout, Duration::from_secs(120));
        assert_eq!(resolved.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(resolved.validity_marker, "GHI");
        assert!(resolved.retry_client_errors);
        assert_eq!(resolved.retry.max_attempts(), 6);
        assert_eq!(resolved.grid.planned_items(), 18);
        assert!(!resolved.request.utc);
    }

    #[test]
    fn negative_sleep_is_rejected() {
        let mut config = sample();
        config.sleep_between_calls_seconds = Some(-1.0);
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, BulkError::ConfigParse(_));
    }

    #[test]
    fn credentials_report_every_missing_name() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_API_KEY, "key"), (ENV_EMAIL, "   ")]);
        let err = Credentials::from_lookup(|name| env.get(name).map(|v| v.to_string()))
            .unwrap_err();
        assert_matches!(err, BulkError::MissingCredentials(missing) => {
            assert_eq!(missing, vec![ENV_EMAIL, ENV_FULL_NAME, ENV_AFFILIATION, ENV_REASON]);
        });
    }

    #[test]
    fn credentials_debug_hides_key() {
        let creds = Credentials::from_lookup(|name| Some(format!("{name}-value"))).unwrap();
        assert_eq!(creds.api_key, "NREL_API_KEY-value");
        let printed = format!("{creds:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("NREL_API_KEY-value"));
        assert!(printed.contains("NSRDB_EMAIL-value"));
    }
}
