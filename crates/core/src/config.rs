use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::RefreshPolicy;
use crate::fallback::FallbackConfig;
use crate::fees::FeeDataSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub fallback: FallbackSettings,
    pub fees: FeesConfig,
    pub recommendations: RecommendationsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Reference-data endpoint. Without `base_url` the fee manager runs on
/// local data only.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// JSON file backing the durable medium; in-memory when unset.
    pub medium_path: Option<PathBuf>,
    pub refresh_threshold: f64,
    pub max_concurrent_refreshes: usize,
    pub refresh_interval_secs: u64,
    pub quota_bytes: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct FallbackSettings {
    pub max_data_age_days: i64,
    pub enable_degradation: bool,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct FeesConfig {
    pub freshness_threshold_days: i64,
    pub start_offline: bool,
}

#[derive(Clone, Debug)]
pub struct RecommendationsConfig {
    pub default_limit: usize,
    pub partner_banks: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub remote_base_url: Option<String>,
    pub cache_medium_path: Option<PathBuf>,
    pub start_offline: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://fincalc.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            remote: RemoteConfig { base_url: None, api_key: None, timeout_secs: 10 },
            cache: CacheConfig {
                medium_path: None,
                refresh_threshold: 0.8,
                max_concurrent_refreshes: 3,
                refresh_interval_secs: 30,
                quota_bytes: None,
            },
            fallback: FallbackSettings {
                max_data_age_days: 7,
                enable_degradation: true,
                history_limit: 100,
            },
            fees: FeesConfig { freshness_threshold_days: 30, start_offline: false },
            recommendations: RecommendationsConfig { default_limit: 5, partner_banks: Vec::new() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("fincalc.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            threshold: self.cache.refresh_threshold,
            max_concurrent: self.cache.max_concurrent_refreshes,
            interval: StdDuration::from_secs(self.cache.refresh_interval_secs),
        }
    }

    pub fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            max_data_age: Duration::days(self.fallback.max_data_age_days),
            enable_degradation: self.fallback.enable_degradation,
            history_limit: self.fallback.history_limit,
        }
    }

    pub fn fee_settings(&self) -> FeeDataSettings {
        FeeDataSettings {
            freshness_threshold_days: self.fees.freshness_threshold_days,
            ..FeeDataSettings::default()
        }
    }

    pub fn remote_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.remote.timeout_secs)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(remote) = patch.remote {
            if let Some(base_url) = remote.base_url {
                self.remote.base_url = Some(base_url);
            }
            if let Some(api_key) = remote.api_key {
                self.remote.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = remote.timeout_secs {
                self.remote.timeout_secs = timeout_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(medium_path) = cache.medium_path {
                self.cache.medium_path = Some(medium_path);
            }
            if let Some(refresh_threshold) = cache.refresh_threshold {
                self.cache.refresh_threshold = refresh_threshold;
            }
            if let Some(max_concurrent_refreshes) = cache.max_concurrent_refreshes {
                self.cache.max_concurrent_refreshes = max_concurrent_refreshes;
            }
            if let Some(refresh_interval_secs) = cache.refresh_interval_secs {
                self.cache.refresh_interval_secs = refresh_interval_secs;
            }
            if let Some(quota_bytes) = cache.quota_bytes {
                self.cache.quota_bytes = Some(quota_bytes);
            }
        }

        if let Some(fallback) = patch.fallback {
            if let Some(max_data_age_days) = fallback.max_data_age_days {
                self.fallback.max_data_age_days = max_data_age_days;
            }
            if let Some(enable_degradation) = fallback.enable_degradation {
                self.fallback.enable_degradation = enable_degradation;
            }
            if let Some(history_limit) = fallback.history_limit {
                self.fallback.history_limit = history_limit;
            }
        }

        if let Some(fees) = patch.fees {
            if let Some(freshness_threshold_days) = fees.freshness_threshold_days {
                self.fees.freshness_threshold_days = freshness_threshold_days;
            }
            if let Some(start_offline) = fees.start_offline {
                self.fees.start_offline = start_offline;
            }
        }

        if let Some(recommendations) = patch.recommendations {
            if let Some(default_limit) = recommendations.default_limit {
                self.recommendations.default_limit = default_limit;
            }
            if let Some(partner_banks) = recommendations.partner_banks {
                self.recommendations.partner_banks = partner_banks;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FINCALC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FINCALC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("FINCALC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FINCALC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("FINCALC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FINCALC_REMOTE_BASE_URL") {
            self.remote.base_url = Some(value);
        }
        if let Some(value) = read_env("FINCALC_REMOTE_API_KEY") {
            self.remote.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FINCALC_REMOTE_TIMEOUT_SECS") {
            self.remote.timeout_secs = parse_env("FINCALC_REMOTE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FINCALC_CACHE_MEDIUM_PATH") {
            self.cache.medium_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("FINCALC_CACHE_REFRESH_THRESHOLD") {
            self.cache.refresh_threshold = parse_env("FINCALC_CACHE_REFRESH_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("FINCALC_CACHE_MAX_CONCURRENT_REFRESHES") {
            self.cache.max_concurrent_refreshes =
                parse_env("FINCALC_CACHE_MAX_CONCURRENT_REFRESHES", &value)?;
        }
        if let Some(value) = read_env("FINCALC_CACHE_REFRESH_INTERVAL_SECS") {
            self.cache.refresh_interval_secs =
                parse_env("FINCALC_CACHE_REFRESH_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FINCALC_CACHE_QUOTA_BYTES") {
            self.cache.quota_bytes = Some(parse_env("FINCALC_CACHE_QUOTA_BYTES", &value)?);
        }

        if let Some(value) = read_env("FINCALC_FALLBACK_MAX_DATA_AGE_DAYS") {
            self.fallback.max_data_age_days =
                parse_env("FINCALC_FALLBACK_MAX_DATA_AGE_DAYS", &value)?;
        }
        if let Some(value) = read_env("FINCALC_FALLBACK_ENABLE_DEGRADATION") {
            self.fallback.enable_degradation =
                parse_env("FINCALC_FALLBACK_ENABLE_DEGRADATION", &value)?;
        }
        if let Some(value) = read_env("FINCALC_FALLBACK_HISTORY_LIMIT") {
            self.fallback.history_limit = parse_env("FINCALC_FALLBACK_HISTORY_LIMIT", &value)?;
        }

        if let Some(value) = read_env("FINCALC_FEES_FRESHNESS_THRESHOLD_DAYS") {
            self.fees.freshness_threshold_days =
                parse_env("FINCALC_FEES_FRESHNESS_THRESHOLD_DAYS", &value)?;
        }
        if let Some(value) = read_env("FINCALC_FEES_START_OFFLINE") {
            self.fees.start_offline = parse_env("FINCALC_FEES_START_OFFLINE", &value)?;
        }

        if let Some(value) = read_env("FINCALC_RECOMMENDATIONS_DEFAULT_LIMIT") {
            self.recommendations.default_limit =
                parse_env("FINCALC_RECOMMENDATIONS_DEFAULT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("FINCALC_RECOMMENDATIONS_PARTNER_BANKS") {
            self.recommendations.partner_banks = value
                .split(',')
                .map(str::trim)
                .filter(|bank| !bank.is_empty())
                .map(str::to_string)
                .collect();
        }

        let log_level = read_env("FINCALC_LOGGING_LEVEL").or_else(|| read_env("FINCALC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FINCALC_LOGGING_FORMAT").or_else(|| read_env("FINCALC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(remote_base_url) = overrides.remote_base_url {
            self.remote.base_url = Some(remote_base_url);
        }
        if let Some(cache_medium_path) = overrides.cache_medium_path {
            self.cache.medium_path = Some(cache_medium_path);
        }
        if let Some(start_offline) = overrides.start_offline {
            self.fees.start_offline = start_offline;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_remote(&self.remote)?;
        validate_cache(&self.cache)?;
        validate_fallback(&self.fallback)?;
        validate_fees(&self.fees)?;
        validate_recommendations(&self.recommendations)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("fincalc.toml"), PathBuf::from("config/fincalc.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_remote(remote: &RemoteConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &remote.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "remote.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let blank_key =
        remote.api_key.as_ref().is_some_and(|value| value.expose_secret().trim().is_empty());
    if blank_key {
        return Err(ConfigError::Validation(
            "remote.api_key must not be blank when set".to_string(),
        ));
    }

    if remote.timeout_secs == 0 || remote.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "remote.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if !(cache.refresh_threshold > 0.0 && cache.refresh_threshold < 1.0) {
        return Err(ConfigError::Validation(
            "cache.refresh_threshold must be strictly between 0 and 1".to_string(),
        ));
    }

    if cache.max_concurrent_refreshes == 0 {
        return Err(ConfigError::Validation(
            "cache.max_concurrent_refreshes must be greater than zero".to_string(),
        ));
    }

    if cache.refresh_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "cache.refresh_interval_secs must be greater than zero".to_string(),
        ));
    }

    if cache.quota_bytes == Some(0) {
        return Err(ConfigError::Validation(
            "cache.quota_bytes must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_fallback(fallback: &FallbackSettings) -> Result<(), ConfigError> {
    if fallback.max_data_age_days <= 0 {
        return Err(ConfigError::Validation(
            "fallback.max_data_age_days must be greater than zero".to_string(),
        ));
    }

    if fallback.history_limit == 0 {
        return Err(ConfigError::Validation(
            "fallback.history_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_fees(fees: &FeesConfig) -> Result<(), ConfigError> {
    if fees.freshness_threshold_days <= 0 {
        return Err(ConfigError::Validation(
            "fees.freshness_threshold_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_recommendations(recommendations: &RecommendationsConfig) -> Result<(), ConfigError> {
    if recommendations.default_limit == 0 || recommendations.default_limit > 50 {
        return Err(ConfigError::Validation(
            "recommendations.default_limit must be in range 1..=50".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    remote: Option<RemotePatch>,
    cache: Option<CachePatch>,
    fallback: Option<FallbackPatch>,
    fees: Option<FeesPatch>,
    recommendations: Option<RecommendationsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RemotePatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    medium_path: Option<PathBuf>,
    refresh_threshold: Option<f64>,
    max_concurrent_refreshes: Option<usize>,
    refresh_interval_secs: Option<u64>,
    quota_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FallbackPatch {
    max_data_age_days: Option<i64>,
    enable_degradation: Option<bool>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FeesPatch {
    freshness_threshold_days: Option<i64>,
    start_offline: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationsPatch {
    default_limit: Option<usize>,
    partner_banks: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
