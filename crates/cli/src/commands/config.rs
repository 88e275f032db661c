use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fincalc_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = match &config.remote.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let medium_path = config
        .cache
        .medium_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string());
    let quota = config
        .cache
        .quota_bytes
        .map(|quota| quota.to_string())
        .unwrap_or_else(|| "<unlimited>".to_string());
    let partner_banks = if config.recommendations.partner_banks.is_empty() {
        "<none>".to_string()
    } else {
        config.recommendations.partner_banks.join(", ")
    };

    let fields: [(&str, String, &[&str]); 20] = [
        ("database.url", config.database.url.clone(), &["FINCALC_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["FINCALC_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["FINCALC_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "remote.base_url",
            config.remote.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["FINCALC_REMOTE_BASE_URL"],
        ),
        ("remote.api_key", api_key, &["FINCALC_REMOTE_API_KEY"]),
        (
            "remote.timeout_secs",
            config.remote.timeout_secs.to_string(),
            &["FINCALC_REMOTE_TIMEOUT_SECS"],
        ),
        ("cache.medium_path", medium_path, &["FINCALC_CACHE_MEDIUM_PATH"]),
        (
            "cache.refresh_threshold",
            config.cache.refresh_threshold.to_string(),
            &["FINCALC_CACHE_REFRESH_THRESHOLD"],
        ),
        (
            "cache.max_concurrent_refreshes",
            config.cache.max_concurrent_refreshes.to_string(),
            &["FINCALC_CACHE_MAX_CONCURRENT_REFRESHES"],
        ),
        (
            "cache.refresh_interval_secs",
            config.cache.refresh_interval_secs.to_string(),
            &["FINCALC_CACHE_REFRESH_INTERVAL_SECS"],
        ),
        ("cache.quota_bytes", quota, &["FINCALC_CACHE_QUOTA_BYTES"]),
        (
            "fallback.max_data_age_days",
            config.fallback.max_data_age_days.to_string(),
            &["FINCALC_FALLBACK_MAX_DATA_AGE_DAYS"],
        ),
        (
            "fallback.enable_degradation",
            config.fallback.enable_degradation.to_string(),
            &["FINCALC_FALLBACK_ENABLE_DEGRADATION"],
        ),
        (
            "fallback.history_limit",
            config.fallback.history_limit.to_string(),
            &["FINCALC_FALLBACK_HISTORY_LIMIT"],
        ),
        (
            "fees.freshness_threshold_days",
            config.fees.freshness_threshold_days.to_string(),
            &["FINCALC_FEES_FRESHNESS_THRESHOLD_DAYS"],
        ),
        (
            "fees.start_offline",
            config.fees.start_offline.to_string(),
            &["FINCALC_FEES_START_OFFLINE"],
        ),
        (
            "recommendations.default_limit",
            config.recommendations.default_limit.to_string(),
            &["FINCALC_RECOMMENDATIONS_DEFAULT_LIMIT"],
        ),
        (
            "recommendations.partner_banks",
            partner_banks,
            &["FINCALC_RECOMMENDATIONS_PARTNER_BANKS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["FINCALC_LOGGING_LEVEL", "FINCALC_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["FINCALC_LOGGING_FORMAT", "FINCALC_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in fields {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("fincalc.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/fincalc.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters of long keys so operators can tell keys
/// apart without exposing them.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if trimmed.chars().count() > 12 {
        let prefix: String = trimmed.chars().take(4).collect();
        return format!("{prefix}***");
    }

    "<redacted>".to_string()
}
