//! Ingestor configuration loading.
//!
//! TOML is the sole config source. Default config directory:
//! `/etc/rss-bus`, overridable with `RSS_BUS_CONFIG_DIR`; the ingestor
//! reads `sources.toml` from it.
//!
//! # Required fields
//! - `schema_version = 1`
//! - At least one `[sources.*]` table, each with a `url`
//!
//! Unknown keys are ignored so the file tolerates additive change.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SOURCES_FILE: &str = "sources.toml";

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub schema_version: u32,
    pub ingest: IngestSettings,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub db_path: PathBuf,
    pub poll_interval_secs: u64,
    pub max_article_age_hours: u64,
    pub fetch_concurrency: usize,
    pub per_host_concurrency: usize,
    /// None disables the retention prune.
    pub retention_days: Option<u32>,
}

/// One pollable source. `label` is the `[sources.*]` table key, kept for
/// logs; the canonical feed id is always derived from the URL.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub label: String,
    pub url: String,
    pub name: String,
    pub group: Option<String>,
    pub active: bool,
    pub proxy_required: bool,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub region: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    ingest: Option<RawIngestSettings>,
    sources: Option<BTreeMap<String, RawSourceConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawIngestSettings {
    db_path: Option<String>,
    poll_interval_secs: Option<u64>,
    max_article_age_hours: Option<u64>,
    fetch_concurrency: Option<usize>,
    per_host_concurrency: Option<usize>,
    retention_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawSourceConfig {
    url: Option<String>,
    name: Option<String>,
    group: Option<String>,
    active: Option<bool>,
    proxy_required: Option<bool>,
    proxy: Option<RawProxyConfig>,
}

#[derive(Debug, Deserialize)]
struct RawProxyConfig {
    url: Option<String>,
    region: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// The fixed config directory, honoring the `RSS_BUS_CONFIG_DIR` override.
pub fn config_dir() -> PathBuf {
    std::env::var("RSS_BUS_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/rss-bus"))
}

/// Load the sources config from the fixed config directory.
pub fn load_config() -> Result<IngestorConfig, ConfigError> {
    load_config_from_path(&config_dir().join(SOURCES_FILE))
}

/// Load the sources config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<IngestorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load the sources config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<IngestorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let ingest = match raw.ingest {
        Some(i) => IngestSettings {
            db_path: i
                .db_path
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            poll_interval_secs: i.poll_interval_secs.unwrap_or(300),
            max_article_age_hours: i.max_article_age_hours.unwrap_or(24),
            fetch_concurrency: i.fetch_concurrency.unwrap_or(5),
            per_host_concurrency: i.per_host_concurrency.unwrap_or(3),
            retention_days: i.retention_days.or(Some(30)),
        },
        None => IngestSettings {
            db_path: default_db_path(),
            poll_interval_secs: 300,
            max_article_age_hours: 24,
            fetch_concurrency: 5,
            per_host_concurrency: 3,
            retention_days: Some(30),
        },
    };
    if ingest.fetch_concurrency == 0 || ingest.per_host_concurrency == 0 {
        return Err(ConfigError::InvalidValue(
            "fetch_concurrency and per_host_concurrency must be positive".to_owned(),
        ));
    }

    let raw_sources = raw
        .sources
        .ok_or_else(|| ConfigError::MissingField("sources".to_owned()))?;
    if raw_sources.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one [sources.*] entry is required".to_owned(),
        ));
    }

    let mut sources = Vec::with_capacity(raw_sources.len());
    for (label, s) in raw_sources {
        let url = s
            .url
            .ok_or_else(|| ConfigError::MissingField(format!("sources.{label}.url")))?;
        let proxy = match s.proxy {
            Some(p) => Some(ProxyConfig {
                url: p
                    .url
                    .ok_or_else(|| ConfigError::MissingField(format!("sources.{label}.proxy.url")))?,
                region: p.region,
            }),
            None => None,
        };
        if s.proxy_required.unwrap_or(false) && proxy.is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "sources.{label} sets proxy_required without a [sources.{label}.proxy] table"
            )));
        }
        sources.push(SourceConfig {
            name: s.name.unwrap_or_else(|| label.clone()),
            label,
            url,
            group: s.group,
            active: s.active.unwrap_or(true),
            proxy_required: s.proxy_required.unwrap_or(false),
            proxy,
        });
    }

    Ok(IngestorConfig {
        schema_version,
        ingest,
        sources,
    })
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/rss-bus/articles.sqlite3")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
