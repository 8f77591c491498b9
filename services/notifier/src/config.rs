//! Notifier configuration loading.
//!
//! Reads `recipients.toml` from the fixed config directory (`/etc/rss-bus`,
//! overridable with `RSS_BUS_CONFIG_DIR`). Tenants own channels; each
//! channel carries its bot credential, chat id, source scoping, per-source
//! topic routing and keyword filters.
//!
//! A topic mapping entry is either a bare topic id or a detailed table:
//!
//! ```toml
//! [tenants.newsdesk.channels.main.topics]
//! "rbc.ru" = 11
//!
//! [tenants.newsdesk.channels.main.topics."tass.ru"]
//! topic_id = 12
//! [tenants.newsdesk.channels.main.topics."tass.ru".filter]
//! mode = "include"
//! keywords = ["oil"]
//! ```
//!
//! Unknown keys are ignored so the file tolerates additive change. Inactive
//! tenants are dropped at load time.

use bus_model::FilterSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RECIPIENTS_FILE: &str = "recipients.toml";

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub schema_version: u32,
    pub dispatch: DispatchSettings,
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub db_path: PathBuf,
    pub tick_secs: u64,
    pub scan_limit: u32,
}

#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub id: String,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub id: String,
    pub bot_token: String,
    pub chat_id: i64,
    /// Allowed source ids; empty means "all sources".
    pub sources: Vec<String>,
    pub topics: Vec<TopicRouteConfig>,
    /// Channel-level fallback filter, applied when a routed source has none.
    pub default_filter: Option<FilterSpec>,
}

#[derive(Debug, Clone)]
pub struct TopicRouteConfig {
    pub source_id: String,
    pub topic_id: i64,
    pub filter: Option<FilterSpec>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    dispatch: Option<RawDispatchSettings>,
    tenants: Option<BTreeMap<String, RawTenant>>,
}

#[derive(Debug, Deserialize)]
struct RawDispatchSettings {
    db_path: Option<String>,
    tick_secs: Option<u64>,
    scan_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTenant {
    active: Option<bool>,
    channels: Option<BTreeMap<String, RawChannel>>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    bot_token: Option<String>,
    chat_id: Option<i64>,
    sources: Option<Vec<String>>,
    topics: Option<BTreeMap<String, RawTopicRoute>>,
    filter: Option<FilterSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTopicRoute {
    Bare(i64),
    Detailed {
        topic_id: Option<i64>,
        filter: Option<FilterSpec>,
    },
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

/// Load the recipients config from the fixed config directory.
pub fn load_config() -> Result<NotifierConfig, ConfigError> {
    load_config_from_path(&config_dir().join(RECIPIENTS_FILE))
}

/// Load the recipients config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<NotifierConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load the recipients config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<NotifierConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let dispatch = match raw.dispatch {
        Some(d) => DispatchSettings {
            db_path: d
                .db_path
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            tick_secs: d.tick_secs.unwrap_or(30),
            scan_limit: d.scan_limit.unwrap_or(500),
        },
        None => DispatchSettings {
            db_path: default_db_path(),
            tick_secs: 30,
            scan_limit: 500,
        },
    };
    if dispatch.scan_limit == 0 {
        return Err(ConfigError::InvalidValue(
            "scan_limit must be positive".to_owned(),
        ));
    }

    let raw_tenants = raw
        .tenants
        .ok_or_else(|| ConfigError::MissingField("tenants".to_owned()))?;

    let mut tenants = Vec::new();
    for (tenant_id, tenant) in raw_tenants {
        if !tenant.active.unwrap_or(false) {
            continue;
        }
        let mut channels = Vec::new();
        for (channel_id, c) in tenant.channels.unwrap_or_default() {
            let bot_token = c.bot_token.ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "tenants.{tenant_id}.channels.{channel_id}.bot_token"
                ))
            })?;
            let chat_id = c.chat_id.ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "tenants.{tenant_id}.channels.{channel_id}.chat_id"
                ))
            })?;

            let mut topics = Vec::new();
            for (source_id, route) in c.topics.unwrap_or_default() {
                let (topic_id, filter) = match route {
                    RawTopicRoute::Bare(topic_id) => (topic_id, None),
                    RawTopicRoute::Detailed { topic_id, filter } => {
                        let topic_id = topic_id.ok_or_else(|| {
                            ConfigError::MissingField(format!(
                                "tenants.{tenant_id}.channels.{channel_id}.topics.{source_id}.topic_id"
                            ))
                        })?;
                        (topic_id, filter)
                    }
                };
                topics.push(TopicRouteConfig {
                    source_id,
                    topic_id,
                    filter,
                });
            }

            channels.push(ChannelConfig {
                id: channel_id,
                bot_token,
                chat_id,
                sources: c.sources.unwrap_or_default(),
                topics,
                default_filter: c.filter,
            });
        }
        tenants.push(TenantConfig {
            id: tenant_id,
            channels,
        });
    }

    Ok(NotifierConfig {
        schema_version,
        dispatch,
        tenants,
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
