//! In-memory view of recipient channels, rebuildable from configuration.
//!
//! Watermarks live here and only here: a channel created at load starts at
//! "now" (history is never replayed into a fresh channel), and a reload
//! keeps the watermark of every `(tenant, channel)` pair that survives.
//! Channels that disappear are dropped without draining.

use crate::config::NotifierConfig;
use bus_model::FilterSpec;
use chrono::{DateTime, Utc};

/// One topic routing entry: source id → topic, with an optional per-source
/// filter that wins over the channel default.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRoute {
    pub source_id: String,
    pub topic_id: i64,
    pub filter: Option<FilterSpec>,
}

/// A single delivery target with its routing rules and watermark.
#[derive(Debug, Clone)]
pub struct RecipientChannel {
    pub tenant: String,
    pub channel: String,
    pub bot_token: String,
    pub chat_id: i64,
    pub sources: Vec<String>,
    pub topics: Vec<TopicRoute>,
    pub default_filter: Option<FilterSpec>,
    pub watermark: DateTime<Utc>,
}

impl RecipientChannel {
    /// Source scoping: an empty list admits every source.
    pub fn allows_source(&self, feed_id: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == feed_id)
    }

    /// Resolve the topic route for a feed id: exact key first, then a
    /// substring match in either direction (tolerates subdomain/apex
    /// variation between the routing key and the derived feed id).
    pub fn resolve_route(&self, feed_id: &str) -> Option<&TopicRoute> {
        if let Some(route) = self.topics.iter().find(|r| r.source_id == feed_id) {
            return Some(route);
        }
        self.topics
            .iter()
            .find(|r| r.source_id.contains(feed_id) || feed_id.contains(&r.source_id))
    }
}

/// The loaded channel set.
#[derive(Debug, Clone, Default)]
pub struct RecipientRegistry {
    pub channels: Vec<RecipientChannel>,
}

impl RecipientRegistry {
    /// Build a fresh registry; every watermark starts at `now`.
    pub fn from_config(cfg: &NotifierConfig, now: DateTime<Utc>) -> Self {
        RecipientRegistry::rebuild(cfg, &RecipientRegistry::default(), now)
    }

    /// Rebuild from a reloaded config, preserving the watermark of every
    /// `(tenant, channel)` pair that still exists.
    pub fn rebuild(cfg: &NotifierConfig, previous: &RecipientRegistry, now: DateTime<Utc>) -> Self {
        let mut channels = Vec::new();
        for tenant in &cfg.tenants {
            for channel in &tenant.channels {
                let watermark = previous
                    .find(&tenant.id, &channel.id)
                    .map_or(now, |prev| prev.watermark);
                channels.push(RecipientChannel {
                    tenant: tenant.id.clone(),
                    channel: channel.id.clone(),
                    bot_token: channel.bot_token.clone(),
                    chat_id: channel.chat_id,
                    sources: channel.sources.clone(),
                    topics: channel
                        .topics
                        .iter()
                        .map(|t| TopicRoute {
                            source_id: t.source_id.clone(),
                            topic_id: t.topic_id,
                            filter: t.filter.clone(),
                        })
                        .collect(),
                    default_filter: channel.default_filter.clone(),
                    watermark,
                });
            }
        }
        RecipientRegistry { channels }
    }

    pub fn find(&self, tenant: &str, channel: &str) -> Option<&RecipientChannel> {
        self.channels
            .iter()
            .find(|c| c.tenant == tenant && c.channel == channel)
    }

    /// Advance a channel's watermark. Never moves it backwards.
    pub fn advance_watermark(&mut self, tenant: &str, channel: &str, to: DateTime<Utc>) {
        if let Some(c) = self
            .channels
            .iter_mut()
            .find(|c| c.tenant == tenant && c.channel == channel)
        {
            if to > c.watermark {
                c.watermark = to;
            }
        }
    }
}
