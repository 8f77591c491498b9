//! Watermark-driven fan-out of stored articles to recipient channels.
//!
//! Every tick scans the store once per channel for articles newer than the
//! channel's watermark, routes them by source, filters, and posts them in
//! chronological order. Channels run as concurrent tasks; posts within a
//! channel are strictly serial and paced to the chat backend's rate limit.
//!
//! Recipient reloads (SIGUSR2) rebuild the registry between ticks,
//! preserving the watermark of every surviving `(tenant, channel)` pair.

use crate::config::{self, NotifierConfig};
use crate::filter::{self, FilterDecision};
use crate::registry::{RecipientChannel, RecipientRegistry};
use crate::telegram::{PostOutcome, TelegramClient};
use bus_model::{Article, StoredArticle};
use bus_store::ArticleStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Minimum spacing between posts into one channel (20 posts/minute).
const POST_GAP: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    cfg: NotifierConfig,
    store: ArticleStore,
    registry: RecipientRegistry,
    api_base: String,
    post_gap: Duration,
}

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub channels: usize,
    pub posted: usize,
}

struct ChannelResult {
    tenant: String,
    channel: String,
    new_watermark: Option<DateTime<Utc>>,
    posted: usize,
}

impl Dispatcher {
    pub fn new(cfg: NotifierConfig, store: ArticleStore) -> Self {
        let registry = RecipientRegistry::from_config(&cfg, Utc::now());
        Dispatcher {
            cfg,
            store,
            registry,
            api_base: "https://api.telegram.org".to_owned(),
            post_gap: POST_GAP,
        }
    }

    /// Point the chat client at a different API base (tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_owned();
        self
    }

    /// Shrink the per-channel post spacing (tests).
    pub fn with_post_gap(mut self, gap: Duration) -> Self {
        self.post_gap = gap;
        self
    }

    pub fn registry(&self) -> &RecipientRegistry {
        &self.registry
    }

    /// Apply a freshly loaded recipients config, preserving watermarks of
    /// surviving channels.
    pub fn apply_config(&mut self, cfg: NotifierConfig) {
        self.registry = RecipientRegistry::rebuild(&cfg, &self.registry, Utc::now());
        self.cfg = cfg;
    }

    /// Main loop: tick, sleep, repeat; SIGUSR2 marks a reload that is picked
    /// up before the next tick.
    ///
    /// `shutdown` flips to true on SIGINT/SIGTERM. It is only consulted
    /// between ticks and during the inter-tick sleep, so a tick that is
    /// already running always finishes its in-flight posts before exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGUSR2 handler");
                return;
            }
        };

        let mut reload_pending = false;
        loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, exiting");
                return;
            }
            if reload_pending {
                reload_pending = false;
                match config::load_config() {
                    Ok(cfg) => {
                        let channels: usize = cfg.tenants.iter().map(|t| t.channels.len()).sum();
                        tracing::info!(channels, "recipients reloaded");
                        self.apply_config(cfg);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "recipients reload failed, keeping previous configuration");
                    }
                }
            }

            let stats = self.run_tick().await;
            if stats.posted > 0 {
                tracing::info!(
                    channels = stats.channels,
                    posted = stats.posted,
                    "dispatch tick complete"
                );
            }

            if *shutdown.borrow() {
                tracing::info!("shutdown requested, exiting after completed tick");
                return;
            }

            let sleep = tokio::time::sleep(Duration::from_secs(self.cfg.dispatch.tick_secs));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("shutdown requested, exiting");
                            return;
                        }
                    }
                    _ = sigusr2.recv() => {
                        reload_pending = true;
                        tracing::info!("recipients reload requested (SIGUSR2)");
                    }
                }
            }
        }
    }

    /// One dispatch pass over every channel.
    pub async fn run_tick(&mut self) -> TickStats {
        let mut stats = TickStats {
            channels: self.registry.channels.len(),
            posted: 0,
        };

        let mut tasks = JoinSet::new();
        for channel in self.registry.channels.iter().cloned() {
            let store = self.store.clone();
            let api_base = self.api_base.clone();
            let scan_limit = self.cfg.dispatch.scan_limit;
            let post_gap = self.post_gap;
            tasks.spawn(async move {
                run_channel(&store, &channel, &api_base, scan_limit, post_gap).await
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(result) => {
                    stats.posted += result.posted;
                    if let Some(watermark) = result.new_watermark {
                        self.registry
                            .advance_watermark(&result.tenant, &result.channel, watermark);
                    }
                }
                Err(e) => tracing::error!(error = %e, "channel dispatch task failed"),
            }
        }

        stats
    }
}

// ---------------------------------------------------------------------------
// Per-channel pass
// ---------------------------------------------------------------------------

async fn run_channel(
    store: &ArticleStore,
    channel: &RecipientChannel,
    api_base: &str,
    scan_limit: u32,
    post_gap: Duration,
) -> ChannelResult {
    let mut result = ChannelResult {
        tenant: channel.tenant.clone(),
        channel: channel.channel.clone(),
        new_watermark: None,
        posted: 0,
    };

    // The watermark moves to wall-clock "now", captured before the scan so
    // rows ingested mid-pass are seen next tick.
    let scan_start = Utc::now();
    let scanned = match store.articles_since(channel.watermark, scan_limit) {
        Ok(scanned) => scanned,
        Err(e) => {
            tracing::warn!(
                tenant = %channel.tenant,
                channel = %channel.channel,
                error = %e,
                "article scan failed, will retry next tick"
            );
            return result;
        }
    };
    result.new_watermark = Some(scan_start);
    if scanned.is_empty() {
        return result;
    }

    let client = match TelegramClient::with_api_base(api_base, &channel.bot_token) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(
                tenant = %channel.tenant,
                channel = %channel.channel,
                error = %e,
                "chat client construction failed"
            );
            result.new_watermark = None;
            return result;
        }
    };

    let mut first_post = true;
    for stored in &scanned {
        if !channel.allows_source(&stored.feed_id) {
            continue;
        }
        let Some(route) = channel.resolve_route(&stored.feed_id) else {
            tracing::debug!(
                tenant = %channel.tenant,
                channel = %channel.channel,
                feed = %stored.feed_id,
                "no topic route for source, article dropped"
            );
            continue;
        };

        let decision = match route.filter.as_ref().or(channel.default_filter.as_ref()) {
            Some(spec) => filter::apply(&stored.article, spec),
            None => FilterDecision::unfiltered(),
        };
        if !decision.include {
            tracing::debug!(
                tenant = %channel.tenant,
                channel = %channel.channel,
                title = %stored.article.title,
                reason = %decision.reason,
                "article filtered out"
            );
            continue;
        }

        if !first_post {
            tokio::time::sleep(post_gap).await;
        }
        first_post = false;

        let text = format_message(&stored.article);
        if post_with_recovery(&client, channel, route.topic_id, &text, stored).await {
            result.posted += 1;
        }
    }

    result
}

/// Post one article, honoring throttle waits and falling back to the chat's
/// default thread once when the topic is unknown. Returns whether the post
/// landed; a dropped article never blocks the ones behind it.
async fn post_with_recovery(
    client: &TelegramClient,
    channel: &RecipientChannel,
    topic_id: i64,
    text: &str,
    stored: &StoredArticle,
) -> bool {
    let mut thread_id = Some(topic_id);
    loop {
        match client
            .send_message(channel.chat_id, thread_id, text, Some("HTML"))
            .await
        {
            PostOutcome::Success => {
                tracing::info!(
                    tenant = %channel.tenant,
                    channel = %channel.channel,
                    feed = %stored.feed_id,
                    topic = thread_id,
                    title = %stored.article.title,
                    "article posted"
                );
                return true;
            }
            PostOutcome::Throttled { retry_after } => {
                tracing::info!(
                    tenant = %channel.tenant,
                    channel = %channel.channel,
                    retry_after,
                    "chat throttled, waiting"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
            }
            PostOutcome::UnknownThread if thread_id.is_some() => {
                tracing::warn!(
                    tenant = %channel.tenant,
                    channel = %channel.channel,
                    topic = topic_id,
                    "message thread not found, retrying in the default thread"
                );
                thread_id = None;
            }
            PostOutcome::UnknownThread => {
                tracing::warn!(
                    tenant = %channel.tenant,
                    channel = %channel.channel,
                    title = %stored.article.title,
                    "default-thread retry failed, article dropped"
                );
                return false;
            }
            PostOutcome::Terminal { description } => {
                tracing::warn!(
                    tenant = %channel.tenant,
                    channel = %channel.channel,
                    title = %stored.article.title,
                    error = %description,
                    "post failed, article dropped"
                );
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

/// Bold title, description, hash tags, link — blank-line separated, HTML
/// parse mode.
pub fn format_message(article: &Article) -> String {
    let mut parts = Vec::new();

    parts.push(format!("<b>{}</b>", escape_html(&article.title)));

    if let Some(description) = article.description.as_deref() {
        let description = description.trim();
        if !description.is_empty() {
            parts.push(escape_html(description));
        }
    }

    if article.tags.is_empty() {
        parts.push("#no_category".to_owned());
    } else {
        let tags: Vec<String> = article
            .tags
            .iter()
            .map(|t| format!("#{}", t.replace(' ', "_").replace('&', "and")))
            .collect();
        parts.push(tags.join(" "));
    }

    if let Some(link) = article.link.as_deref() {
        parts.push(link.to_owned());
    }

    parts.join("\n\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article() -> Article {
        Article {
            title: "Title <with> markup & stuff".to_owned(),
            link: Some("https://example.com/a".to_owned()),
            guid: None,
            description: Some("Plain description".to_owned()),
            content: None,
            author: None,
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            modified_at: None,
            category: None,
            tags: vec!["world news".to_owned(), "oil & gas".to_owned()],
            media: vec![],
            news_id: None,
            content_type: None,
            newsline: None,
        }
    }

    #[test]
    fn message_layout_is_title_description_tags_link() {
        let text = format_message(&article());
        let blocks: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], "<b>Title &lt;with&gt; markup &amp; stuff</b>");
        assert_eq!(blocks[1], "Plain description");
        assert_eq!(blocks[2], "#world_news #oil_and_gas");
        assert_eq!(blocks[3], "https://example.com/a");
    }

    #[test]
    fn message_without_tags_gets_the_placeholder_tag() {
        let mut a = article();
        a.tags.clear();
        let text = format_message(&a);
        assert!(text.contains("#no_category"));
    }
}
