//! Poll cycle orchestration.
//!
//! One cycle: build the batch of active, non-cooling-down feeds, fan the
//! fetches out under the global and per-host concurrency caps, normalize and
//! store what came back, and report every classified failure to the governor.
//! A single feed's failure never aborts the cycle.
//!
//! Config reloads (SIGUSR1) are applied strictly between cycles; the cycle
//! that is running when the signal arrives completes with the old source set.

use crate::config::{self, IngestorConfig, SourceConfig};
use crate::fetch::{FetchOutcome, Fetcher, UserAgentChoice};
use crate::governor::{Alternative, ErrorGovernor, ErrorKind};
use crate::normalize::Normalizer;
use bus_store::ArticleStore;
use chrono::Utc;
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Semaphore, watch};
use url::Url;

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Per-feed fetch adjustments persisted across cycles after governor
/// recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOverride {
    pub alternate_ua: bool,
    pub via_proxy: bool,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub attempted: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_articles: usize,
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FeedJob {
    source: SourceConfig,
    feed_id: String,
    fetch_override: FetchOverride,
}

struct FeedSuccess {
    new_articles: usize,
}

struct FeedFailure {
    kind: ErrorKind,
    http_status: Option<u16>,
    message: String,
}

struct FeedReport {
    job: FeedJob,
    outcome: Result<FeedSuccess, FeedFailure>,
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct Ingestor {
    cfg: IngestorConfig,
    store: ArticleStore,
    fetcher: Fetcher,
    normalizer: Normalizer,
    governor: ErrorGovernor,
    overrides: HashMap<String, FetchOverride>,
}

impl Ingestor {
    pub fn new(cfg: IngestorConfig, store: ArticleStore) -> Result<Self, reqwest::Error> {
        let fetcher = Fetcher::new()?;
        Ok(Ingestor::with_fetcher(cfg, store, fetcher))
    }

    /// Construct with a custom fetcher (tests use short timeouts).
    pub fn with_fetcher(cfg: IngestorConfig, store: ArticleStore, fetcher: Fetcher) -> Self {
        let normalizer = Normalizer::new(cfg.ingest.max_article_age_hours);
        Ingestor {
            cfg,
            store,
            fetcher,
            normalizer,
            governor: ErrorGovernor::new(),
            overrides: HashMap::new(),
        }
    }

    /// Swap in a freshly loaded configuration. Only ever called between
    /// cycles; error-governor state and fetch overrides survive the swap.
    pub fn apply_config(&mut self, cfg: IngestorConfig) {
        self.normalizer = Normalizer::new(cfg.ingest.max_article_age_hours);
        self.cfg = cfg;
    }

    /// Main loop: cycle, sleep, repeat; SIGUSR1 marks a reload that is
    /// picked up at the top of the next cycle.
    ///
    /// `shutdown` flips to true on SIGINT/SIGTERM. It is only consulted
    /// between cycles and during the inter-cycle sleep, so a cycle that is
    /// already running always completes its in-flight work before exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGUSR1 handler");
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
                        tracing::info!(sources = cfg.sources.len(), "sources reloaded");
                        self.apply_config(cfg);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "sources reload failed, keeping previous configuration");
                    }
                }
            }

            let started = std::time::Instant::now();
            let stats = self.run_cycle().await;
            let governor = self.governor.statistics();
            tracing::info!(
                attempted = stats.attempted,
                succeeded = stats.succeeded,
                failed = stats.failed,
                skipped = stats.skipped,
                new_articles = stats.new_articles,
                feeds_with_errors = governor.feeds_with_errors,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "poll cycle complete"
            );

            if *shutdown.borrow() {
                tracing::info!("shutdown requested, exiting after completed cycle");
                return;
            }

            let sleep = tokio::time::sleep(Duration::from_secs(self.cfg.ingest.poll_interval_secs));
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
                    _ = sigusr1.recv() => {
                        reload_pending = true;
                        tracing::info!("sources reload requested (SIGUSR1)");
                    }
                }
            }
        }
    }

    /// One full poll cycle over the current source set.
    pub async fn run_cycle(&mut self) -> CycleStats {
        let mut stats = CycleStats::default();

        let mut batch: Vec<FeedJob> = Vec::new();
        for source in self.cfg.sources.iter().filter(|s| s.active) {
            let (skip, reason) = self.governor.should_skip(&source.url);
            if skip {
                tracing::info!(feed = %source.name, reason, "feed skipped");
                stats.skipped += 1;
                continue;
            }
            let feed_id = match self.store.register_feed(
                &source.url,
                Some(&source.name),
                source.group.as_deref(),
            ) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(feed = %source.name, error = %e, "feed registration failed");
                    stats.failed += 1;
                    continue;
                }
            };
            batch.push(FeedJob {
                fetch_override: self.overrides.get(&source.url).copied().unwrap_or_default(),
                source: source.clone(),
                feed_id,
            });
        }
        stats.attempted = batch.len();
        if batch.is_empty() {
            return stats;
        }

        let mut host_limits: HashMap<String, Arc<Semaphore>> = HashMap::new();
        for job in &batch {
            host_limits
                .entry(host_of(&job.source.url))
                .or_insert_with(|| {
                    Arc::new(Semaphore::new(self.cfg.ingest.per_host_concurrency))
                });
        }

        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let normalizer = self.normalizer.clone();

        let reports: Vec<FeedReport> = stream::iter(batch.into_iter().map(|job| {
            let fetcher = fetcher.clone();
            let store = store.clone();
            let normalizer = normalizer.clone();
            let limit = host_limits
                .get(&host_of(&job.source.url))
                .cloned()
                .unwrap_or_else(|| Arc::new(Semaphore::new(1)));
            async move {
                let _permit = limit.acquire_owned().await.ok();
                let outcome = process_feed(&fetcher, &store, &normalizer, &job).await;
                FeedReport { job, outcome }
            }
        }))
        .buffer_unordered(self.cfg.ingest.fetch_concurrency)
        .collect()
        .await;

        for report in reports {
            let source = &report.job.source;
            match report.outcome {
                Ok(success) => {
                    stats.succeeded += 1;
                    stats.new_articles += success.new_articles;
                    self.governor.reset(&source.url);
                    if success.new_articles > 0 {
                        tracing::info!(
                            feed = %source.name,
                            new = success.new_articles,
                            "feed processed"
                        );
                    } else {
                        tracing::debug!(feed = %source.name, "feed processed, nothing new");
                    }
                }
                Err(failure) => {
                    stats.failed += 1;
                    self.governor.record_error(
                        &source.url,
                        &source.name,
                        failure.kind,
                        failure.http_status,
                        &failure.message,
                    );
                    if let Some(status) = failure.http_status {
                        let recommendation =
                            self.governor.recommend_alternative(&source.url, status);
                        self.apply_recommendation(source.clone(), recommendation);
                    }
                }
            }
        }

        if let Some(days) = self.cfg.ingest.retention_days {
            match self.store.prune(days) {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, days, "pruned old articles"),
                Err(e) => tracing::warn!(error = %e, "retention prune failed"),
            }
        }

        stats
    }

    /// Current override for a feed URL (tests inspect escalation here).
    pub fn fetch_override(&self, feed_url: &str) -> FetchOverride {
        self.overrides.get(feed_url).copied().unwrap_or_default()
    }

    fn apply_recommendation(&mut self, source: SourceConfig, recommendation: Alternative) {
        if recommendation == Alternative::None {
            return;
        }
        let wants_proxy = matches!(recommendation, Alternative::Proxy | Alternative::Both);
        if wants_proxy && source.proxy.is_none() {
            tracing::warn!(
                feed = %source.name,
                recommendation = %recommendation,
                "proxy recommended but none configured for this feed"
            );
        }
        let entry = self.overrides.entry(source.url.clone()).or_default();
        match recommendation {
            Alternative::UserAgent => entry.alternate_ua = true,
            Alternative::Proxy => entry.via_proxy = true,
            Alternative::Both => {
                entry.alternate_ua = true;
                entry.via_proxy = true;
            }
            Alternative::None => {}
        }
        tracing::info!(
            feed = %source.name,
            recommendation = %recommendation,
            "alternative fetch method noted for next cycles"
        );
    }
}

// ---------------------------------------------------------------------------
// Per-feed processing
// ---------------------------------------------------------------------------

async fn process_feed(
    fetcher: &Fetcher,
    store: &ArticleStore,
    normalizer: &Normalizer,
    job: &FeedJob,
) -> Result<FeedSuccess, FeedFailure> {
    let source = &job.source;
    let ua = if job.fetch_override.alternate_ua {
        UserAgentChoice::Alternate
    } else {
        UserAgentChoice::Browser
    };
    let proxy = if source.proxy_required || job.fetch_override.via_proxy {
        source.proxy.as_ref()
    } else {
        None
    };
    if proxy.is_some() {
        tracing::debug!(feed = %source.name, "fetching via proxy");
    }

    let mut delay = RETRY_BASE_DELAY;
    let mut last_failure = FeedFailure {
        kind: ErrorKind::Exception,
        http_status: None,
        message: "no attempt made".to_owned(),
    };

    for attempt in 1..=FETCH_ATTEMPTS {
        if attempt > 1 {
            tracing::debug!(feed = %source.name, attempt, "retrying fetch");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        match fetcher.fetch(&source.url, ua, proxy).await {
            FetchOutcome::Ok(bytes) => {
                let worker = normalizer.clone();
                let parsed =
                    tokio::task::spawn_blocking(move || worker.normalize(&bytes, Utc::now()))
                        .await;
                match parsed {
                    Ok(Ok(feed)) => {
                        let mut new_articles = 0;
                        for article in &feed.articles {
                            match store.record_article(&job.feed_id, article) {
                                Ok(outcome) if outcome.inserted => new_articles += 1,
                                Ok(_) => {}
                                Err(e) => tracing::warn!(
                                    feed = %source.name,
                                    title = %article.title,
                                    error = %e,
                                    "article insert failed"
                                ),
                            }
                        }
                        if let Err(e) = store.update_feed(
                            &job.feed_id,
                            feed.feed_title.as_deref(),
                            Utc::now(),
                        ) {
                            tracing::warn!(feed = %source.name, error = %e, "feed update failed");
                        }
                        return Ok(FeedSuccess { new_articles });
                    }
                    Ok(Err(e)) => {
                        last_failure = FeedFailure {
                            kind: ErrorKind::ParsingError,
                            http_status: None,
                            message: e.to_string(),
                        };
                    }
                    Err(e) => {
                        last_failure = FeedFailure {
                            kind: ErrorKind::Exception,
                            http_status: None,
                            message: format!("parser worker: {e}"),
                        };
                    }
                }
            }
            FetchOutcome::Empty => {
                last_failure = FeedFailure {
                    kind: ErrorKind::ParsingError,
                    http_status: None,
                    message: "empty or too-short response".to_owned(),
                };
            }
            FetchOutcome::NotFound => {
                return Err(FeedFailure {
                    kind: ErrorKind::NotFound,
                    http_status: Some(404),
                    message: "feed not found".to_owned(),
                });
            }
            FetchOutcome::Forbidden => {
                return Err(FeedFailure {
                    kind: ErrorKind::Forbidden,
                    http_status: Some(403),
                    message: "access denied".to_owned(),
                });
            }
            FetchOutcome::Http(status) => {
                last_failure = FeedFailure {
                    kind: ErrorKind::HttpError,
                    http_status: Some(status),
                    message: format!("HTTP {status}"),
                };
            }
            FetchOutcome::Timeout => {
                last_failure = FeedFailure {
                    kind: ErrorKind::Timeout,
                    http_status: None,
                    message: "request timed out".to_owned(),
                };
            }
            FetchOutcome::Network(message) => {
                last_failure = FeedFailure {
                    kind: ErrorKind::NetworkError,
                    http_status: None,
                    message,
                };
            }
        }
    }

    Err(last_failure)
}

fn host_of(feed_url: &str) -> String {
    Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
}
