//! Per-feed error governance: consecutive-failure counting, cooldown skips,
//! and the escalation ladder for access-denied responses.
//!
//! The governor is the single authority on whether a feed is attempted in a
//! cycle. The ingestor consults `should_skip` when building the batch and
//! reports every classified failure back through `record_error`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Errors after which a feed enters cooldown.
const MAX_ERRORS: u32 = 5;
/// Rolling history kept per feed.
const HISTORY_CAP: usize = 10;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Classified failure kinds, mirroring the fetch/normalize pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    HttpError,
    Timeout,
    NetworkError,
    ParsingError,
    Exception,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::HttpError => "http_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ParsingError => "parsing_error",
            ErrorKind::Exception => "exception",
        };
        f.write_str(s)
    }
}

/// Remediation suggested for an access-denied response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alternative {
    None,
    UserAgent,
    Proxy,
    Both,
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Alternative::None => "none",
            Alternative::UserAgent => "user_agent",
            Alternative::Proxy => "proxy",
            Alternative::Both => "both",
        };
        f.write_str(s)
    }
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Default)]
struct FeedErrors {
    consecutive: u32,
    last_error_at: Option<DateTime<Utc>>,
    history: VecDeque<ErrorRecord>,
}

/// Summary of governor state for the cycle-end log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorStats {
    pub feeds_with_errors: usize,
    pub total_errors: u64,
}

// ---------------------------------------------------------------------------
// ErrorGovernor
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ErrorGovernor {
    feeds: HashMap<String, FeedErrors>,
}

impl ErrorGovernor {
    pub fn new() -> Self {
        ErrorGovernor::default()
    }

    /// Record a classified failure for a feed; returns the new consecutive
    /// count.
    pub fn record_error(
        &mut self,
        feed_url: &str,
        feed_name: &str,
        kind: ErrorKind,
        http_status: Option<u16>,
        message: &str,
    ) -> u32 {
        let now = Utc::now();
        let state = self.feeds.entry(feed_url.to_owned()).or_default();
        state.consecutive += 1;
        state.last_error_at = Some(now);
        state.history.push_back(ErrorRecord {
            at: now,
            kind,
            http_status,
            message: message.to_owned(),
        });
        while state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }

        tracing::warn!(
            feed = feed_name,
            kind = %kind,
            status = http_status,
            errors = state.consecutive,
            detail = message,
            "feed error recorded"
        );
        state.consecutive
    }

    /// Clear a feed's error state after a successful fetch.
    pub fn reset(&mut self, feed_url: &str) {
        if let Some(state) = self.feeds.remove(feed_url) {
            if state.consecutive > 0 {
                tracing::info!(
                    feed = feed_url,
                    errors = state.consecutive,
                    "feed recovered after errors"
                );
            }
        }
    }

    /// Whether the feed should be skipped this cycle, with a loggable reason.
    pub fn should_skip(&self, feed_url: &str) -> (bool, String) {
        self.should_skip_at(feed_url, Utc::now())
    }

    /// Clock-injectable variant of `should_skip`.
    pub fn should_skip_at(&self, feed_url: &str, now: DateTime<Utc>) -> (bool, String) {
        let Some(state) = self.feeds.get(feed_url) else {
            return (false, String::new());
        };
        if state.consecutive < MAX_ERRORS {
            return (false, String::new());
        }
        let Some(last) = state.last_error_at else {
            return (false, String::new());
        };

        let delay_minutes = cooldown_minutes(state.consecutive);
        let elapsed = now.signed_duration_since(last);
        if elapsed < chrono::Duration::minutes(delay_minutes) {
            let reason = format!(
                "cooling down for {delay_minutes} min ({} errors)",
                state.consecutive
            );
            return (true, reason);
        }
        (false, String::new())
    }

    /// Remediation for an access-denied style response, escalating with the
    /// feed's current consecutive-error count. Call after `record_error` so
    /// the current failure is included in the count.
    pub fn recommend_alternative(&self, feed_url: &str, http_status: u16) -> Alternative {
        match http_status {
            403 => {
                let count = self
                    .feeds
                    .get(feed_url)
                    .map_or(0, |state| state.consecutive);
                if count <= 2 {
                    Alternative::UserAgent
                } else if count <= 4 {
                    Alternative::Proxy
                } else {
                    Alternative::Both
                }
            }
            429 | 503 => Alternative::Proxy,
            _ => Alternative::None,
        }
    }

    /// Recent failure history for a feed, oldest first.
    pub fn history(&self, feed_url: &str) -> impl Iterator<Item = &ErrorRecord> {
        self.feeds
            .get(feed_url)
            .into_iter()
            .flat_map(|state| state.history.iter())
    }

    pub fn statistics(&self) -> GovernorStats {
        GovernorStats {
            feeds_with_errors: self.feeds.len(),
            total_errors: self
                .feeds
                .values()
                .map(|s| u64::from(s.consecutive))
                .sum(),
        }
    }
}

/// Cooldown window after the circuit opens: `min(60, 2^errors)` minutes.
fn cooldown_minutes(errors: u32) -> i64 {
    let exp = 2u64.saturating_pow(errors.min(16));
    exp.min(60) as i64
}
