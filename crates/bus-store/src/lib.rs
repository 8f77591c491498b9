//! Durable SQLite store shared by the ingestor (writer) and notifier (reader).
//!
//! # Schema
//! - `feeds`: source metadata keyed by the apex-domain source id.
//! - `articles`: canonical records, unique on `link`, indexed on `ingested_at`
//!   (the dispatcher watermark column).
//!
//! # Connection discipline
//! One short-lived connection per operation. WAL is set once at open and is
//! persistent; `busy_timeout` is applied on every connection. Cross-process
//! contention (`SQLITE_BUSY`) is retried a bounded number of times before the
//! error is surfaced.
//!
//! # Timestamps
//! Stored as fixed-width UTC text (`%Y-%m-%dT%H:%M:%S%.3fZ`) so that
//! lexicographic comparison in SQL is chronological comparison.

use bus_model::{Article, StoredArticle, source_id_for_url};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Optional article columns added after the first schema version.
/// `open` backfills any of these missing from an older on-disk file.
const OPTIONAL_ARTICLE_COLUMNS: &[(&str, &str)] = &[
    ("guid", "TEXT"),
    ("category", "TEXT"),
    ("tags", "TEXT"),
    ("media_attachments", "TEXT"),
    ("modified_at", "TEXT"),
    ("news_id", "TEXT"),
    ("content_type", "TEXT"),
    ("newsline", "TEXT"),
];

const BUSY_RETRIES: u32 = 3;
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored timestamp '{0}'")]
    InvalidTimestamp(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of `record_article`: whether a new row was created, and the row id
/// of the (new or pre-existing) article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: bool,
    pub id: i64,
}

/// Handle to the article store. Cheap to clone; every operation opens its
/// own connection against the path.
#[derive(Debug, Clone)]
pub struct ArticleStore {
    db_path: PathBuf,
}

impl ArticleStore {
    /// Open (or create) the store, applying schema and the additive column
    /// migration for files written by older versions.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let store = ArticleStore {
            db_path: path.to_owned(),
        };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        migrate_articles_table(&conn)?;
        Ok(store)
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    /// Insert the feed if its derived source id is not yet known, returning
    /// the source id either way. Never errors on duplicates.
    pub fn register_feed(
        &self,
        url: &str,
        title: Option<&str>,
        group: Option<&str>,
    ) -> StoreResult<String> {
        let feed_id = source_id_for_url(url);
        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO feeds (id, url, title, group_tag, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![feed_id, url, title, group, fmt_ts(Utc::now())],
            )?;
            Ok(())
        })?;
        Ok(feed_id)
    }

    /// Update mutable feed metadata after a successful parse. Also marks the
    /// feed's first parse as done.
    pub fn update_feed(
        &self,
        feed_id: &str,
        title: Option<&str>,
        last_updated: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_busy_retry(|conn| {
            match title {
                Some(title) => conn.execute(
                    "UPDATE feeds
                     SET title = ?2, last_updated = ?3, first_parse_done = 1
                     WHERE id = ?1",
                    params![feed_id, title, fmt_ts(last_updated)],
                )?,
                None => conn.execute(
                    "UPDATE feeds SET last_updated = ?2, first_parse_done = 1 WHERE id = ?1",
                    params![feed_id, fmt_ts(last_updated)],
                )?,
            };
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Articles
    // -----------------------------------------------------------------------

    /// Insert an article iff it is new.
    ///
    /// Identity is the link when present (globally unique), otherwise
    /// `(feed_id, guid)`. A duplicate returns `inserted = false` with the
    /// existing row id; it is not an error.
    pub fn record_article(&self, feed_id: &str, article: &Article) -> StoreResult<InsertOutcome> {
        self.with_busy_retry(|conn| {
            if article.link.is_none() {
                if let Some(guid) = article.guid.as_deref() {
                    let existing: Option<i64> = conn
                        .query_row(
                            "SELECT id FROM articles WHERE feed_id = ?1 AND guid = ?2",
                            params![feed_id, guid],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(id) = existing {
                        return Ok(InsertOutcome {
                            inserted: false,
                            id,
                        });
                    }
                }
            }

            let tags_json = if article.tags.is_empty() {
                None
            } else {
                serde_json::to_string(&article.tags).ok()
            };
            let media_json = if article.media.is_empty() {
                None
            } else {
                serde_json::to_string(&article.media).ok()
            };

            let changed = conn.execute(
                "INSERT OR IGNORE INTO articles
                     (feed_id, title, link, guid, description, content, author,
                      published_at, modified_at, category, tags, media_attachments,
                      news_id, content_type, newsline, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    feed_id,
                    article.title,
                    article.link,
                    article.guid,
                    article.description,
                    article.content,
                    article.author,
                    fmt_ts(article.published_at),
                    article.modified_at.map(fmt_ts),
                    article.category,
                    tags_json,
                    media_json,
                    article.news_id,
                    article.content_type,
                    article.newsline,
                    fmt_ts(Utc::now()),
                ],
            )?;

            if changed == 1 {
                return Ok(InsertOutcome {
                    inserted: true,
                    id: conn.last_insert_rowid(),
                });
            }

            // Link conflict: hand back the row that won.
            let id: i64 = conn.query_row(
                "SELECT id FROM articles WHERE link = ?1",
                params![article.link],
                |row| row.get(0),
            )?;
            Ok(InsertOutcome {
                inserted: false,
                id,
            })
        })
    }

    /// Articles ingested strictly after `cutoff`, in delivery order
    /// (published first, ingest time as the tiebreak).
    pub fn articles_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<StoredArticle>> {
        self.with_busy_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, feed_id, title, link, guid, description, content, author,
                        published_at, modified_at, category, tags, media_attachments,
                        news_id, content_type, newsline, ingested_at
                 FROM articles
                 WHERE ingested_at > ?1
                 ORDER BY published_at ASC, ingested_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![fmt_ts(cutoff), limit], map_row)?;
            let mut articles = Vec::new();
            for row in rows {
                articles.push(finish_row(row?)?);
            }
            Ok(articles)
        })
    }

    /// Delete articles ingested more than `older_than_days` days ago.
    /// Returns the number of rows removed.
    pub fn prune(&self, older_than_days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        self.with_busy_retry(|conn| {
            let deleted = conn.execute(
                "DELETE FROM articles WHERE ingested_at < ?1",
                params![fmt_ts(cutoff)],
            )?;
            Ok(deleted)
        })
    }

    // -----------------------------------------------------------------------
    // Busy retry
    // -----------------------------------------------------------------------

    fn with_busy_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            let conn = self.connect()?;
            match op(&conn) {
                Err(StoreError::Sqlite(e)) if is_busy(&e) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "store busy, retrying");
                    std::thread::sleep(BUSY_BACKOFF);
                }
                other => return other,
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Raw column values before timestamp/JSON decoding. Split out so rusqlite
/// errors and decoding errors keep their own types.
struct RawRow {
    id: i64,
    feed_id: String,
    title: String,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    content: Option<String>,
    author: Option<String>,
    published_at: String,
    modified_at: Option<String>,
    category: Option<String>,
    tags: Option<String>,
    media: Option<String>,
    news_id: Option<String>,
    content_type: Option<String>,
    newsline: Option<String>,
    ingested_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<RawRow, rusqlite::Error> {
    Ok(RawRow {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        guid: row.get(4)?,
        description: row.get(5)?,
        content: row.get(6)?,
        author: row.get(7)?,
        published_at: row.get(8)?,
        modified_at: row.get(9)?,
        category: row.get(10)?,
        tags: row.get(11)?,
        media: row.get(12)?,
        news_id: row.get(13)?,
        content_type: row.get(14)?,
        newsline: row.get(15)?,
        ingested_at: row.get(16)?,
    })
}

fn finish_row(raw: RawRow) -> StoreResult<StoredArticle> {
    let modified_at = match raw.modified_at {
        Some(s) => Some(parse_ts(&s)?),
        None => None,
    };
    Ok(StoredArticle {
        id: raw.id,
        feed_id: raw.feed_id,
        ingested_at: parse_ts(&raw.ingested_at)?,
        article: Article {
            title: raw.title,
            link: raw.link,
            guid: raw.guid,
            description: raw.description,
            content: raw.content,
            author: raw.author,
            published_at: parse_ts(&raw.published_at)?,
            modified_at,
            category: raw.category,
            tags: decode_json_list(raw.tags.as_deref()),
            media: decode_json_list(raw.media.as_deref()),
            news_id: raw.news_id,
            content_type: raw.content_type,
            newsline: raw.newsline,
        },
    })
}

fn decode_json_list<T: serde::de::DeserializeOwned>(json: Option<&str>) -> Vec<T> {
    json.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// Add any optional article column missing from an older on-disk file.
fn migrate_articles_table(conn: &Connection) -> StoreResult<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(articles)")?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    for (name, col_type) in OPTIONAL_ARTICLE_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE articles ADD COLUMN {name} {col_type}"))?;
            tracing::info!(column = name, "added missing article column");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Timestamp text
// ---------------------------------------------------------------------------

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_is_fixed_width_and_ordered() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(5);
        let (a, b) = (fmt_ts(early), fmt_ts(late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn timestamp_text_round_trips() {
        let now = Utc::now();
        let back = parse_ts(&fmt_ts(now)).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
