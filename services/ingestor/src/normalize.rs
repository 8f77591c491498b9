//! Entry normalization: raw feed bytes → canonical articles.
//!
//! Parsing of the standard RSS/Atom model is delegated to `feed-rs`; the
//! vendor extension scan supplies everything the generic model drops. Both
//! run over the same bytes, so extension maps align with entries by index.

use crate::extensions::{ItemExtensions, scan_extensions};
use bus_model::{Article, MediaAttachment, MediaKind};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use regex::Regex;
use std::io::Cursor;
use std::sync::LazyLock;
use thiserror::Error;

/// Entries taken from the head of a document per fetch.
pub const MAX_ENTRIES_PER_FETCH: usize = 50;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static pattern compiles"));

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("feed parse: {0}")]
    Parse(String),
}

/// Result of normalizing one fetched document.
#[derive(Debug, Clone)]
pub struct NormalizedFeed {
    pub feed_title: Option<String>,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_age: chrono::Duration,
}

impl Normalizer {
    pub fn new(max_age_hours: u64) -> Self {
        Normalizer {
            max_age: chrono::Duration::hours(max_age_hours as i64),
        }
    }

    /// Parse and normalize a fetched document.
    ///
    /// Entries older than the age cutoff are dropped (first-time adoption of
    /// an old feed must not flood the store), as are entries without a
    /// title. A bad entry never fails the document.
    pub fn normalize(
        &self,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<NormalizedFeed, NormalizeError> {
        let feed = feed_rs::parser::parse(Cursor::new(bytes))
            .map_err(|e| NormalizeError::Parse(e.to_string()))?;

        let xml = String::from_utf8_lossy(bytes);
        let extensions = scan_extensions(&xml);

        let feed_title = feed
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty());

        let cutoff = now - self.max_age;
        let mut articles = Vec::new();
        for (i, entry) in feed
            .entries
            .into_iter()
            .take(MAX_ENTRIES_PER_FETCH)
            .enumerate()
        {
            let empty = ItemExtensions::default();
            let exts = extensions.get(i).unwrap_or(&empty);
            let Some(article) = extract_article(entry, exts, now) else {
                tracing::debug!(index = i, "entry rejected during normalization");
                continue;
            };
            if article.published_at < cutoff {
                tracing::debug!(title = %article.title, "entry older than age cutoff, dropped");
                continue;
            }
            articles.push(article);
        }

        Ok(NormalizedFeed {
            feed_title,
            articles,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-entry extraction
// ---------------------------------------------------------------------------

fn extract_article(entry: Entry, exts: &ItemExtensions, now: DateTime<Utc>) -> Option<Article> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_owned())
        .filter(|t| !t.is_empty())?;

    let link = preferred_link(&entry);
    let guid = (!entry.id.is_empty()).then(|| entry.id.clone());

    let description = entry
        .summary
        .as_ref()
        .map(|s| unescape_entities(&strip_markup(&s.content)))
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty());

    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .or_else(|| exts.first_text("full-text"))
        .map(|c| strip_markup(c).trim().to_owned())
        .filter(|c| !c.is_empty());

    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .filter(|a| !a.trim().is_empty());

    let published_at = entry.published.or(entry.updated).unwrap_or(now);

    let modified_at = exts
        .first_text("newsmodifdate")
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let category = entry
        .categories
        .first()
        .map(|c| c.term.clone())
        .filter(|c| !c.is_empty());

    let mut tags: Vec<String> = Vec::new();
    for term in entry
        .categories
        .iter()
        .map(|c| c.term.as_str())
        .chain(exts.texts("tag"))
    {
        let term = term.trim();
        if !term.is_empty() && !tags.iter().any(|t| t == term) {
            tags.push(term.to_owned());
        }
    }

    let media = collect_media(&entry, exts);

    Some(Article {
        title,
        link,
        guid,
        description,
        content,
        author,
        published_at,
        modified_at,
        category,
        tags,
        media,
        news_id: non_empty(exts.first_text("news_id")),
        content_type: non_empty(exts.first_text("type")),
        newsline: non_empty(exts.first_text("newsline")),
    })
}

/// Prefer the `alternate` link, falling back to the first one.
fn preferred_link(entry: &Entry) -> Option<String> {
    entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
}

fn collect_media(entry: &Entry, exts: &ItemExtensions) -> Vec<MediaAttachment> {
    let mut media = Vec::new();

    for object in &entry.media {
        for content in &object.content {
            let Some(url) = content.url.as_ref() else {
                continue;
            };
            media.push(MediaAttachment {
                kind: MediaKind::Enclosure,
                url: url.to_string(),
                mime_type: content
                    .content_type
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                length: content.size,
                source: None,
                copyright: None,
            });
        }
    }

    for image in exts.values("image") {
        let Some(url) = image.children.get("url") else {
            continue;
        };
        media.push(MediaAttachment {
            kind: MediaKind::Image,
            url: url.clone(),
            mime_type: image
                .children
                .get("type")
                .cloned()
                .unwrap_or_else(|| "image/jpeg".to_owned()),
            length: None,
            source: image.children.get("source").cloned(),
            copyright: image.children.get("copyright").cloned(),
        });
    }

    for video in exts.values("video") {
        let url = video
            .children
            .get("url")
            .or_else(|| video.attrs.get("url"));
        let Some(url) = url else {
            continue;
        };
        media.push(MediaAttachment {
            kind: MediaKind::Video,
            url: url.clone(),
            mime_type: video
                .children
                .get("type")
                .or_else(|| video.attrs.get("type"))
                .cloned()
                .unwrap_or_else(|| "video/mp4".to_owned()),
            length: None,
            source: None,
            copyright: video
                .children
                .get("copyright")
                .or_else(|| video.attrs.get("copyright"))
                .cloned(),
        });
    }

    media
}

// ---------------------------------------------------------------------------
// Text cleanup
// ---------------------------------------------------------------------------

fn strip_markup(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

fn unescape_entities(text: &str) -> String {
    htmlescape::decode_html(text).unwrap_or_else(|_| text.to_owned())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markup_removes_tags_only() {
        assert_eq!(
            strip_markup("<p>Hello <b>bold</b> world</p>"),
            "Hello bold world"
        );
    }

    #[test]
    fn unescape_decodes_named_and_numeric_entities() {
        assert_eq!(unescape_entities("a &mdash; b"), "a \u{2014} b");
        assert_eq!(unescape_entities("&#171;quoted&#187;"), "\u{ab}quoted\u{bb}");
    }

    #[test]
    fn unescape_keeps_broken_input_as_is() {
        assert_eq!(unescape_entities("50 &undefined; things"), "50 &undefined; things");
    }
}
