// bus-model: Canonical article and filter value types shared by the
// ingestor and notifier services.
//
// Everything here is a plain serde value; behavior lives in the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// Media attachments
// ---------------------------------------------------------------------------

/// Kind of a media attachment carried by an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Standard RSS/Atom enclosure.
    Enclosure,
    /// Vendor image extension (e.g. a news agency's namespaced image block).
    Image,
    /// Vendor video extension.
    Video,
}

/// One media attachment. Serialized as JSON into the article row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

/// A normalized entry, ready for insertion into the article store.
///
/// `title` is always non-empty — the normalizer rejects entries without one.
/// `link` may be absent for feeds that only assign guids; deduplication then
/// falls back to `(feed_id, guid)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Published → updated → ingest-time fallback, always UTC.
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    /// Vendor extension fields, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub news_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newsline: Option<String>,
}

/// An article as read back from the store, with its row id, owning feed
/// and the ingest timestamp the dispatcher watermarks against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArticle {
    pub id: i64,
    pub feed_id: String,
    pub article: Article,
    pub ingested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Keyword filters
// ---------------------------------------------------------------------------

/// Filter mode for a recipient's keyword filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Everything passes; keywords are ignored.
    All,
    /// Pass only articles matching at least `min_matches` keywords.
    Include,
    /// Pass only articles matching none of the keywords.
    Exclude,
}

/// Article fields a filter may search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Title,
    Description,
    Content,
}

fn default_fields() -> Vec<FilterField> {
    vec![FilterField::Title, FilterField::Description]
}

fn default_min_matches() -> usize {
    1
}

/// A keyword-filter specification, as configured per recipient channel or
/// per routed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub mode: FilterMode,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_fields")]
    pub fields: Vec<FilterField>,
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
}

impl FilterSpec {
    /// The pass-everything filter.
    pub fn all() -> Self {
        FilterSpec {
            mode: FilterMode::All,
            keywords: Vec::new(),
            case_sensitive: false,
            fields: default_fields(),
            min_matches: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Source-id derivation
// ---------------------------------------------------------------------------

/// Known multi-part feed hosts whose apex is not the last two labels.
const HOST_OVERRIDES: &[(&str, &str)] = &[
    ("static.feed.rbc.ru", "rbc.ru"),
    ("feeds.bbci.co.uk", "bbc.co.uk"),
    ("feeds.reuters.com", "reuters.com"),
];

/// Derive the stable short identifier for a feed URL.
///
/// Lowercased host, `www.` stripped, then either an override-table entry or
/// the last two host labels. Unparseable input is returned as-is so a bad
/// URL still yields a usable (if ugly) key.
pub fn source_id_for_url(feed_url: &str) -> String {
    let Ok(parsed) = Url::parse(feed_url) else {
        return feed_url.to_owned();
    };
    let Some(host) = parsed.host_str() else {
        return feed_url.to_owned();
    };

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_owned();

    for (from, to) in HOST_OVERRIDES {
        if host == *from {
            return (*to).to_owned();
        }
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_strips_www_and_takes_apex() {
        assert_eq!(source_id_for_url("https://www.lenta.ru/rss/news"), "lenta.ru");
        assert_eq!(source_id_for_url("https://tass.ru/rss/v2.xml"), "tass.ru");
    }

    #[test]
    fn source_id_takes_last_two_labels_of_subdomains() {
        assert_eq!(
            source_id_for_url("https://rssexport.rbc.ru/rbcnews/news/30/full.rss"),
            "rbc.ru"
        );
    }

    #[test]
    fn source_id_uses_override_table_for_known_cdn_hosts() {
        assert_eq!(
            source_id_for_url("http://static.feed.rbc.ru/rbc/logical/footer/news.rss"),
            "rbc.ru"
        );
        assert_eq!(
            source_id_for_url("https://feeds.bbci.co.uk/news/world/rss.xml"),
            "bbc.co.uk"
        );
        assert_eq!(
            source_id_for_url("https://feeds.reuters.com/reuters/topNews"),
            "reuters.com"
        );
    }

    #[test]
    fn source_id_falls_back_to_raw_input_for_garbage() {
        assert_eq!(source_id_for_url("not a url"), "not a url");
    }

    #[test]
    fn filter_spec_deserializes_with_defaults() {
        let spec: FilterSpec = toml_like(r#"{"mode": "include", "keywords": ["oil"]}"#);
        assert_eq!(spec.mode, FilterMode::Include);
        assert_eq!(spec.min_matches, 1);
        assert!(!spec.case_sensitive);
        assert_eq!(spec.fields, vec![FilterField::Title, FilterField::Description]);
    }

    #[test]
    fn media_attachment_round_trips_through_json() {
        let media = MediaAttachment {
            kind: MediaKind::Image,
            url: "https://pics.example/1.jpg".to_owned(),
            mime_type: "image/jpeg".to_owned(),
            length: None,
            source: Some("agency".to_owned()),
            copyright: None,
        };
        let json = serde_json::to_string(&media).unwrap();
        assert!(json.contains("\"kind\":\"image\""));
        let back: MediaAttachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, media);
    }

    fn toml_like(json: &str) -> FilterSpec {
        serde_json::from_str(json).unwrap()
    }
}
