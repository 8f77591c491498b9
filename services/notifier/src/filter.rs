//! Keyword filtering of articles against a recipient's filter spec.
//!
//! Matching is plain substring over the concatenation of the selected
//! fields, Unicode-lowercased unless the spec is case sensitive. `include`
//! counts distinct matched keywords against `min_matches`; `exclude` admits
//! only articles matching nothing.

use bus_model::{Article, FilterField, FilterMode, FilterSpec};

/// Outcome of applying a filter to one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub include: bool,
    /// Distinct keywords found, in spec order.
    pub matched: Vec<String>,
    /// Short stable description for the per-post log line.
    pub reason: String,
}

impl FilterDecision {
    /// The decision for an unfiltered channel.
    pub fn unfiltered() -> Self {
        FilterDecision {
            include: true,
            matched: Vec::new(),
            reason: "no filter".to_owned(),
        }
    }
}

/// Apply `spec` to `article`.
pub fn apply(article: &Article, spec: &FilterSpec) -> FilterDecision {
    if spec.mode == FilterMode::All {
        return FilterDecision {
            include: true,
            matched: Vec::new(),
            reason: "mode=all".to_owned(),
        };
    }

    let haystack = searched_text(article, &spec.fields);
    let haystack = if spec.case_sensitive {
        haystack
    } else {
        haystack.to_lowercase()
    };

    let mut matched = Vec::new();
    for keyword in &spec.keywords {
        let needle = if spec.case_sensitive {
            keyword.clone()
        } else {
            keyword.to_lowercase()
        };
        if !needle.is_empty() && haystack.contains(&needle) && !matched.contains(keyword) {
            matched.push(keyword.clone());
        }
    }

    match spec.mode {
        FilterMode::All => unreachable!("handled above"),
        FilterMode::Include => {
            let include = matched.len() >= spec.min_matches;
            let reason = if include {
                format!("include: matched {} of {} keywords", matched.len(), spec.keywords.len())
            } else {
                format!(
                    "include: {} matched, {} required",
                    matched.len(),
                    spec.min_matches
                )
            };
            FilterDecision {
                include,
                matched,
                reason,
            }
        }
        FilterMode::Exclude => {
            let include = matched.is_empty();
            let reason = if include {
                "exclude: no keywords matched".to_owned()
            } else {
                format!("exclude: matched [{}]", matched.join(", "))
            };
            FilterDecision {
                include,
                matched,
                reason,
            }
        }
    }
}

/// Concatenation of the selected fields with single-space separators.
fn searched_text(article: &Article, fields: &[FilterField]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for field in fields {
        let value = match field {
            FilterField::Title => Some(article.title.as_str()),
            FilterField::Description => article.description.as_deref(),
            FilterField::Content => article.content.as_deref(),
        };
        if let Some(value) = value {
            parts.push(value);
        }
    }
    parts.join(" ")
}
