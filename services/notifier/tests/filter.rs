use bus_model::{Article, FilterField, FilterMode, FilterSpec};
use chrono::{TimeZone, Utc};
use notifier::filter::apply;

fn article(title: &str, description: &str, content: &str) -> Article {
    Article {
        title: title.to_owned(),
        link: Some("https://example.com/a".to_owned()),
        guid: None,
        description: (!description.is_empty()).then(|| description.to_owned()),
        content: (!content.is_empty()).then(|| content.to_owned()),
        author: None,
        published_at: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        modified_at: None,
        category: None,
        tags: vec![],
        media: vec![],
        news_id: None,
        content_type: None,
        newsline: None,
    }
}

fn spec(mode: FilterMode, keywords: &[&str]) -> FilterSpec {
    FilterSpec {
        mode,
        keywords: keywords.iter().map(|k| (*k).to_owned()).collect(),
        case_sensitive: false,
        fields: vec![FilterField::Title, FilterField::Description],
        min_matches: 1,
    }
}

#[test]
fn mode_all_includes_everything_with_no_matches() {
    let decision = apply(
        &article("Anything", "at all", ""),
        &spec(FilterMode::All, &["ignored"]),
    );
    assert!(decision.include);
    assert!(decision.matched.is_empty());
}

#[test]
fn include_matches_substrings_case_insensitively_in_cyrillic() {
    let filter = spec(FilterMode::Include, &["под"]);

    let hit = apply(&article("Под давлением", "рынки падают", ""), &filter);
    assert!(hit.include);
    assert_eq!(hit.matched, vec!["под"]);

    let miss = apply(&article("Спорт", "футбол", ""), &filter);
    assert!(!miss.include);

    let near_miss = apply(&article("Другое", "над полом", ""), &filter);
    assert!(!near_miss.include);
}

#[test]
fn include_counts_distinct_keywords_against_min_matches() {
    let mut filter = spec(FilterMode::Include, &["oil", "gas"]);
    filter.min_matches = 2;

    let both = apply(&article("Oil and gas report", "", ""), &filter);
    assert!(both.include);
    assert_eq!(both.matched, vec!["oil", "gas"]);

    let only_one = apply(&article("Oil oil oil everywhere", "", ""), &filter);
    assert!(!only_one.include, "repeats of one keyword are one match");
}

#[test]
fn exclude_admits_only_articles_matching_nothing() {
    let filter = spec(FilterMode::Exclude, &["spam", "casino"]);

    let clean = apply(&article("Weather tomorrow", "sunny", ""), &filter);
    assert!(clean.include);

    let spammy = apply(&article("Best casino deals", "", ""), &filter);
    assert!(!spammy.include);
    assert_eq!(spammy.matched, vec!["casino"]);
}

#[test]
fn searched_fields_restrict_where_keywords_are_looked_for() {
    let mut filter = spec(FilterMode::Include, &["hidden"]);
    let a = article("Title", "description", "the hidden body");

    // Default fields are title + description: no match in the body.
    assert!(!apply(&a, &filter).include);

    filter.fields = vec![FilterField::Content];
    assert!(apply(&a, &filter).include);
}

#[test]
fn case_sensitive_specs_do_not_lowercase() {
    let mut filter = spec(FilterMode::Include, &["NATO"]);
    filter.case_sensitive = true;

    assert!(apply(&article("NATO summit", "", ""), &filter).include);
    assert!(!apply(&article("nato summit", "", ""), &filter).include);
}

#[test]
fn matched_keywords_keep_spec_order() {
    let filter = spec(FilterMode::Include, &["gas", "oil"]);
    let decision = apply(&article("oil first, gas second", "", ""), &filter);
    assert_eq!(decision.matched, vec!["gas", "oil"]);
}
