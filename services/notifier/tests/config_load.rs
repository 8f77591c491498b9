use bus_model::FilterMode;
use notifier::config::{ConfigError, load_config_from_str};

const FULL: &str = r#"
schema_version = 1

[dispatch]
db_path = "/tmp/bus.sqlite3"
tick_secs = 10
scan_limit = 100

[tenants.newsdesk]
active = true

[tenants.newsdesk.channels.main]
bot_token = "123:ABC"
chat_id = -1001234567890
sources = ["rbc.ru", "tass.ru"]

[tenants.newsdesk.channels.main.topics]
"rbc.ru" = 11

[tenants.newsdesk.channels.main.topics."tass.ru"]
topic_id = 12

[tenants.newsdesk.channels.main.topics."tass.ru".filter]
mode = "include"
keywords = ["oil", "gas"]
min_matches = 2

[tenants.newsdesk.channels.main.filter]
mode = "exclude"
keywords = ["ads"]

[tenants.dormant]
active = false

[tenants.dormant.channels.ignored]
bot_token = "999:ZZZ"
chat_id = 1
"#;

#[test]
fn full_config_parses_both_topic_mapping_forms() {
    let cfg = load_config_from_str(FULL).expect("full config loads");

    assert_eq!(cfg.dispatch.tick_secs, 10);
    assert_eq!(cfg.dispatch.scan_limit, 100);
    assert_eq!(cfg.dispatch.db_path.to_str().unwrap(), "/tmp/bus.sqlite3");

    // The inactive tenant is dropped at load.
    assert_eq!(cfg.tenants.len(), 1);
    let tenant = &cfg.tenants[0];
    assert_eq!(tenant.id, "newsdesk");
    assert_eq!(tenant.channels.len(), 1);

    let channel = &tenant.channels[0];
    assert_eq!(channel.bot_token, "123:ABC");
    assert_eq!(channel.chat_id, -1_001_234_567_890);
    assert_eq!(channel.sources, vec!["rbc.ru", "tass.ru"]);

    let bare = channel
        .topics
        .iter()
        .find(|t| t.source_id == "rbc.ru")
        .unwrap();
    assert_eq!(bare.topic_id, 11);
    assert!(bare.filter.is_none());

    let detailed = channel
        .topics
        .iter()
        .find(|t| t.source_id == "tass.ru")
        .unwrap();
    assert_eq!(detailed.topic_id, 12);
    let filter = detailed.filter.as_ref().unwrap();
    assert_eq!(filter.mode, FilterMode::Include);
    assert_eq!(filter.min_matches, 2);

    let default_filter = channel.default_filter.as_ref().unwrap();
    assert_eq!(default_filter.mode, FilterMode::Exclude);
}

#[test]
fn dispatch_settings_default_when_absent() {
    let cfg = load_config_from_str(
        r#"
schema_version = 1

[tenants.t]
active = true

[tenants.t.channels.c]
bot_token = "1:A"
chat_id = 7
"#,
    )
    .unwrap();
    assert_eq!(cfg.dispatch.tick_secs, 30);
    assert_eq!(cfg.dispatch.scan_limit, 500);

    let channel = &cfg.tenants[0].channels[0];
    assert!(channel.sources.is_empty());
    assert!(channel.topics.is_empty());
    assert!(channel.default_filter.is_none());
}

#[test]
fn missing_credentials_are_rejected() {
    let err = load_config_from_str(
        r#"
schema_version = 1

[tenants.t]
active = true

[tenants.t.channels.c]
chat_id = 7
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::MissingField(f) if f.ends_with("bot_token")));
}

#[test]
fn detailed_topic_entry_requires_topic_id() {
    let err = load_config_from_str(
        r#"
schema_version = 1

[tenants.t]
active = true

[tenants.t.channels.c]
bot_token = "1:A"
chat_id = 7

[tenants.t.channels.c.topics."x.ru"]
[tenants.t.channels.c.topics."x.ru".filter]
mode = "all"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::MissingField(f) if f.ends_with("topic_id")));
}

#[test]
fn unknown_keys_are_ignored_for_additive_changes() {
    let cfg = load_config_from_str(
        r#"
schema_version = 1
future_flag = true

[tenants.t]
active = true
future_tenant_key = "x"

[tenants.t.channels.c]
bot_token = "1:A"
chat_id = 7
future_channel_key = 9
"#,
    )
    .unwrap();
    assert_eq!(cfg.tenants.len(), 1);
}

#[test]
fn schema_version_is_required() {
    let err = load_config_from_str("[tenants.t]\nactive = true\n").unwrap_err();
    assert!(matches!(err, ConfigError::MissingField(f) if f == "schema_version"));
}
