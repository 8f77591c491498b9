use chrono::{Duration, Utc};
use ingestor::governor::{Alternative, ErrorGovernor, ErrorKind};

const FEED: &str = "https://news.example/rss";

fn record_n(governor: &mut ErrorGovernor, n: u32, kind: ErrorKind, status: Option<u16>) {
    for _ in 0..n {
        governor.record_error(FEED, "Example", kind, status, "boom");
    }
}

#[test]
fn feeds_below_the_threshold_are_never_skipped() {
    let mut governor = ErrorGovernor::new();
    record_n(&mut governor, 4, ErrorKind::Timeout, None);
    let (skip, _) = governor.should_skip(FEED);
    assert!(!skip);
}

#[test]
fn circuit_opens_after_five_errors_for_at_least_thirty_two_minutes() {
    let mut governor = ErrorGovernor::new();
    record_n(&mut governor, 5, ErrorKind::HttpError, Some(500));

    let now = Utc::now();
    let (skip, reason) = governor.should_skip_at(FEED, now);
    assert!(skip);
    assert!(reason.contains("5 errors"), "reason was: {reason}");

    // Still inside the 32-minute window.
    let (skip, _) = governor.should_skip_at(FEED, now + Duration::minutes(31));
    assert!(skip);

    // Past it: the feed is attempted again.
    let (skip, _) = governor.should_skip_at(FEED, now + Duration::minutes(33));
    assert!(!skip);
}

#[test]
fn cooldown_is_capped_at_sixty_minutes() {
    let mut governor = ErrorGovernor::new();
    record_n(&mut governor, 9, ErrorKind::NetworkError, None);

    let now = Utc::now();
    let (skip, _) = governor.should_skip_at(FEED, now + Duration::minutes(59));
    assert!(skip);
    let (skip, _) = governor.should_skip_at(FEED, now + Duration::minutes(61));
    assert!(!skip);
}

#[test]
fn a_single_success_resets_the_circuit_immediately() {
    let mut governor = ErrorGovernor::new();
    record_n(&mut governor, 6, ErrorKind::Timeout, None);
    let (skip, _) = governor.should_skip(FEED);
    assert!(skip);

    governor.reset(FEED);
    let (skip, _) = governor.should_skip(FEED);
    assert!(!skip);
    assert_eq!(governor.statistics().feeds_with_errors, 0);
}

#[test]
fn forbidden_escalation_goes_user_agent_then_proxy_then_both() {
    let mut governor = ErrorGovernor::new();

    // Cycle 1: first 403.
    governor.record_error(FEED, "Example", ErrorKind::Forbidden, Some(403), "denied");
    assert_eq!(governor.recommend_alternative(FEED, 403), Alternative::UserAgent);

    // Cycle 2: still the user-agent swap.
    governor.record_error(FEED, "Example", ErrorKind::Forbidden, Some(403), "denied");
    assert_eq!(governor.recommend_alternative(FEED, 403), Alternative::UserAgent);

    // Cycles 3-4: proxy.
    governor.record_error(FEED, "Example", ErrorKind::Forbidden, Some(403), "denied");
    assert_eq!(governor.recommend_alternative(FEED, 403), Alternative::Proxy);
    governor.record_error(FEED, "Example", ErrorKind::Forbidden, Some(403), "denied");
    assert_eq!(governor.recommend_alternative(FEED, 403), Alternative::Proxy);

    // Cycle 5: both, and the circuit opens.
    governor.record_error(FEED, "Example", ErrorKind::Forbidden, Some(403), "denied");
    assert_eq!(governor.recommend_alternative(FEED, 403), Alternative::Both);
    let (skip, _) = governor.should_skip(FEED);
    assert!(skip);
}

#[test]
fn rate_limit_statuses_recommend_proxy_regardless_of_count() {
    let mut governor = ErrorGovernor::new();
    assert_eq!(governor.recommend_alternative(FEED, 429), Alternative::Proxy);
    assert_eq!(governor.recommend_alternative(FEED, 503), Alternative::Proxy);

    record_n(&mut governor, 6, ErrorKind::HttpError, Some(429));
    assert_eq!(governor.recommend_alternative(FEED, 429), Alternative::Proxy);
}

#[test]
fn other_statuses_recommend_nothing() {
    let mut governor = ErrorGovernor::new();
    governor.record_error(FEED, "Example", ErrorKind::HttpError, Some(500), "boom");
    assert_eq!(governor.recommend_alternative(FEED, 500), Alternative::None);
}

#[test]
fn history_keeps_the_last_ten_errors() {
    let mut governor = ErrorGovernor::new();
    record_n(&mut governor, 14, ErrorKind::Timeout, None);
    assert_eq!(governor.history(FEED).count(), 10);
    assert_eq!(governor.statistics().total_errors, 14);
}
