use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use ingestor::fetch::{FetchOutcome, Fetcher, UserAgentChoice};
use std::net::SocketAddr;
use std::time::Duration;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn feed_body() -> String {
    let filler = "x".repeat(200);
    format!("<rss version=\"2.0\"><channel><title>T</title><!-- {filler} --></channel></rss>")
}

#[tokio::test]
async fn success_returns_the_body_bytes() {
    let expected = feed_body();
    let body = expected.clone();
    let addr = serve(Router::new().route(
        "/rss",
        get(move || {
            let body = body.clone();
            async move { body }
        }),
    ))
    .await;

    let fetcher = Fetcher::with_timeout(Duration::from_secs(5)).unwrap();
    let outcome = fetcher
        .fetch(&format!("http://{addr}/rss"), UserAgentChoice::Browser, None)
        .await;
    assert_eq!(outcome, FetchOutcome::Ok(expected.into_bytes()));
}

#[tokio::test]
async fn short_success_bodies_classify_as_empty() {
    let addr = serve(Router::new().route("/rss", get(|| async { "tiny" }))).await;

    let fetcher = Fetcher::with_timeout(Duration::from_secs(5)).unwrap();
    let outcome = fetcher
        .fetch(&format!("http://{addr}/rss"), UserAgentChoice::Browser, None)
        .await;
    assert_eq!(outcome, FetchOutcome::Empty);
}

#[tokio::test]
async fn http_statuses_map_to_their_outcomes() {
    let app = Router::new()
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/denied", get(|| async { StatusCode::FORBIDDEN }))
        .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/throttled", get(|| async { StatusCode::TOO_MANY_REQUESTS }));
    let addr = serve(app).await;
    let fetcher = Fetcher::with_timeout(Duration::from_secs(5)).unwrap();

    let fetch = |path: &'static str| {
        let fetcher = fetcher.clone();
        async move {
            fetcher
                .fetch(
                    &format!("http://{addr}{path}"),
                    UserAgentChoice::Browser,
                    None,
                )
                .await
        }
    };

    assert_eq!(fetch("/missing").await, FetchOutcome::NotFound);
    assert_eq!(fetch("/denied").await, FetchOutcome::Forbidden);
    assert_eq!(fetch("/boom").await, FetchOutcome::Http(500));
    assert_eq!(fetch("/throttled").await, FetchOutcome::Http(429));
}

#[tokio::test]
async fn slow_origins_classify_as_timeout() {
    let addr = serve(Router::new().route(
        "/rss",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    ))
    .await;

    let fetcher = Fetcher::with_timeout(Duration::from_millis(300)).unwrap();
    let outcome = fetcher
        .fetch(&format!("http://{addr}/rss"), UserAgentChoice::Browser, None)
        .await;
    assert_eq!(outcome, FetchOutcome::Timeout);
}

#[tokio::test]
async fn refused_connections_classify_as_network_error() {
    // Bind to learn a free port, then drop the listener.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = Fetcher::with_timeout(Duration::from_secs(2)).unwrap();
    let outcome = fetcher
        .fetch(&format!("http://{addr}/rss"), UserAgentChoice::Browser, None)
        .await;
    assert!(matches!(outcome, FetchOutcome::Network(_)), "{outcome:?}");
}

#[tokio::test]
async fn user_agent_choice_changes_the_presented_agent() {
    let app = Router::new().route(
        "/rss",
        get(|headers: HeaderMap| async move {
            let ua = headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned();
            format!("{ua} {}", "pad".repeat(50))
        }),
    );
    let addr = serve(app).await;
    let url = format!("http://{addr}/rss");
    let fetcher = Fetcher::with_timeout(Duration::from_secs(5)).unwrap();

    let FetchOutcome::Ok(body) = fetcher.fetch(&url, UserAgentChoice::Browser, None).await else {
        panic!("expected a body");
    };
    assert!(String::from_utf8_lossy(&body).contains("Chrome"));

    let FetchOutcome::Ok(body) = fetcher.fetch(&url, UserAgentChoice::Alternate, None).await
    else {
        panic!("expected a body");
    };
    assert!(String::from_utf8_lossy(&body).contains("RSS Media Bus"));
}
