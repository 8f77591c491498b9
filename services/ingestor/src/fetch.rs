//! Single-feed HTTP fetch with outcome classification.
//!
//! The fetcher never retries and never sleeps; retry/backoff policy belongs
//! to the cycle loop, and skip policy to the governor. It only performs one
//! GET and classifies what came back.

use crate::config::ProxyConfig;
use reqwest::{Client, header};
use std::time::Duration;

/// Real-browser user agent used by default; markedly reduces gratuitous
/// 403s from feed CDNs.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Product user agent applied when the governor recommends a swap.
const ALTERNATE_USER_AGENT: &str = "RSS Media Bus/1.0";

const ACCEPT: &str = "application/rss+xml, application/xml, text/xml, */*";

/// Bodies shorter than this are not a parseable feed.
const MIN_BODY_BYTES: usize = 100;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classified result of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ok(Vec<u8>),
    NotFound,
    Forbidden,
    Http(u16),
    Timeout,
    Network(String),
    /// 2xx but the body is empty or too short to be a feed.
    Empty,
}

/// Which user agent to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAgentChoice {
    Browser,
    Alternate,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Fetcher {
    browser: Client,
    alternate: Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Fetcher::with_timeout(Duration::from_secs(30))
    }

    /// Custom total timeout; connect timeout stays a third of it (10 s at
    /// the default). Tests use short values.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Fetcher {
            browser: build_client(BROWSER_USER_AGENT, timeout, None)?,
            alternate: build_client(ALTERNATE_USER_AGENT, timeout, None)?,
            timeout,
        })
    }

    /// Perform one GET and classify the result. When `proxy` is given the
    /// request goes through it on a dedicated client; direct otherwise.
    pub async fn fetch(
        &self,
        url: &str,
        ua: UserAgentChoice,
        proxy: Option<&ProxyConfig>,
    ) -> FetchOutcome {
        let client = match proxy {
            Some(proxy) => {
                let agent = match ua {
                    UserAgentChoice::Browser => BROWSER_USER_AGENT,
                    UserAgentChoice::Alternate => ALTERNATE_USER_AGENT,
                };
                match build_client(agent, self.timeout, Some(proxy)) {
                    Ok(client) => client,
                    Err(e) => return FetchOutcome::Network(format!("proxy client: {e}")),
                }
            }
            None => match ua {
                UserAgentChoice::Browser => self.browser.clone(),
                UserAgentChoice::Alternate => self.alternate.clone(),
            },
        };

        let response = match client
            .get(url)
            .header(header::ACCEPT, ACCEPT)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return FetchOutcome::Timeout,
            Err(e) => return FetchOutcome::Network(e.to_string()),
        };

        match response.status().as_u16() {
            404 => FetchOutcome::NotFound,
            403 => FetchOutcome::Forbidden,
            status if status >= 400 => FetchOutcome::Http(status),
            _ => match response.bytes().await {
                Err(e) if e.is_timeout() => FetchOutcome::Timeout,
                Err(e) => FetchOutcome::Network(e.to_string()),
                Ok(body) if body.len() < MIN_BODY_BYTES => FetchOutcome::Empty,
                Ok(body) => FetchOutcome::Ok(body.to_vec()),
            },
        }
    }
}

fn build_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&ProxyConfig>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout / 3)
        .tcp_keepalive(Duration::from_secs(30));
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(&proxy.url)?);
    }
    builder.build()
}
