//! Telegram Bot API adapter.
//!
//! One call, one classification. The client never sleeps and never retries;
//! throttle waits and thread-fallback policy belong to the dispatcher so
//! that per-channel ordering is preserved.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Wait applied when Telegram throttles without advertising a duration.
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classified result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Success,
    /// 429 with the server-advertised wait.
    Throttled { retry_after: u64 },
    /// The requested message thread does not exist in the chat.
    UnknownThread,
    /// Anything else, including transport failures. Not retryable.
    Terminal { description: String },
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: Client,
    send_message_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Result<Self, reqwest::Error> {
        TelegramClient::with_api_base(DEFAULT_API_BASE, bot_token)
    }

    /// Custom API base, used by tests to point at a local mock server.
    pub fn with_api_base(api_base: &str, bot_token: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(TelegramClient {
            http,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                api_base.trim_end_matches('/'),
                bot_token
            ),
        })
    }

    /// Send one message and classify the response.
    pub async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        text: &str,
        parse_mode: Option<&str>,
    ) -> PostOutcome {
        let request = SendMessageRequest {
            chat_id,
            message_thread_id: thread_id,
            text,
            parse_mode,
            disable_web_page_preview: true,
        };

        let response = match self.http.post(&self.send_message_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                return PostOutcome::Terminal {
                    description: format!("transport: {e}"),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return PostOutcome::Success;
        }

        let body: ApiResponse = response.json().await.unwrap_or(ApiResponse {
            description: None,
            parameters: None,
        });

        if status.as_u16() == 429 {
            let retry_after = body
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return PostOutcome::Throttled { retry_after };
        }

        let description = body
            .description
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        if status.is_client_error()
            && description.to_lowercase().contains("message thread not found")
        {
            return PostOutcome::UnknownThread;
        }

        PostOutcome::Terminal { description }
    }
}
