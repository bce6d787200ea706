//! REST channel client for the hosted messaging API. Credentials come from
//! `ChannelConfig` at construction; nothing here reads the environment.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use outreach_core::channels::{
    ChannelClient, ChannelError, ConnectionStatus, LimitReset, Message, SentMessage,
};
use outreach_core::config::ChannelConfig;

const API_KEY_HEADER: &str = "X-API-KEY";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
/// Back-off for a quota rejection that names no reset time.
const DEFAULT_LIMIT_BACKOFF: Duration = Duration::from_secs(3600);

pub struct HttpChannelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct SendBody<'a> {
    account_id: &'a str,
    recipient: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct MessageList {
    items: Vec<Message>,
}

impl HttpChannelClient {
    pub fn new(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChannelError::PermanentSend(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }
}

/// A 429, or any rejection mentioning a rate or weekly limit, is a quota
/// hit. 5xx is worth another attempt; any other rejection is final.
fn classify_send_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ChannelError {
    let detail = format!("{status}: {body}");
    let lowered = body.to_lowercase();
    let quota = lowered.contains("rate limit") || lowered.contains("weekly limit");
    if status == StatusCode::TOO_MANY_REQUESTS || (status.is_client_error() && quota) {
        let reset = if lowered.contains("week") {
            LimitReset::NextWeek
        } else {
            LimitReset::After(retry_after.unwrap_or(DEFAULT_LIMIT_BACKOFF))
        };
        return ChannelError::RateLimited {
            reason: detail,
            reset,
        };
    }
    if status.is_server_error() {
        ChannelError::TransientSend(detail)
    } else {
        ChannelError::PermanentSend(detail)
    }
}

/// `Retry-After` in its delay-seconds form.
fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn query_error(e: reqwest::Error) -> ChannelError {
    ChannelError::TransientQuery(e.to_string())
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        text: &str,
        idempotency_token: &str,
    ) -> Result<SentMessage, ChannelError> {
        let response = self
            .http
            .post(self.url("messages"))
            .header(API_KEY_HEADER, &self.api_key)
            .header(IDEMPOTENCY_HEADER, idempotency_token)
            .json(&SendBody {
                account_id,
                recipient,
                text,
            })
            .send()
            .await
            .map_err(|e| ChannelError::TransientSend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let body = response.text().await.unwrap_or_default();
            return Err(classify_send_status(status, retry_after, &body));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::TransientSend(format!("malformed send response: {e}")))?;
        debug!(account_id, message_id = %parsed.message_id, "Channel send accepted");
        Ok(SentMessage {
            message_id: parsed.message_id,
        })
    }

    async fn list_messages_since(
        &self,
        account_id: &str,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ChannelError> {
        let since = since.to_rfc3339();
        let response = self
            .http
            .get(self.url("messages"))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("account_id", account_id),
                ("recipient", recipient),
                ("since", since.as_str()),
            ])
            .send()
            .await
            .map_err(query_error)?
            .error_for_status()
            .map_err(query_error)?;

        let list: MessageList = response.json().await.map_err(query_error)?;
        Ok(list.items)
    }

    async fn connection_status(
        &self,
        account_id: &str,
        recipient: &str,
    ) -> Result<ConnectionStatus, ChannelError> {
        let response = self
            .http
            .get(self.url("connections/status"))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("account_id", account_id), ("recipient", recipient)])
            .send()
            .await
            .map_err(query_error)?
            .error_for_status()
            .map_err(query_error)?;

        response.json().await.map_err(query_error)
    }
}
