//! Channel Client contract: the outbound messaging network the engine
//! sends through and queries for replies and connection status.
//!
//! Implementations live in `outreach-channels`; the sequencer only sees
//! these traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
}

/// A message on the conversation between the sending account and a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub is_inbound: bool,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Network status between the sending account and a recipient. A pending
/// invitation is reported as `accepted: false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub accepted: bool,
}

/// When a provider-side sending limit lifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReset {
    After(Duration),
    /// Weekly invitation quotas reset at the start of the week.
    NextWeek,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Network failure, timeout or 5xx on send. Retryable.
    #[error("transient send error: {0}")]
    TransientSend(String),

    /// Invalid recipient, suspended account and similar. Not retryable.
    #[error("permanent send error: {0}")]
    PermanentSend(String),

    /// Failure while listing messages or reading connection status.
    #[error("transient query error: {0}")]
    TransientQuery(String),

    /// The provider refused the send because the account hit its quota.
    /// Nothing was delivered; the send waits for `reset` instead of
    /// spending retries.
    #[error("rate limited by provider: {reason}")]
    RateLimited { reason: String, reset: LimitReset },
}

impl ChannelError {
    /// Worth another attempt within the same retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::TransientSend(_) | ChannelError::TransientQuery(_))
    }
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Sends `text` to `recipient` from `account_id`. Two calls with the same
    /// `idempotency_token` must produce at most one delivered message.
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        text: &str,
        idempotency_token: &str,
    ) -> Result<SentMessage, ChannelError>;

    async fn list_messages_since(
        &self,
        account_id: &str,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ChannelError>;

    async fn connection_status(
        &self,
        account_id: &str,
        recipient: &str,
    ) -> Result<ConnectionStatus, ChannelError>;
}

/// Classification of an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyClass {
    Replied,
    Disengaged,
}

/// Decides whether an inbound message signals explicit disinterest.
pub trait ReplyClassifier: Send + Sync {
    fn classify(&self, message: &Message) -> ReplyClass;
}

/// Classifier that treats every reply as a plain reply.
pub struct PlainReplyClassifier;

impl ReplyClassifier for PlainReplyClassifier {
    fn classify(&self, _message: &Message) -> ReplyClass {
        ReplyClass::Replied
    }
}
