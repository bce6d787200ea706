//! In-memory channel with idempotent sends, scripted failures and
//! per-recipient call tracking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use outreach_core::channels::{ChannelClient, ChannelError, ConnectionStatus, Message, SentMessage};

/// A message actually delivered by the simulated channel.
#[derive(Debug, Clone)]
pub struct SimulatedSend {
    pub account_id: String,
    pub recipient: String,
    pub text: String,
    pub idempotency_token: String,
    pub message_id: String,
}

type Conversation = (String, String);

pub struct SimulatedChannel {
    deliveries: Mutex<Vec<SimulatedSend>>,
    /// idempotency token -> message id
    tokens: DashMap<String, String>,
    conversations: DashMap<Conversation, Vec<Message>>,
    connections: DashMap<Conversation, bool>,
    default_accepted: AtomicBool,
    send_failures: Mutex<VecDeque<ChannelError>>,
    list_failures: Mutex<VecDeque<ChannelError>>,
    connection_failures: Mutex<VecDeque<ChannelError>>,
    /// Channel calls of any kind, per recipient.
    calls: DashMap<String, u64>,
    send_attempts: AtomicU64,
}

impl SimulatedChannel {
    /// Every recipient starts connected unless overridden.
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            tokens: DashMap::new(),
            conversations: DashMap::new(),
            connections: DashMap::new(),
            default_accepted: AtomicBool::new(true),
            send_failures: Mutex::new(VecDeque::new()),
            list_failures: Mutex::new(VecDeque::new()),
            connection_failures: Mutex::new(VecDeque::new()),
            calls: DashMap::new(),
            send_attempts: AtomicU64::new(0),
        }
    }

    pub fn set_default_accepted(&self, accepted: bool) {
        self.default_accepted.store(accepted, Ordering::SeqCst);
    }

    pub fn set_connection(&self, account_id: &str, recipient: &str, accepted: bool) {
        self.connections
            .insert((account_id.to_string(), recipient.to_string()), accepted);
    }

    /// Records a message from the recipient on the conversation.
    pub fn push_inbound(&self, account_id: &str, recipient: &str, text: &str, sent_at: DateTime<Utc>) {
        self.conversations
            .entry((account_id.to_string(), recipient.to_string()))
            .or_default()
            .push(Message {
                is_inbound: true,
                text: text.to_string(),
                sent_at,
            });
    }

    pub fn fail_next_sends(&self, error: ChannelError, count: usize) {
        self.send_failures
            .lock()
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_next_lists(&self, error: ChannelError, count: usize) {
        self.list_failures
            .lock()
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_next_connection_checks(&self, error: ChannelError, count: usize) {
        self.connection_failures
            .lock()
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn deliveries(&self) -> Vec<SimulatedSend> {
        self.deliveries.lock().clone()
    }

    pub fn deliveries_to(&self, recipient: &str) -> Vec<SimulatedSend> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn send_attempts(&self) -> u64 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, recipient: &str) -> u64 {
        self.calls.get(recipient).map(|c| *c).unwrap_or(0)
    }

    fn record_call(&self, recipient: &str) {
        *self.calls.entry(recipient.to_string()).or_insert(0) += 1;
    }
}

impl Default for SimulatedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelClient for SimulatedChannel {
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        text: &str,
        idempotency_token: &str,
    ) -> Result<SentMessage, ChannelError> {
        self.record_call(recipient);
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.send_failures.lock().pop_front() {
            return Err(err);
        }

        if let Some(existing) = self.tokens.get(idempotency_token) {
            return Ok(SentMessage {
                message_id: existing.clone(),
            });
        }

        let message_id = format!("msg-{}", Uuid::new_v4().simple());
        self.tokens
            .insert(idempotency_token.to_string(), message_id.clone());
        self.deliveries.lock().push(SimulatedSend {
            account_id: account_id.to_string(),
            recipient: recipient.to_string(),
            text: text.to_string(),
            idempotency_token: idempotency_token.to_string(),
            message_id: message_id.clone(),
        });
        self.conversations
            .entry((account_id.to_string(), recipient.to_string()))
            .or_default()
            .push(Message {
                is_inbound: false,
                text: text.to_string(),
                sent_at: Utc::now(),
            });

        Ok(SentMessage { message_id })
    }

    async fn list_messages_since(
        &self,
        account_id: &str,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ChannelError> {
        self.record_call(recipient);
        if let Some(err) = self.list_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .conversations
            .get(&(account_id.to_string(), recipient.to_string()))
            .map(|msgs| msgs.iter().filter(|m| m.sent_at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn connection_status(
        &self,
        account_id: &str,
        recipient: &str,
    ) -> Result<ConnectionStatus, ChannelError> {
        self.record_call(recipient);
        if let Some(err) = self.connection_failures.lock().pop_front() {
            return Err(err);
        }
        let accepted = self
            .connections
            .get(&(account_id.to_string(), recipient.to_string()))
            .map(|a| *a)
            .unwrap_or_else(|| self.default_accepted.load(Ordering::SeqCst));
        Ok(ConnectionStatus { accepted })
    }
}
