//! Pre-send gate: decides whether a follow-up may go out.

use std::sync::Arc;

use outreach_core::channels::{ChannelClient, ReplyClass, ReplyClassifier};
use outreach_core::types::ProspectSequenceState;

use crate::types::Step;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    Proceed,
    StopReplied,
    StopDisengaged,
    StopNotConnected,
    /// A check could not be completed. The engine proceeds anyway.
    Inconclusive(String),
}

impl GateResult {
    pub fn label(&self) -> &'static str {
        match self {
            GateResult::Proceed => "proceed",
            GateResult::StopReplied => "stop_replied",
            GateResult::StopDisengaged => "stop_disengaged",
            GateResult::StopNotConnected => "stop_not_connected",
            GateResult::Inconclusive(_) => "inconclusive",
        }
    }
}

pub struct GateEvaluator {
    channel: Arc<dyn ChannelClient>,
    classifier: Arc<dyn ReplyClassifier>,
}

impl GateEvaluator {
    pub fn new(channel: Arc<dyn ChannelClient>, classifier: Arc<dyn ReplyClassifier>) -> Self {
        Self { channel, classifier }
    }

    /// Connection first: a definite "not accepted" ends the check without a
    /// message query. Any inbound message newer than the last send stops the
    /// sequence, even when the connection check errored.
    pub async fn evaluate_gate(&self, state: &ProspectSequenceState, step: &Step) -> GateResult {
        let account = state.channel_account_id.as_str();
        let recipient = state.recipient_identifier.as_str();
        let mut failures = Vec::new();

        if step.gate.check_connection_accepted {
            match self.channel.connection_status(account, recipient).await {
                Ok(status) if !status.accepted => return GateResult::StopNotConnected,
                Ok(_) => {}
                Err(e) => failures.push(format!("connection status: {e}")),
            }
        }

        if step.gate.check_reply {
            let since = state.last_sent_at.unwrap_or(state.enrolled_at);
            match self.channel.list_messages_since(account, recipient, since).await {
                Ok(messages) => {
                    let mut replied = false;
                    for message in messages.iter().filter(|m| m.is_inbound && m.sent_at > since) {
                        match self.classifier.classify(message) {
                            ReplyClass::Disengaged => return GateResult::StopDisengaged,
                            ReplyClass::Replied => replied = true,
                        }
                    }
                    if replied {
                        return GateResult::StopReplied;
                    }
                }
                Err(e) => failures.push(format!("message history: {e}")),
            }
        }

        if failures.is_empty() {
            GateResult::Proceed
        } else {
            GateResult::Inconclusive(failures.join("; "))
        }
    }
}
