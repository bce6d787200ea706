//! Keyword reply classification. Flags replies that ask to stop.

use outreach_core::channels::{Message, ReplyClass, ReplyClassifier};

const DISENGAGED_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "remove me",
    "unsubscribe",
    "not looking",
    "stop",
    "do not contact",
    "don't contact",
];

pub struct KeywordReplyClassifier {
    phrases: Vec<String>,
}

impl KeywordReplyClassifier {
    pub fn new() -> Self {
        Self::with_phrases(DISENGAGED_PHRASES.iter().map(|p| p.to_string()))
    }

    pub fn with_phrases(phrases: impl IntoIterator<Item = String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| normalize(&p)).collect(),
        }
    }
}

impl Default for KeywordReplyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases and collapses everything but letters, digits, apostrophes and
/// hyphens into single spaces, padded so phrases match on word boundaries.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    format!(" {} ", words.join(" "))
}

impl ReplyClassifier for KeywordReplyClassifier {
    fn classify(&self, message: &Message) -> ReplyClass {
        let text = normalize(&message.text);
        if self.phrases.iter().any(|p| text.contains(p.as_str())) {
            ReplyClass::Disengaged
        } else {
            ReplyClass::Replied
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn inbound(text: &str) -> Message {
        Message {
            is_inbound: true,
            text: text.to_string(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_explicit_disinterest_is_disengaged() {
        let classifier = KeywordReplyClassifier::new();
        assert_eq!(classifier.classify(&inbound("Not interested, thanks.")), ReplyClass::Disengaged);
        assert_eq!(classifier.classify(&inbound("Please REMOVE me from this list")), ReplyClass::Disengaged);
        assert_eq!(classifier.classify(&inbound("STOP")), ReplyClass::Disengaged);
    }

    #[test]
    fn test_other_replies_are_plain() {
        let classifier = KeywordReplyClassifier::new();
        assert_eq!(classifier.classify(&inbound("Sounds interesting, tell me more")), ReplyClass::Replied);
        assert_eq!(classifier.classify(&inbound("We run a non-stop shop")), ReplyClass::Replied);
        assert_eq!(classifier.classify(&inbound("I'm interested in pricing")), ReplyClass::Replied);
    }
}
