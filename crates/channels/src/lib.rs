//! Channel Client implementations and outbound status delivery.
//!
//! `HttpChannelClient` talks to the messaging network's REST API;
//! `SimulatedChannel` is an in-memory stand-in used by tests and dry runs.

pub mod classifier;
pub mod http;
pub mod simulated;
pub mod webhook;

pub use classifier::KeywordReplyClassifier;
pub use http::HttpChannelClient;
pub use simulated::SimulatedChannel;
pub use webhook::WebhookStatusSink;
