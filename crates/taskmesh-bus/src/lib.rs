//! Publish/subscribe message bus abstraction.
//!
//! The orchestrator talks to worker agents exclusively through a topic-based bus
//! with MQTT semantics: `+`/`#` wildcard subscriptions and retained messages that
//! are replayed to every new matching subscriber.
//!
//! # Main types
//!
//! - [`MessageBus`]: Trait implemented by every bus transport.
//! - [`Subscription`]: Stream of messages matching one topic filter.
//! - [`InMemoryBus`]: In-process transport built on a tokio broadcast channel.

/// Core bus trait and message types.
pub mod bus;
/// Topic filter matching.
pub mod filter;
/// In-process broadcast transport.
pub mod memory;

pub use bus::{publish_json, BusMessage, MessageBus, Subscription};
pub use filter::{topic_matches, validate_filter};
pub use memory::InMemoryBus;
