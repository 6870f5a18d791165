//! Topic-based messaging with at-most-once, best-effort delivery.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{RwLock, broadcast};

use crate::{Result, StorageError};

/// A message on a named topic. The payload is opaque bytes, usually JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// A stream of messages delivered to one subscriber.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Publishes messages. Delivery is not guaranteed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Delivers messages from a set of topics.
pub trait MessageSource: Send + Sync {
    fn subscribe(&self, topics: &[&str]) -> Result<MessageStream>;
}

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Default)]
struct BusState {
    published: Vec<Message>,
    fail_on_publish: bool,
}

/// In-process bus built on a tokio broadcast channel.
///
/// Messages published while nobody is subscribed are dropped. A subscriber
/// that falls behind by more than the channel capacity loses the oldest
/// messages. Only a bus built with [`InMemoryMessageBus::recording`] keeps
/// a log of what was published.
#[derive(Clone)]
pub struct InMemoryMessageBus {
    sender: broadcast::Sender<Message>,
    state: Arc<RwLock<BusState>>,
    record: bool,
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Arc::new(RwLock::new(BusState::default())),
            record: false,
        }
    }

    /// A bus that also keeps every accepted message for inspection in tests.
    /// The log is never drained.
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    /// Makes `publish` fail until reset.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Returns every message accepted by `publish`, in order. Always empty
    /// unless the bus is recording.
    pub async fn published(&self) -> Vec<Message> {
        self.state.read().await.published.clone()
    }

    /// Returns accepted messages for one topic.
    pub async fn published_on(&self, topic: &str) -> Vec<Message> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryMessageBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let message = Message::new(topic, payload);
        {
            let mut state = self.state.write().await;
            if state.fail_on_publish {
                return Err(StorageError::Unavailable("message bus is unavailable".to_string()));
            }
            if self.record {
                state.published.push(message.clone());
            }
        }

        if self.sender.send(message).is_err() {
            tracing::debug!(topic, "no subscribers, message dropped");
        }
        Ok(())
    }
}

impl MessageSource for InMemoryMessageBus {
    fn subscribe(&self, topics: &[&str]) -> Result<MessageStream> {
        let receiver = self.sender.subscribe();
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| futures_util::future::ready(topics.contains(&message.topic)));

        Ok(Box::pin(stream))
    }
}
