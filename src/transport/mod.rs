//! In-process message bus the nodes publish and subscribe on
//!
//! The API follows the shape of a ROS client library: a [`Node`] creates
//! publishers and callback subscriptions on named topics. Each topic is a
//! tokio broadcast channel, and each subscription forwards messages to its
//! callback from its own task.
pub mod msgs;

use crate::error::{NavError, Result};
use log::{debug, warn};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Anything that can travel on the bus
pub trait Message: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Message for T {}

/// Default per-topic queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Registry of named topics
pub struct Bus {
    topics: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    queue_depth: usize,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Bus {
            topics: Mutex::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Get the sender for a topic, creating the topic on first use
    fn sender<T: Message>(&self, topic: &str) -> Result<broadcast::Sender<T>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| NavError::transport(topic, "topic table poisoned"))?;

        let entry = topics.entry(topic.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel::<T>(self.queue_depth);
            Box::new(sender)
        });

        entry
            .downcast_ref::<broadcast::Sender<T>>()
            .cloned()
            .ok_or_else(|| {
                NavError::transport(
                    topic,
                    format!("topic already carries a type other than {}", type_name::<T>()),
                )
            })
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// A named participant on the bus
pub struct Node {
    name: String,
    bus: Arc<Bus>,
}

impl Node {
    pub fn new(bus: &Arc<Bus>, name: &str) -> Arc<Self> {
        Arc::new(Node {
            name: name.to_string(),
            bus: Arc::clone(bus),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_publisher<T: Message>(&self, topic: &str) -> Result<Arc<Publisher<T>>> {
        let sender = self.bus.sender::<T>(topic)?;
        debug!("[{}] advertising {}", self.name, topic);
        Ok(Arc::new(Publisher {
            topic: topic.to_string(),
            sender,
        }))
    }

    /// Subscribe to a topic; the callback runs on a dedicated task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_subscription<T, F>(&self, topic: &str, callback: F) -> Result<Arc<Subscription>>
    where
        T: Message,
        F: Fn(T) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NavError::transport(topic, e.to_string()))?;
        let mut receiver = self.bus.sender::<T>(topic)?.subscribe();

        let node_name = self.name.clone();
        let topic_name = topic.to_string();
        let handle = runtime.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => callback(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[{}] dropped {} messages on {}", node_name, skipped, topic_name);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        debug!("[{}] subscribed to {}", self.name, topic);
        Ok(Arc::new(Subscription { handle }))
    }
}

/// Sending end of a topic
pub struct Publisher<T: Message> {
    topic: String,
    sender: broadcast::Sender<T>,
}

impl<T: Message> Publisher<T> {
    /// Publish a message, returning how many subscribers it reached.
    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, msg: T) -> usize {
        self.sender.send(msg).unwrap_or(0)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle to a running subscription; dropping it also stops delivery
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
