//! Durable queue plumbing
//!
//! The ingestion queue is declared with a dead-letter exchange so messages
//! rejected without requeue land on a dead-letter queue instead of being
//! lost. [`MessageQueue`] is the seam to the broker client; [`MemoryBroker`]
//! is an in-process broker with the same acknowledgement and dead-letter
//! semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

/// Default name of the ingestion queue
pub const DEFAULT_QUEUE_NAME: &str = "cocoon.logs";

/// Exchange rejected messages are routed to
pub const DEAD_LETTER_EXCHANGE: &str = "dead_letter_exchange";

/// Queue bound to the dead-letter exchange
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

/// Routing key binding the dead-letter queue
pub const DEAD_LETTER_ROUTING_KEY: &str = "error";

/// Queue argument naming the dead-letter exchange
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Queue argument naming the dead-letter routing key
pub const ARG_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Declarations needed before consuming from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Ingestion queue name
    pub queue: String,
    /// Arguments the ingestion queue is declared with
    pub arguments: BTreeMap<String, String>,
    /// Dead-letter exchange name
    pub dead_letter_exchange: String,
    /// Dead-letter queue name
    pub dead_letter_queue: String,
    /// Key binding the dead-letter queue to its exchange
    pub dead_letter_routing_key: String,
}

impl QueueTopology {
    /// Standard topology for an ingestion queue
    pub fn for_queue(queue: impl Into<String>) -> Self {
        let mut arguments = BTreeMap::new();
        arguments.insert(ARG_DEAD_LETTER_EXCHANGE.to_string(), DEAD_LETTER_EXCHANGE.to_string());
        // Without this, rejected messages keep the queue name as routing
        // key and never match the dead-letter binding
        arguments.insert(ARG_DEAD_LETTER_ROUTING_KEY.to_string(), DEAD_LETTER_ROUTING_KEY.to_string());

        Self {
            queue: queue.into(),
            arguments,
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_string(),
            dead_letter_queue: DEAD_LETTER_QUEUE.to_string(),
            dead_letter_routing_key: DEAD_LETTER_ROUTING_KEY.to_string(),
        }
    }
}

/// A message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag used to acknowledge this delivery
    pub tag: u64,
    /// Message body
    pub payload: Vec<u8>,
    /// How many times the message has been delivered, this one included
    pub attempt: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Client side of a durable message broker
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Declare the queue, its dead-letter exchange and dead-letter queue
    async fn declare(&self, topology: &QueueTopology) -> Result<()>;

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Wait for the next delivery; `None` once the broker is closed.
    ///
    /// Dropping the returned future before it completes must not lose a
    /// message.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Positively acknowledge a delivery
    async fn ack(&self, tag: u64) -> Result<()>;

    /// Negatively acknowledge a delivery, either putting it back on its
    /// queue or rejecting it to the dead-letter exchange
    async fn nack(&self, tag: u64, requeue: bool) -> Result<()>;
}

#[derive(Debug)]
struct Message {
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    /// (exchange, routing key) for rejected messages
    dead_letter: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    bindings: HashMap<(String, String), String>,
    unacked: HashMap<u64, (String, Message)>,
    closed: bool,
}

/// In-process broker
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    notify: Notify,
}

impl MemoryBroker {
    /// Create a broker with no queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting on a queue
    pub fn ready(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Number of deliveries not yet acknowledged
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Copy of the payloads waiting on a queue
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Stop handing out deliveries; pending receivers get `None`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn dead_letter(state: &mut BrokerState, source: &str, message: Message) {
        let target = state
            .queues
            .get(source)
            .and_then(|q| q.dead_letter.clone())
            .and_then(|binding| state.bindings.get(&binding).cloned());

        let queue = match target {
            Some(name) => state.queues.get_mut(&name),
            None => None,
        };
        match queue {
            Some(queue) => queue.ready.push_back(Message {
                payload: message.payload,
                attempt: 0,
            }),
            None => debug!(queue = source, "Discarded rejected message with no dead-letter route"),
        }
    }
}

#[async_trait]
impl MessageQueue for MemoryBroker {
    async fn declare(&self, topology: &QueueTopology) -> Result<()> {
        let mut state = self.state.lock();

        state.queues.entry(topology.dead_letter_queue.clone()).or_default();
        state.bindings.insert(
            (
                topology.dead_letter_exchange.clone(),
                topology.dead_letter_routing_key.clone(),
            ),
            topology.dead_letter_queue.clone(),
        );

        let dead_letter = topology.arguments.get(ARG_DEAD_LETTER_EXCHANGE).map(|exchange| {
            let key = topology
                .arguments
                .get(ARG_DEAD_LETTER_ROUTING_KEY)
                .cloned()
                .unwrap_or_else(|| topology.queue.clone());
            (exchange.clone(), key)
        });
        state.queues.entry(topology.queue.clone()).or_default().dead_letter = dead_letter;

        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        {
            let mut state = self.state.lock();
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| Error::queue(format!("Queue {} is not declared", queue)))?;
            queue_state.ready.push_back(Message { payload, attempt: 0 });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Ok(None);
                }

                let message = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| Error::queue(format!("Queue {} is not declared", queue)))?
                    .ready
                    .pop_front();

                if let Some(mut message) = message {
                    message.attempt += 1;
                    let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                    let delivery = Delivery {
                        tag,
                        payload: message.payload.clone(),
                        attempt: message.attempt,
                    };
                    state.unacked.insert(tag, (queue.to_string(), message));
                    return Ok(Some(delivery));
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        self.state
            .lock()
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| Error::queue(format!("Unknown delivery tag {}", tag)))
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            let (queue, message) = state
                .unacked
                .remove(&tag)
                .ok_or_else(|| Error::queue(format!("Unknown delivery tag {}", tag)))?;

            if requeue {
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.ready.push_front(message);
                }
            } else {
                Self::dead_letter(&mut state, &queue, message);
            }
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn broker() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.declare(&QueueTopology::for_queue(DEFAULT_QUEUE_NAME)).await.unwrap();
        broker
    }

    #[test]
    fn test_topology_arguments() {
        let topology = QueueTopology::for_queue("logs");
        assert_eq!(topology.arguments[ARG_DEAD_LETTER_EXCHANGE], "dead_letter_exchange");
        assert_eq!(topology.dead_letter_queue, "dead_letter_queue");
        assert_eq!(topology.dead_letter_routing_key, "error");
    }

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let broker = broker().await;
        broker.publish(DEFAULT_QUEUE_NAME, b"one".to_vec()).await.unwrap();

        let delivery = broker.receive(DEFAULT_QUEUE_NAME).await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"one");
        assert_eq!(delivery.attempt, 1);
        assert_eq!(broker.unacked(), 1);

        broker.ack(delivery.tag).await.unwrap();
        assert_eq!(broker.unacked(), 0);
        assert!(broker.ack(delivery.tag).await.is_err());
    }

    #[tokio::test]
    async fn test_requeue_counts_attempts() {
        let broker = broker().await;
        broker.publish(DEFAULT_QUEUE_NAME, b"again".to_vec()).await.unwrap();

        let first = broker.receive(DEFAULT_QUEUE_NAME).await.unwrap().unwrap();
        broker.nack(first.tag, true).await.unwrap();
        let second = broker.receive(DEFAULT_QUEUE_NAME).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert!(second.is_redelivery());
        assert_ne!(first.tag, second.tag);
    }

    #[tokio::test]
    async fn test_reject_routes_to_dead_letter_queue() {
        let broker = broker().await;
        broker.publish(DEFAULT_QUEUE_NAME, b"poison".to_vec()).await.unwrap();

        let delivery = broker.receive(DEFAULT_QUEUE_NAME).await.unwrap().unwrap();
        broker.nack(delivery.tag, false).await.unwrap();

        assert_eq!(broker.ready(DEFAULT_QUEUE_NAME), 0);
        assert_eq!(broker.peek(DEAD_LETTER_QUEUE), vec![b"poison".to_vec()]);
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("nowhere", b"x".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let broker = Arc::new(broker().await);

        let receiver = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive(DEFAULT_QUEUE_NAME).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish(DEFAULT_QUEUE_NAME, b"late".to_vec()).await.unwrap();

        let delivery = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_releases_receivers() {
        let broker = Arc::new(broker().await);
        let receiver = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive(DEFAULT_QUEUE_NAME).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();
        assert!(receiver.await.unwrap().unwrap().is_none());
    }
}
