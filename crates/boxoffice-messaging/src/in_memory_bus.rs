//! In-process implementation of the `MessageBus` port.
//!
//! Exchanges are implicit: a binding names an exchange, a topic pattern and a
//! queue. Queues are declared once and then buffer every matching message
//! until it is consumed, whether or not a consumer is attached yet. A message
//! that matches no binding is dropped. Each queue has at most one consumer.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use boxoffice_core::bus::{Acknowledger, Delivery, DeliveryStream, Message, MessageBus};
use boxoffice_core::error::DomainError;
use tokio::sync::mpsc;

use crate::topic::topic_matches;

#[derive(Debug, Clone)]
struct Envelope {
    message: Message,
    /// Deliveries so far; 0 while the message has never been handed out.
    delivery_count: u32,
}

#[derive(Debug)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Debug)]
struct Queue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Option<mpsc::UnboundedReceiver<Envelope>>,
}

#[derive(Debug, Default)]
struct BusState {
    bindings: Vec<Binding>,
    queues: HashMap<String, Queue>,
}

/// In-process topic bus with durable queues and at-least-once delivery.
///
/// Cloning yields another handle onto the same bus.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryMessageBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BusState>, DomainError> {
        self.state
            .lock()
            .map_err(|_| DomainError::Infrastructure("message bus state poisoned".into()))
    }

    /// Declares `queue` (if needed) and binds it to `exchange` with `pattern`.
    ///
    /// Declaring before consuming makes the queue collect messages published
    /// in the meantime. Declaring the same binding twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the bus state is poisoned.
    pub fn declare_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        state.queues.entry(queue.to_owned()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Queue {
                sender,
                receiver: Some(receiver),
            }
        });
        let already_bound = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.pattern == pattern);
        if !already_bound {
            state.bindings.push(Binding {
                exchange: exchange.to_owned(),
                pattern: pattern.to_owned(),
                queue: queue.to_owned(),
            });
        }
        Ok(())
    }
}

/// Settles one in-memory delivery. A requeueing nack puts the message back
/// at the tail of its queue.
#[derive(Debug)]
struct InMemoryAcknowledger {
    sender: mpsc::UnboundedSender<Envelope>,
    envelope: Envelope,
}

#[async_trait]
impl Acknowledger for InMemoryAcknowledger {
    async fn ack(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), DomainError> {
        if !requeue {
            return Ok(());
        }
        self.sender
            .send(self.envelope.clone())
            .map_err(|_| DomainError::Infrastructure("queue closed while requeueing".into()))
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), DomainError> {
        let state = self.lock()?;
        let targets: BTreeSet<&str> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, &message.routing_key))
            .map(|b| b.queue.as_str())
            .collect();

        if targets.is_empty() {
            tracing::debug!(
                exchange,
                routing_key = %message.routing_key,
                "no binding matched, message dropped"
            );
            return Ok(());
        }

        for queue in targets {
            if let Some(q) = state.queues.get(queue) {
                q.sender
                    .send(Envelope {
                        message: message.clone(),
                        delivery_count: 0,
                    })
                    .map_err(|_| {
                        DomainError::Infrastructure(format!("queue {queue} is closed"))
                    })?;
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        exchange: &str,
        binding: &str,
    ) -> Result<DeliveryStream, DomainError> {
        self.declare_queue(queue, exchange, binding)?;

        let (receiver, sender) = {
            let mut state = self.lock()?;
            let q = state.queues.get_mut(queue).ok_or_else(|| {
                DomainError::Infrastructure(format!("queue {queue} was not declared"))
            })?;
            let receiver = q.receiver.take().ok_or_else(|| {
                DomainError::Infrastructure(format!("queue {queue} already has a consumer"))
            })?;
            (receiver, q.sender.clone())
        };

        tracing::info!(queue, exchange, binding, "consumer attached");

        let stream = futures::stream::unfold((receiver, sender), |(mut receiver, sender)| async move {
            let mut envelope = receiver.recv().await?;
            envelope.delivery_count += 1;
            let delivery = Delivery::new(
                envelope.message.clone(),
                envelope.delivery_count,
                Box::new(InMemoryAcknowledger {
                    sender: sender.clone(),
                    envelope,
                }),
            );
            Some((Ok(delivery), (receiver, sender)))
        });

        Ok(Box::pin(stream))
    }
}
