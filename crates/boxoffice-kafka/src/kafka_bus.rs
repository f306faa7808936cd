//! Kafka implementation of the `MessageBus` port.
//!
//! Mapping:
//! - exchange → Kafka topic of the same name
//! - routing key → `routing_key` record header; binding patterns are applied
//!   on the consumer side
//! - queue → consumer group id
//! - record key → the `aggregate_id` header, so one reservation's events stay
//!   ordered on one partition
//!
//! Offsets are committed manually. `ack` commits past the record; a
//! requeueing `nack` re-publishes the record with a bumped delivery count and
//! then commits. Records that match no binding are skipped without a commit,
//! and the next settled delivery moves the group past them. Commits are
//! cumulative per partition, so deliveries must be settled in order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boxoffice_core::bus::{
    AGGREGATE_ID_HEADER, Acknowledger, Delivery, DeliveryStream, Message, MessageBus,
};
use boxoffice_core::error::DomainError;
use boxoffice_messaging::topic_matches;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;

/// Record header carrying the routing key.
pub const ROUTING_KEY_HEADER: &str = "routing_key";

/// Record header counting earlier deliveries of a re-published record.
pub const DELIVERY_COUNT_HEADER: &str = "delivery_count";

const DELIVERY_BUFFER: usize = 64;

fn kafka_error(context: &str, e: &KafkaError) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {e}"))
}

/// Connection settings for [`KafkaMessageBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaBusConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Producer send timeout.
    pub send_timeout: Duration,
    /// Where a consumer group with no committed offset starts reading.
    ///
    /// `earliest` lets a queue receive records published before its group
    /// first joined.
    pub auto_offset_reset: String,
}

impl KafkaBusConfig {
    /// Settings for `brokers` with a 5 second send timeout, reading new
    /// groups from the earliest offset.
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            send_timeout: Duration::from_secs(5),
            auto_offset_reset: "earliest".to_owned(),
        }
    }
}

/// Key that decides a record's partition.
fn partition_key(message: &Message) -> &str {
    message
        .header(AGGREGATE_ID_HEADER)
        .unwrap_or(&message.routing_key)
}

/// Builds the record headers for `message`; `previous_deliveries` is 0 for a
/// first publish.
fn encode_headers(message: &Message, previous_deliveries: u32) -> OwnedHeaders {
    let headers = message
        .headers
        .iter()
        .filter(|(name, _)| {
            name.as_str() != ROUTING_KEY_HEADER && name.as_str() != DELIVERY_COUNT_HEADER
        })
        .fold(
            OwnedHeaders::new_with_capacity(message.headers.len() + 2),
            |headers, (name, value)| {
                headers.insert(Header {
                    key: name.as_str(),
                    value: Some(value.as_str()),
                })
            },
        )
        .insert(Header {
            key: ROUTING_KEY_HEADER,
            value: Some(message.routing_key.as_str()),
        });
    if previous_deliveries == 0 {
        return headers;
    }
    let count = previous_deliveries.to_string();
    headers.insert(Header {
        key: DELIVERY_COUNT_HEADER,
        value: Some(count.as_str()),
    })
}

/// Rebuilds a bus message from a record, with the delivery count of this
/// delivery.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the routing key is missing or a
/// header is malformed.
fn decode_record<H: Headers>(
    headers: Option<&H>,
    payload: Option<&[u8]>,
) -> Result<(Message, u32), DomainError> {
    let mut routing_key = None;
    let mut previous_deliveries: u32 = 0;
    let mut fields = BTreeMap::new();

    for header in headers.into_iter().flat_map(|headers| headers.iter()) {
        let Some(raw) = header.value else {
            continue;
        };
        let value = std::str::from_utf8(raw).map_err(|e| {
            DomainError::Infrastructure(format!("header {} is not UTF-8: {e}", header.key))
        })?;
        match header.key {
            ROUTING_KEY_HEADER => routing_key = Some(value.to_owned()),
            DELIVERY_COUNT_HEADER => {
                previous_deliveries = value.parse().map_err(|e| {
                    DomainError::Infrastructure(format!(
                        "invalid {DELIVERY_COUNT_HEADER} header {value:?}: {e}"
                    ))
                })?;
            }
            name => {
                fields.insert(name.to_owned(), value.to_owned());
            }
        }
    }

    let routing_key = routing_key.ok_or_else(|| {
        DomainError::Infrastructure(format!("record has no {ROUTING_KEY_HEADER} header"))
    })?;
    let message = Message {
        routing_key,
        headers: fields,
        payload: payload.unwrap_or_default().to_vec(),
    };
    Ok((message, previous_deliveries.saturating_add(1)))
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    message: &Message,
    previous_deliveries: u32,
    timeout: Duration,
) -> Result<(), DomainError> {
    let record = FutureRecord::to(topic)
        .key(partition_key(message))
        .payload(message.payload.as_slice())
        .headers(encode_headers(message, previous_deliveries));
    producer
        .send(record, Timeout::After(timeout))
        .await
        .map_err(|(e, _)| kafka_error(&format!("failed to publish to {topic}"), &e))?;
    Ok(())
}

/// Message bus on a Kafka-compatible broker.
///
/// Cloning shares the producer; every subscription gets its own consumer.
#[derive(Clone)]
pub struct KafkaMessageBus {
    producer: FutureProducer,
    config: KafkaBusConfig,
}

impl std::fmt::Debug for KafkaMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KafkaMessageBus {
    /// Creates the bus and its producer. Brokers are contacted lazily.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the producer configuration is
    /// rejected.
    pub fn new(config: KafkaBusConfig) -> Result<Self, DomainError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| kafka_error("failed to create Kafka producer", &e))?;

        tracing::info!(brokers = %config.brokers, "Kafka message bus created");
        Ok(Self { producer, config })
    }
}

/// Settles one record by committing its offset.
struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    send_timeout: Duration,
    topic: String,
    partition: i32,
    offset: i64,
    message: Message,
    delivery_count: u32,
}

impl std::fmt::Debug for KafkaAcknowledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaAcknowledger")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl KafkaAcknowledger {
    fn commit(&self) -> Result<(), DomainError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| kafka_error("invalid offset", &e))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| kafka_error("failed to commit offset", &e))
    }
}

#[async_trait]
impl Acknowledger for KafkaAcknowledger {
    async fn ack(&self) -> Result<(), DomainError> {
        self.commit()
    }

    async fn nack(&self, requeue: bool) -> Result<(), DomainError> {
        if requeue {
            send(
                &self.producer,
                &self.topic,
                &self.message,
                self.delivery_count,
                self.send_timeout,
            )
            .await?;
        }
        self.commit()
    }
}

/// Reads records for one subscription and forwards matching ones until the
/// subscriber drops its stream.
async fn forward_records(
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    send_timeout: Duration,
    binding: String,
    sender: mpsc::Sender<Result<Delivery, DomainError>>,
) {
    let mut records = consumer.stream();
    while let Some(record) = records.next().await {
        let item = match record {
            Err(e) => Err(kafka_error("failed to receive record", &e)),
            Ok(record) => {
                let (message, delivery_count) =
                    match decode_record(record.headers(), record.payload()) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            tracing::warn!(
                                topic = record.topic(),
                                partition = record.partition(),
                                offset = record.offset(),
                                error = %e,
                                "skipping undecodable record"
                            );
                            continue;
                        }
                    };
                if !topic_matches(&binding, &message.routing_key) {
                    tracing::trace!(routing_key = %message.routing_key, "record skipped by binding");
                    continue;
                }
                let acknowledger = KafkaAcknowledger {
                    consumer: consumer.clone(),
                    producer: producer.clone(),
                    send_timeout,
                    topic: record.topic().to_owned(),
                    partition: record.partition(),
                    offset: record.offset(),
                    message: message.clone(),
                    delivery_count,
                };
                Ok(Delivery::new(message, delivery_count, Box::new(acknowledger)))
            }
        };
        if sender.send(item).await.is_err() {
            break;
        }
    }
    tracing::debug!("Kafka consumer task exiting");
}

#[async_trait]
impl MessageBus for KafkaMessageBus {
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), DomainError> {
        send(&self.producer, exchange, &message, 0, self.config.send_timeout).await?;
        tracing::debug!(exchange, routing_key = %message.routing_key, "message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        exchange: &str,
        binding: &str,
    ) -> Result<DeliveryStream, DomainError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", queue)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| kafka_error("failed to create Kafka consumer", &e))?;
        consumer
            .subscribe(&[exchange])
            .map_err(|e| kafka_error(&format!("failed to subscribe to {exchange}"), &e))?;

        tracing::info!(queue, exchange, binding, "consumer attached");

        let (sender, receiver) = mpsc::channel(DELIVERY_BUFFER);
        tokio::spawn(forward_records(
            Arc::new(consumer),
            self.producer.clone(),
            self.config.send_timeout,
            binding.to_owned(),
            sender,
        ));

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            let item = receiver.recv().await?;
            Some((item, receiver))
        });
        Ok(Box::pin(stream))
    }
}
