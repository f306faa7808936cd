//! Box Office — Kafka-compatible broker adapter for the message bus port.
//!
//! [`KafkaMessageBus`] maps the topic-exchange model onto Kafka: an exchange
//! is a Kafka topic, a queue is a consumer group, and a binding pattern
//! filters records by their routing-key header.

pub mod kafka_bus;

pub use kafka_bus::{KafkaBusConfig, KafkaMessageBus};
