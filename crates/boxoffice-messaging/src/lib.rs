//! Box Office messaging — transport-side implementations of the bus port.
//!
//! - [`InMemoryMessageBus`]: an in-process topic exchange with durable,
//!   at-least-once queues.
//! - [`BusEventPublisher`]: publishes domain events onto any [`MessageBus`].
//!
//! [`MessageBus`]: boxoffice_core::bus::MessageBus

pub mod in_memory_bus;
pub mod publisher;
pub mod topic;

pub use in_memory_bus::InMemoryMessageBus;
pub use publisher::BusEventPublisher;
pub use topic::topic_matches;
