//! Aggregate root abstraction.

use uuid::Uuid;

use crate::event::DomainEvent;

/// Trait for state-stored aggregate roots.
///
/// Transitions record domain events; the command side persists the aggregate
/// and then publishes whatever is returned by [`uncommitted_events`].
///
/// [`uncommitted_events`]: AggregateRoot::uncommitted_events
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate records.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the persisted version this instance was loaded at (0 when new).
    fn version(&self) -> i64;

    /// Returns events recorded by transitions since the aggregate was loaded.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after they have been published.
    fn clear_uncommitted_events(&mut self);
}
