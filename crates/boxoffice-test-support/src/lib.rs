//! Shared test doubles and utilities for the Box Office booking service.

mod clock;
mod publisher;

pub use clock::{FixedClock, ManualClock};
pub use publisher::{FailingEventPublisher, PublishedEvent, RecordingEventPublisher};
