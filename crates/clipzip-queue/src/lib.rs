//! Redis Streams task input and notification output.
//!
//! Tasks are read through a consumer group so every delivery stays pending
//! until it is explicitly acknowledged. Entries left pending by a crashed
//! consumer are reclaimed once they have been idle long enough.

pub mod error;
pub mod notifier;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use notifier::{NotificationPublisher, RedisNotifier};
pub use queue::{Delivery, QueueConfig, RedisTaskQueue, TaskQueue};
