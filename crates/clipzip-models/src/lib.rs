//! Shared data models for the ClipToZip worker.
//!
//! This crate provides Serde-serializable types for:
//! - Videos and their processing status
//! - Video owners
//! - Inbound task messages
//! - Outcome notifications published when a video reaches a terminal state

pub mod error;
pub mod message;
pub mod notification;
pub mod user;
pub mod video;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use message::TaskMessage;
pub use notification::{NotificationStatus, OutcomeNotification};
pub use user::User;
pub use video::{Video, VideoId, VideoStatus};
