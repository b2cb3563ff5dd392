//! S3 object store client.
//!
//! This crate provides:
//! - The `ObjectStore` port used by the worker
//! - Byte-level download/upload against an S3 (or S3-compatible) bucket
//! - Classification of failures into permanent and transient

pub mod client;
pub mod error;

pub use client::{ObjectStore, S3Client, StorageConfig};
pub use error::{StorageError, StorageResult};
