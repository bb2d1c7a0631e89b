//! Image ingestion for a product catalog
//!
//! Product records are created with a list of source image URLs. Each image
//! is announced on a message queue; workers fetch it, re-encode it, upload
//! the derivative to object storage and write the public URL back into the
//! matching slot of the record. Reads are served through a TTL cache.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod image;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod storage;
pub mod worker;

pub use error::{Error, Result};
