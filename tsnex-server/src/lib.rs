//! TSNEX line-protocol server
//!
//! Reads one JSON command per line and answers with one JSON frame per line.
//! Snapshot frames from a running session are interleaved with the replies on
//! the same outbound stream.

pub mod datasets;
pub mod error;
pub mod handlers;
pub mod service;

pub use datasets::DatasetRegistry;
pub use error::ServiceError;
pub use service::TsnexService;
