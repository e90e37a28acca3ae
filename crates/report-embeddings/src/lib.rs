//! # report-embeddings
//!
//! Client for the remote inference service that turns report text into
//! embedding vectors.
//!
//! The client surfaces every failure to its caller; bounded retries live in
//! the workflow's retry policy.

pub mod client;
pub mod error;

pub use client::{EmbeddingService, RemoteEmbeddingClient, RemoteEmbeddingConfig};
pub use error::EmbeddingError;
