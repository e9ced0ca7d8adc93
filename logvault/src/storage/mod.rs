//! Storage module
//!
//! Provides filesystem blob storage for attachment and import payloads.

pub mod blob_store;

pub use blob_store::{BlobReader, BlobStore, StagedBlob};
