//! logvault library
//!
//! Stores review attachments and uploaded log files as blobs on disk with
//! their metadata in SQLite, keeping the two in agreement without a shared
//! transaction.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;

pub use app::AppState;
pub use config::StoreConfig;
pub use error::{AppError, ErrorKind, Result};
