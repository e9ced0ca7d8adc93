//! Services module
//!
//! Coordinators that sequence the blob store and the metadata tables.

pub mod attachments;
pub mod imports;
pub mod integrity;

pub use attachments::AttachmentsService;
pub use imports::ImportsService;
pub use integrity::DriftReport;
