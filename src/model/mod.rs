//! Core data model: message records, addresses, attachments and statistics.

pub mod address;
pub mod attachment;
pub mod message;
pub mod stats;
