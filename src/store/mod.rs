//! On-disk storage of extracted attachments.

pub mod attachment;
