//! `mboxarchive`: convert MBOX archives into sanitized offline HTML.
//!
//! The library streams an MBOX file message by message, decodes each MIME
//! structure, stores attachments, sanitizes HTML bodies and yields one
//! [`model::message::MessageRecord`] at a time through [`pipeline::Pipeline`].

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod sanitize;
pub mod store;
