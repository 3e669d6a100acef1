//! Email parsing: MBOX streaming, header decoding, MIME structure, and body classification.

pub mod classify;
pub mod header;
pub mod mbox;
pub mod mime;
pub mod transfer;
