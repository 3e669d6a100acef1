//! Export of processed messages to an offline HTML archive.

pub mod html;
