//! Core types for docuquery.

mod document;
mod extraction;
mod metadata;

pub use document::*;
pub use extraction::*;
pub use metadata::*;
