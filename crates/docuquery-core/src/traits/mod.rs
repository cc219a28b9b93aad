//! Seams to external collaborators.

mod cache;
mod extraction;
mod metadata;

pub use cache::*;
pub use extraction::*;
pub use metadata::*;
