//! Terminology mapping for condition strings.
//!
//! Pipeline: Normalize → Exact / Contains / Token overlap → Code (direct or
//! by ascent) → Chapter

mod cache;
mod chapter;
mod hierarchy;
mod mapper;
mod normalizer;
mod store;

pub use cache::*;
pub use chapter::*;
pub use hierarchy::*;
pub use mapper::*;
pub use normalizer::*;
pub use store::*;
