//! Domain models for indication extraction and recovery analysis.

mod concept;
mod condition;
mod document;
mod evidence;
mod mapping;
mod recovery;

pub use concept::*;
pub use condition::*;
pub use document::*;
pub use evidence::*;
pub use mapping::*;
pub use recovery::*;
