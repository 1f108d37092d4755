//! Inference collaborator for indication extraction.
//!
//! This crate defines the contract the evidence accumulator uses to talk to a
//! text-generation service: one call to *identify* candidate conditions in a
//! document, one call to *verify* a (substance, condition, document) triple and
//! obtain a confidence score. It also carries the prompts, the response
//! parsers, a deterministic scripted service for tests, and (with the `http`
//! feature) a client for a remote completion endpoint.

pub mod extraction;
pub mod mock;
pub mod prompts;
pub mod service;

#[cfg(feature = "http")]
pub mod http;

pub use extraction::*;
pub use mock::ScriptedInference;
pub use prompts::*;
pub use service::*;

#[cfg(feature = "http")]
pub use http::{HttpInference, HttpInferenceConfig};
