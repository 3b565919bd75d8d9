//! Accord core library exports
//!
//! Provenance attestation, runtime scope guarding and ballot certification
//! for document stores maintained by autonomous agents.

pub mod attest;
pub mod canonical;
pub mod config;
pub mod error_code;
pub mod guard;
pub mod pipeline;
pub mod tally;

pub use error_code::ErrorCode;
