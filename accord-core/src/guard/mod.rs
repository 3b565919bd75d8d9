//! Scope guard
//!
//! Mediates every filesystem write and outbound call for one actor. A
//! request is resolved, then allowed or denied; denials are fail-closed and
//! happen before any side effect.

pub mod capability;
pub mod error;
pub mod pattern;
pub mod resolve;
pub mod writer;

pub use capability::{
    validate_charter, CapabilityDescriptor, Charter, CharterReport, GovernanceRole,
};
pub use error::ScopeError;
pub use pattern::ScopePattern;
pub use resolve::{resolve_strict, resolve_within, CanonicalPath, PathViolation};
pub use writer::{write_atomic, GuardedWriter};
