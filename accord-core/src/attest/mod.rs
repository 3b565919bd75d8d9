//! Attestation codec
//!
//! DSSE envelopes over canonical in-toto statements, signed with Ed25519.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod verify;

pub use codec::build;
pub use envelope::{Envelope, EnvelopeSignature};
pub use error::AttestError;
pub use keys::{keygen, load_verifying_key, AttestationKey, KeyPaths};
pub use verify::{verify, verify_materials, VerifyResult};

/// The only payload type this codec signs or accepts
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// DSSE pre-authentication encoding:
/// `"DSSEv1" SP len(type) SP type SP len(payload) SP payload`
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut out = Vec::with_capacity(16 + payload_type.len() + payload.len());
    for part in [
        b"DSSEv1".as_slice(),
        type_len.as_bytes(),
        payload_type.as_bytes(),
        payload_len.as_bytes(),
    ] {
        out.extend_from_slice(part);
        out.push(b' ');
    }
    out.extend_from_slice(payload);
    out
}
