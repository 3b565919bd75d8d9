//! Envelope construction

use tracing::debug;

use super::envelope::{Envelope, EnvelopeSignature};
use super::error::AttestError;
use super::keys::AttestationKey;
use super::{pae, PAYLOAD_TYPE};
use crate::canonical::Statement;

/// Sign the canonical encoding of `statement` with a single signature.
///
/// Ed25519 is deterministic, so identical inputs produce identical envelopes.
pub fn build(statement: &Statement, key: &AttestationKey) -> Result<Envelope, AttestError> {
    let payload = statement.to_canonical_bytes()?;
    let signature = key.sign(&pae(PAYLOAD_TYPE, &payload));

    debug!(
        key_id = %key.key_id(),
        payload_bytes = payload.len(),
        "built envelope"
    );
    Ok(Envelope {
        payload_type: PAYLOAD_TYPE.to_string(),
        payload,
        signatures: vec![EnvelopeSignature {
            key_id: key.key_id().to_string(),
            sig: signature.to_bytes().to_vec(),
        }],
    })
}
