//! DSSE envelope
//!
//! Envelopes are values: co-signing returns a new envelope and never
//! mutates the original.

use serde::{Deserialize, Serialize};

use super::error::AttestError;
use super::keys::AttestationKey;
use super::pae;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,

    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    #[serde(rename = "keyid", default)]
    pub key_id: String,

    #[serde(with = "base64_bytes")]
    pub sig: Vec<u8>,
}

/// Serde helper module for base64 encoding/decoding of byte vectors.
mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use base64::Engine;
        ENGINE.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        ENGINE.decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

impl Envelope {
    /// Signed bytes for this envelope
    pub fn pae(&self) -> Vec<u8> {
        pae(&self.payload_type, &self.payload)
    }

    /// A new envelope carrying one more signature over the same payload
    pub fn cosign(&self, key: &AttestationKey) -> Envelope {
        let signature = key.sign(&self.pae());
        let mut signatures = self.signatures.clone();
        signatures.push(EnvelopeSignature {
            key_id: key.key_id().to_string(),
            sig: signature.to_bytes().to_vec(),
        });
        Envelope {
            payload_type: self.payload_type.clone(),
            payload: self.payload.clone(),
            signatures,
        }
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(|s| s.key_id.as_str())
    }

    /// Subject name the payload claims, unverified. Only good for locating
    /// the artifact to verify against.
    pub fn claimed_subject(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.payload).ok()?;
        value
            .get("subject")?
            .get(0)?
            .get("name")?
            .as_str()
            .map(str::to_string)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, AttestError> {
        serde_json::from_slice(bytes).map_err(|e| {
            let err = AttestError::MalformedEnvelope {
                reason: e.to_string(),
            };
            err.log_if_security_critical();
            err
        })
    }

    /// Pretty JSON with a trailing newline, as written to disk
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, AttestError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
