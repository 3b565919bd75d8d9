//! Structured run records
//!
//! Every pipeline run, successful or not, ends in exactly one record. The CLI
//! prints them verbatim as JSON.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

use super::error::PipelineError;
use crate::attest::VerifyResult;
use crate::error_code::ErrorCode;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRecord {
    pub event: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_ref: Option<String>,
    pub error_code: ErrorCode,
    pub errors: Vec<String>,
    pub trace_id: Uuid,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyResult>,
    /// Event-specific fields (subject digest, winner, ...)
    #[serde(flatten)]
    pub detail: BTreeMap<String, Value>,
}

impl PipelineRecord {
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_envelope(mut self, envelope_ref: impl Into<String>) -> Self {
        self.envelope_ref = Some(envelope_ref.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event":"{}","ok":false,"error_code":"IO_ERROR","errors":["{e}"]}}"#, self.event)
        })
    }
}

/// Clock and trace id for one run
#[derive(Debug)]
pub struct Trace {
    event: &'static str,
    trace_id: Uuid,
    started: Instant,
}

impl Trace {
    pub fn start(event: &'static str) -> Self {
        Self {
            event,
            trace_id: Uuid::now_v7(),
            started: Instant::now(),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn record(&self, error_code: ErrorCode, errors: Vec<String>) -> PipelineRecord {
        PipelineRecord {
            event: self.event,
            ok: error_code.is_ok(),
            file: None,
            envelope_ref: None,
            error_code,
            errors,
            trace_id: self.trace_id,
            duration_ms: self.started.elapsed().as_millis() as u64,
            verify: None,
            detail: BTreeMap::new(),
        }
    }

    pub fn success(&self) -> PipelineRecord {
        self.record(ErrorCode::Ok, Vec::new())
    }

    pub fn failure(&self, error: &PipelineError) -> PipelineRecord {
        self.record(error.error_code(), error.messages())
    }

    /// Record carrying a verification result; `ok` follows the result
    pub fn verified(&self, result: VerifyResult) -> PipelineRecord {
        let mut record = self.record(result.error_code, result.errors.clone());
        record.ok = result.ok();
        record.verify = Some(result);
        record
    }
}
