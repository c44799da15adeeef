//! The embedded evaluation engine and its call boundary.
//!
//! [`Engine`] is the surface host bindings drive: an explicit, constructed
//! context object (no process-wide state) owning the snapshot store and the
//! evaluator. Operations exchange length-delimited byte regions in the
//! engine's [`Memory`] and always answer with a JSON envelope
//! `{status, result?, error_message?}`, so a binding never has to interpret
//! Rust errors — a failed evaluation is still a well-formed response.
//!
//! The engine is stateful and is not proven safe for concurrent invocation;
//! callers must serialize access to it (see [`Client`](crate::Client)).
mod memory;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::eval::{EvaluationError, EvaluationRequest, Evaluator};
use crate::snapshot::{source, Namespace, SnapshotStore};
use crate::{Error, Result};

pub use memory::{Memory, Region, RegionGuard};

/// The call boundary misbehaved: a region was missing or mis-sized, or an
/// envelope could not be encoded/decoded. Distinct from evaluation failures,
/// which travel inside the envelope.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The region handle does not refer to a live allocation.
    #[error("region {ptr} is not allocated")]
    UnknownRegion {
        #[allow(missing_docs)]
        ptr: u32,
    },

    /// A write did not exactly cover its region.
    #[error("write of {actual} bytes does not match region of {expected}")]
    RegionSizeMismatch {
        #[allow(missing_docs)]
        expected: u32,
        #[allow(missing_docs)]
        actual: u32,
    },

    /// A boundary payload (request or result envelope) could not be encoded
    /// or decoded.
    #[error("malformed boundary payload: {0}")]
    Envelope(String),
}

/// Status of an engine operation, as carried in the result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Status {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
}

/// The result envelope every engine operation answers with.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error_message: Option<String>,
}

impl<T> From<std::result::Result<T, EvaluationError>> for Envelope<T> {
    fn from(value: std::result::Result<T, EvaluationError>) -> Self {
        match value {
            Ok(result) => Envelope {
                status: Status::Success,
                result: Some(result),
                error_message: None,
            },
            Err(err) => Envelope {
                status: Status::Failure,
                result: None,
                error_message: Some(err.to_string()),
            },
        }
    }
}

impl<T> Envelope<T> {
    /// Unwrap the envelope: a failure becomes [`Error::Engine`] carrying the
    /// engine's message.
    pub(crate) fn into_result(self) -> Result<T> {
        match self.status {
            Status::Success => self.result.ok_or_else(|| {
                ProtocolError::Envelope("success envelope without result".into()).into()
            }),
            Status::Failure => Err(Error::Engine(
                self.error_message
                    .unwrap_or_else(|| "unknown engine failure".to_owned()),
            )),
        }
    }
}

/// The embedded evaluator instance behind the call boundary.
///
/// Dropping the engine releases its snapshot store and linear memory; there
/// is no separate destroy operation.
pub struct Engine {
    namespace: String,
    store: Arc<SnapshotStore>,
    evaluator: Evaluator,
    memory: Memory,
}

impl Engine {
    /// Initialize an engine for `namespace` from an initial snapshot
    /// payload. A payload that does not parse is fatal to construction.
    pub fn new(namespace: &str, payload: &[u8]) -> Result<Engine> {
        let store = Arc::new(SnapshotStore::new());
        let engine = Engine {
            namespace: namespace.to_owned(),
            evaluator: Evaluator::new(store.clone()),
            store,
            memory: Memory::new(),
        };

        engine
            .apply_snapshot(payload)
            .map_err(|err| Error::InvalidSnapshot(err.to_string()))?;

        Ok(engine)
    }

    /// The namespace this engine evaluates.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The linear memory callers marshal payloads through.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Replace the engine's snapshot from a payload region.
    ///
    /// Returns a result region holding a status envelope; the caller owns
    /// both regions.
    pub fn snapshot(&self, request: Region) -> std::result::Result<Region, ProtocolError> {
        let payload = self.memory.read(request)?;

        let envelope: Envelope<()> = match self.apply_snapshot(&payload) {
            Ok(()) => Envelope {
                status: Status::Success,
                result: None,
                error_message: None,
            },
            Err(err) => Envelope {
                status: Status::Failure,
                result: None,
                error_message: Some(err.to_string()),
            },
        };

        self.respond(envelope)
    }

    /// Evaluate a variant flag from a request region.
    pub fn evaluate_variant(&self, request: Region) -> std::result::Result<Region, ProtocolError> {
        let result = self
            .decode::<EvaluationRequest>(request)?
            .and_then(|req| self.evaluator.evaluate_variant(&self.namespace, &req));
        self.respond(Envelope::from(result))
    }

    /// Evaluate a boolean flag from a request region.
    pub fn evaluate_boolean(&self, request: Region) -> std::result::Result<Region, ProtocolError> {
        let result = self
            .decode::<EvaluationRequest>(request)?
            .and_then(|req| self.evaluator.evaluate_boolean(&self.namespace, &req));
        self.respond(Envelope::from(result))
    }

    /// Evaluate a batch of requests from a request region.
    pub fn evaluate_batch(&self, request: Region) -> std::result::Result<Region, ProtocolError> {
        let result = self
            .decode::<Vec<EvaluationRequest>>(request)?
            .and_then(|reqs| self.evaluator.evaluate_batch(&self.namespace, &reqs));
        self.respond(Envelope::from(result))
    }

    /// List the namespace's flags. Takes no request region.
    pub fn list_flags(&self) -> std::result::Result<Region, ProtocolError> {
        let flags = self.evaluator.list_flags(&self.namespace);
        self.respond(Envelope::from(Ok::<_, EvaluationError>(flags)))
    }

    fn apply_snapshot(&self, payload: &[u8]) -> std::result::Result<(), serde_json::Error> {
        let document: source::Document = serde_json::from_slice(payload)?;
        self.store.apply([Namespace::from_document(document)]);
        Ok(())
    }

    /// Read a request region and decode its payload. A dead region is a
    /// protocol error; a payload that fails to decode stays inside the
    /// evaluation result so it comes back as a failure envelope.
    fn decode<T: DeserializeOwned>(
        &self,
        request: Region,
    ) -> std::result::Result<std::result::Result<T, EvaluationError>, ProtocolError> {
        let bytes = self.memory.read(request)?;
        Ok(serde_json::from_slice(&bytes)
            .map_err(|err| EvaluationError::InvalidRequest(err.to_string())))
    }

    fn respond<T: Serialize>(
        &self,
        envelope: Envelope<T>,
    ) -> std::result::Result<Region, ProtocolError> {
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|err| ProtocolError::Envelope(err.to_string()))?;
        Ok(self.memory.store(&bytes))
    }
}
