//! Request and response models of the evaluation call boundary. Payloads are
//! snake_case JSON; reasons and response types serialize as the upstream wire
//! constants.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::FlagType;

/// Timestamp attached to evaluation responses, serialized as RFC 3339.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A single evaluation request: which flag, for which entity, under which
/// context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Key of the flag to evaluate.
    pub flag_key: String,
    /// Identifier of the entity the flag is evaluated for; also feeds the
    /// bucketing hash.
    pub entity_id: String,
    /// Request context matched against segment constraints.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Why an evaluation produced its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EvaluationReason {
    #[serde(rename = "FLAG_DISABLED_EVALUATION_REASON")]
    FlagDisabled,
    #[serde(rename = "MATCH_EVALUATION_REASON")]
    Match,
    #[serde(rename = "DEFAULT_EVALUATION_REASON")]
    Default,
    #[default]
    #[serde(rename = "UNKNOWN_EVALUATION_REASON")]
    Unknown,
}

/// Why a batch item failed to evaluate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ErrorEvaluationReason {
    #[default]
    #[serde(rename = "UNKNOWN_ERROR_EVALUATION_REASON")]
    Unknown,
    #[serde(rename = "NOT_FOUND_ERROR_EVALUATION_REASON")]
    NotFound,
}

/// Discriminator for the per-item responses of a batch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ResponseType {
    #[serde(rename = "VARIANT_EVALUATION_RESPONSE_TYPE")]
    Variant,
    #[serde(rename = "BOOLEAN_EVALUATION_RESPONSE_TYPE")]
    Boolean,
    #[serde(rename = "ERROR_EVALUATION_RESPONSE_TYPE")]
    Error,
}

/// Result of evaluating a variant flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantEvaluationResponse {
    /// Whether a rule matched and resolved to a variant.
    #[serde(rename = "match")]
    pub matched: bool,
    /// Keys of the segments the entity matched.
    pub segment_keys: Vec<String>,
    #[allow(missing_docs)]
    pub reason: EvaluationReason,
    #[allow(missing_docs)]
    pub flag_key: String,
    /// Key of the assigned variant; empty when the matching rule carries no
    /// distributions.
    pub variant_key: String,
    /// Attachment of the assigned variant, verbatim.
    pub variant_attachment: String,
    #[allow(missing_docs)]
    pub request_duration_millis: f64,
    #[allow(missing_docs)]
    pub timestamp: Timestamp,
}

/// Result of evaluating a boolean flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanEvaluationResponse {
    #[allow(missing_docs)]
    pub enabled: bool,
    #[allow(missing_docs)]
    pub flag_key: String,
    #[allow(missing_docs)]
    pub reason: EvaluationReason,
    #[allow(missing_docs)]
    pub request_duration_millis: f64,
    #[allow(missing_docs)]
    pub timestamp: Timestamp,
}

/// Per-item failure inside a batch evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvaluationResponse {
    #[allow(missing_docs)]
    pub flag_key: String,
    #[allow(missing_docs)]
    pub namespace_key: String,
    #[allow(missing_docs)]
    pub reason: ErrorEvaluationReason,
}

/// Result of a batch evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluationResponse {
    /// One response per request, in request order.
    pub responses: Vec<BatchResponse>,
    #[allow(missing_docs)]
    pub request_duration_millis: f64,
}

/// One entry of a batch response: a variant result, a boolean result, or a
/// per-item error, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(rename = "type")]
    #[allow(missing_docs)]
    pub kind: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub variant_evaluation_response: Option<VariantEvaluationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub boolean_evaluation_response: Option<BooleanEvaluationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub error_evaluation_response: Option<ErrorEvaluationResponse>,
}

impl BatchResponse {
    pub(crate) fn variant(response: VariantEvaluationResponse) -> BatchResponse {
        BatchResponse {
            kind: ResponseType::Variant,
            variant_evaluation_response: Some(response),
            boolean_evaluation_response: None,
            error_evaluation_response: None,
        }
    }

    pub(crate) fn boolean(response: BooleanEvaluationResponse) -> BatchResponse {
        BatchResponse {
            kind: ResponseType::Boolean,
            variant_evaluation_response: None,
            boolean_evaluation_response: Some(response),
            error_evaluation_response: None,
        }
    }

    pub(crate) fn error(response: ErrorEvaluationResponse) -> BatchResponse {
        BatchResponse {
            kind: ResponseType::Error,
            variant_evaluation_response: None,
            boolean_evaluation_response: None,
            error_evaluation_response: Some(response),
        }
    }
}

/// A flag as returned by the list operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    #[allow(missing_docs)]
    pub key: String,
    #[allow(missing_docs)]
    pub enabled: bool,
    #[serde(rename = "type")]
    #[allow(missing_docs)]
    pub kind: FlagType,
}
