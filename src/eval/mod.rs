//! Flag evaluation: constraint matching, consistent-hash bucketing, and the
//! rule/rollout state machine producing variant and boolean results.
mod bucket;
mod matcher;
mod models;

pub mod evaluator;

pub use evaluator::Evaluator;
pub use models::{
    BatchEvaluationResponse, BatchResponse, BooleanEvaluationResponse, ErrorEvaluationReason,
    ErrorEvaluationResponse, EvaluationReason, EvaluationRequest, Flag, ResponseType,
    VariantEvaluationResponse,
};

/// Error evaluating a single request.
///
/// These surface to callers through the engine's result envelope; they never
/// crash the engine. [`EvaluationError::FlagNotFound`] is special-cased by
/// batch evaluation into a per-item error entry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// The flag does not exist in the namespace (or the namespace itself has
    /// no snapshot).
    #[error("flag '{flag_key}' not found in namespace '{namespace_key}'")]
    FlagNotFound {
        #[allow(missing_docs)]
        namespace_key: String,
        #[allow(missing_docs)]
        flag_key: String,
    },

    /// The operation does not apply to the flag's type (e.g. variant
    /// evaluation of a boolean flag).
    #[error("flag type is not {expected}")]
    WrongFlagType {
        /// The flag type the operation requires.
        expected: &'static str,
    },

    /// The flag carries a type this evaluator does not recognize.
    #[error("unknown flag type")]
    UnknownFlagType,

    /// A constraint carries a comparison type this evaluator does not
    /// recognize.
    #[error("unknown constraint type")]
    UnknownConstraintType,

    /// A rollout carries a type this evaluator does not recognize.
    #[error("unknown rollout type")]
    UnknownRolloutType,

    /// Rule ranks must be non-decreasing in stored order.
    #[error("rule '{id}' rank '{rank}' detected out of order")]
    RuleRankOutOfOrder {
        #[allow(missing_docs)]
        id: String,
        #[allow(missing_docs)]
        rank: usize,
    },

    /// Rollout ranks must be non-decreasing in stored order.
    #[error("rollout type '{kind}' rank '{rank}' detected out of order")]
    RolloutRankOutOfOrder {
        /// Wire name of the offending rollout's type.
        kind: &'static str,
        #[allow(missing_docs)]
        rank: usize,
    },

    /// The request payload could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
