//! Rule/rollout evaluation: orchestrates segment resolution and bucketing to
//! produce variant and boolean results from the active snapshot.
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::models::{
    BatchEvaluationResponse, BatchResponse, BooleanEvaluationResponse, ErrorEvaluationReason,
    ErrorEvaluationResponse, EvaluationReason, EvaluationRequest, Flag,
    VariantEvaluationResponse,
};
use super::{bucket, matcher, EvaluationError};
use crate::snapshot::{
    self, FlagType, Namespace, RolloutAction, Segment, SegmentMatchType, SegmentOperator,
    SnapshotStore,
};

/// Evaluates requests against the snapshots held in a [`SnapshotStore`].
///
/// Evaluation is a pure function of the snapshot and the request: the
/// evaluator holds no per-call state, and a single call reads exactly one
/// `Arc` snapshot of its namespace, so concurrent store updates never bleed
/// into an in-flight evaluation.
pub struct Evaluator {
    store: Arc<SnapshotStore>,
}

impl Evaluator {
    /// Create an evaluator reading from the given store.
    pub fn new(store: Arc<SnapshotStore>) -> Evaluator {
        Evaluator { store }
    }

    /// Evaluate a variant flag.
    pub fn evaluate_variant(
        &self,
        namespace_key: &str,
        request: &EvaluationRequest,
    ) -> Result<VariantEvaluationResponse, EvaluationError> {
        let namespace = self.namespace(namespace_key, &request.flag_key)?;
        let flag = Self::flag(&namespace, &request.flag_key)?;
        self.variant(&namespace, flag, request)
    }

    /// Evaluate a boolean flag.
    pub fn evaluate_boolean(
        &self,
        namespace_key: &str,
        request: &EvaluationRequest,
    ) -> Result<BooleanEvaluationResponse, EvaluationError> {
        let namespace = self.namespace(namespace_key, &request.flag_key)?;
        let flag = Self::flag(&namespace, &request.flag_key)?;
        self.boolean(&namespace, flag, request)
    }

    /// Evaluate a batch of requests sequentially, dispatching each by the
    /// flag's stored type.
    ///
    /// An unresolved flag key yields a per-item error entry rather than
    /// aborting the batch; an internal evaluator error aborts the whole
    /// batch.
    pub fn evaluate_batch(
        &self,
        namespace_key: &str,
        requests: &[EvaluationRequest],
    ) -> Result<BatchEvaluationResponse, EvaluationError> {
        let started = Instant::now();
        // one snapshot for the whole batch
        let namespace = self.store.get(namespace_key);

        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let flag = namespace
                .as_deref()
                .and_then(|namespace| namespace.flag(&request.flag_key));

            let Some(flag) = flag else {
                responses.push(BatchResponse::error(ErrorEvaluationResponse {
                    flag_key: request.flag_key.clone(),
                    namespace_key: namespace_key.to_owned(),
                    reason: ErrorEvaluationReason::NotFound,
                }));
                continue;
            };

            let namespace = namespace.as_deref().expect("flag implies namespace");
            match flag.kind {
                FlagType::Variant => {
                    responses.push(BatchResponse::variant(self.variant(
                        namespace, flag, request,
                    )?));
                }
                FlagType::Boolean => {
                    responses.push(BatchResponse::boolean(self.boolean(
                        namespace, flag, request,
                    )?));
                }
                FlagType::Unknown => return Err(EvaluationError::UnknownFlagType),
            }
        }

        Ok(BatchEvaluationResponse {
            responses,
            request_duration_millis: duration_millis(started),
        })
    }

    /// List the flags of a namespace, sorted by key. An absent namespace
    /// yields an empty list.
    pub fn list_flags(&self, namespace_key: &str) -> Vec<Flag> {
        let Some(namespace) = self.store.get(namespace_key) else {
            return Vec::new();
        };

        let mut flags: Vec<Flag> = namespace
            .flags()
            .map(|flag| Flag {
                key: flag.key.clone(),
                enabled: flag.enabled,
                kind: flag.kind,
            })
            .collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }

    fn namespace(
        &self,
        namespace_key: &str,
        flag_key: &str,
    ) -> Result<Arc<Namespace>, EvaluationError> {
        self.store
            .get(namespace_key)
            .ok_or_else(|| EvaluationError::FlagNotFound {
                namespace_key: namespace_key.to_owned(),
                flag_key: flag_key.to_owned(),
            })
    }

    fn flag<'a>(
        namespace: &'a Namespace,
        flag_key: &str,
    ) -> Result<&'a snapshot::Flag, EvaluationError> {
        namespace
            .flag(flag_key)
            .ok_or_else(|| EvaluationError::FlagNotFound {
                namespace_key: namespace.key().to_owned(),
                flag_key: flag_key.to_owned(),
            })
    }

    fn variant(
        &self,
        namespace: &Namespace,
        flag: &snapshot::Flag,
        request: &EvaluationRequest,
    ) -> Result<VariantEvaluationResponse, EvaluationError> {
        let started = Instant::now();

        if flag.kind != FlagType::Variant {
            return Err(EvaluationError::WrongFlagType { expected: "variant" });
        }

        let mut response = VariantEvaluationResponse {
            matched: false,
            segment_keys: Vec::new(),
            reason: EvaluationReason::Unknown,
            flag_key: flag.key.clone(),
            variant_key: String::new(),
            variant_attachment: String::new(),
            request_duration_millis: 0.0,
            timestamp: Utc::now(),
        };

        if !flag.enabled {
            response.reason = EvaluationReason::FlagDisabled;
            response.request_duration_millis = duration_millis(started);
            return Ok(response);
        }

        let Some(rules) = namespace.rules(&flag.key) else {
            response.request_duration_millis = duration_millis(started);
            return Ok(response);
        };

        let mut last_rank = 0;
        for rule in rules {
            if rule.rank < last_rank {
                return Err(EvaluationError::RuleRankOutOfOrder {
                    id: rule.id.clone(),
                    rank: rule.rank,
                });
            }
            last_rank = rule.rank;

            let mut segment_keys = Vec::with_capacity(rule.segments.len());
            for segment in &rule.segments {
                if resolve_segment(segment, request)? {
                    segment_keys.push(segment.key.clone());
                }
            }

            if !segments_satisfied(rule.operator, rule.segments.len(), segment_keys.len()) {
                continue;
            }

            if !segment_keys.is_empty() {
                response.segment_keys = segment_keys;
            }

            let (distributions, buckets) = bucket::distribution_buckets(&rule.distributions);

            // a matching rule with no positive-rollout distributions resolves
            // with no variant
            if distributions.is_empty() {
                response.matched = true;
                response.reason = EvaluationReason::Match;
                response.request_duration_millis = duration_millis(started);
                return Ok(response);
            }

            let entity_bucket = bucket::bucket(&request.entity_id, &flag.key);
            let Some(index) = bucket::select_distribution(&buckets, entity_bucket) else {
                // the entity falls past every distribution; the rule does not
                // resolve and evaluation stops here
                response.request_duration_millis = duration_millis(started);
                return Ok(response);
            };

            let distribution = distributions[index];
            response.matched = true;
            response.variant_key = distribution.variant_key.clone();
            response.variant_attachment = distribution.variant_attachment.clone();
            response.reason = EvaluationReason::Match;
            response.request_duration_millis = duration_millis(started);
            return Ok(response);
        }

        response.request_duration_millis = duration_millis(started);
        Ok(response)
    }

    fn boolean(
        &self,
        namespace: &Namespace,
        flag: &snapshot::Flag,
        request: &EvaluationRequest,
    ) -> Result<BooleanEvaluationResponse, EvaluationError> {
        let started = Instant::now();

        if flag.kind != FlagType::Boolean {
            return Err(EvaluationError::WrongFlagType { expected: "boolean" });
        }

        let mut response = BooleanEvaluationResponse {
            enabled: false,
            flag_key: flag.key.clone(),
            reason: EvaluationReason::Default,
            request_duration_millis: 0.0,
            timestamp: Utc::now(),
        };

        if !flag.enabled {
            response.reason = EvaluationReason::FlagDisabled;
            response.request_duration_millis = duration_millis(started);
            return Ok(response);
        }

        let rollouts = namespace.rollouts(&flag.key).unwrap_or_default();

        let mut last_rank = 0;
        for rollout in rollouts {
            if rollout.rank < last_rank {
                return Err(EvaluationError::RolloutRankOutOfOrder {
                    kind: rollout.action.kind(),
                    rank: rollout.rank,
                });
            }
            last_rank = rollout.rank;

            match &rollout.action {
                RolloutAction::Threshold(threshold) => {
                    let normalized =
                        bucket::threshold_normalized(&request.entity_id, &flag.key);
                    if normalized < threshold.percentage {
                        response.enabled = threshold.value;
                        response.reason = EvaluationReason::Match;
                        response.request_duration_millis = duration_millis(started);
                        return Ok(response);
                    }
                }
                RolloutAction::Segment(segment_rollout) => {
                    let mut matched = 0;
                    for segment in &segment_rollout.segments {
                        if resolve_segment(segment, request)? {
                            matched += 1;
                        }
                    }

                    if !segments_satisfied(
                        segment_rollout.operator,
                        segment_rollout.segments.len(),
                        matched,
                    ) {
                        continue;
                    }

                    response.enabled = segment_rollout.value;
                    response.reason = EvaluationReason::Match;
                    response.request_duration_millis = duration_millis(started);
                    return Ok(response);
                }
                RolloutAction::Unknown => return Err(EvaluationError::UnknownRolloutType),
            }
        }

        response.enabled = flag.enabled;
        response.request_duration_millis = duration_millis(started);
        Ok(response)
    }
}

/// Resolve one segment: count matching constraints against the total.
///
/// An empty constraint list matches under both match types.
fn resolve_segment(
    segment: &Segment,
    request: &EvaluationRequest,
) -> Result<bool, EvaluationError> {
    let mut matched = 0;
    for constraint in &segment.constraints {
        if matcher::matches(constraint, &request.context, &request.entity_id)? {
            matched += 1;
        }
    }

    Ok(match segment.match_type {
        SegmentMatchType::All => matched == segment.constraints.len(),
        SegmentMatchType::Any => segment.constraints.is_empty() || matched > 0,
    })
}

fn segments_satisfied(operator: SegmentOperator, total: usize, matched: usize) -> bool {
    match operator {
        SegmentOperator::Or => matched >= 1,
        SegmentOperator::And => total == matched,
    }
}

fn duration_millis(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
