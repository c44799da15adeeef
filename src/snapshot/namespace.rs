//! Denormalized, evaluation-ready view of one namespace.
//!
//! A [`Namespace`] is built once from a fetched [`source::Document`] and is
//! immutable afterwards; the store replaces it wholesale on refresh. The
//! transformation drops the upstream's duplicate rule/distribution entries
//! and elides empty rule/rollout lists so the evaluator never sees them.
use std::collections::{HashMap, HashSet};

use super::source;
pub use super::source::{ConstraintComparisonType, FlagType, SegmentMatchType, SegmentOperator};

/// All flag state for one namespace, keyed for evaluation.
#[derive(Debug, Clone)]
pub struct Namespace {
    key: String,
    flags: HashMap<String, Flag>,
    rules: HashMap<String, Vec<Rule>>,
    rollouts: HashMap<String, Vec<Rollout>>,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Flag {
    pub key: String,
    pub kind: FlagType,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Rule {
    pub id: String,
    pub rank: usize,
    pub operator: SegmentOperator,
    pub segments: Vec<Segment>,
    pub distributions: Vec<Distribution>,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Segment {
    pub key: String,
    pub match_type: SegmentMatchType,
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Constraint {
    pub id: String,
    pub comparison: ConstraintComparisonType,
    pub property: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Distribution {
    pub rule_id: String,
    pub rollout: f32,
    pub variant_key: String,
    pub variant_attachment: String,
}

/// A boolean-flag rollout with its evaluation action resolved to a closed
/// variant set.
#[derive(Debug, Clone)]
pub struct Rollout {
    #[allow(missing_docs)]
    pub rank: usize,
    #[allow(missing_docs)]
    pub action: RolloutAction,
}

/// What a rollout does when its turn comes in rank order.
#[derive(Debug, Clone)]
pub enum RolloutAction {
    /// Enable/disable for the percentage of entities below the threshold.
    Threshold(ThresholdRollout),
    /// Enable/disable for entities matching the segment condition.
    Segment(SegmentRollout),
    /// Unrecognized rollout type; evaluating it is a hard error.
    Unknown,
}

impl RolloutAction {
    /// Wire-style name of the rollout type, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RolloutAction::Threshold(_) => "THRESHOLD_ROLLOUT_TYPE",
            RolloutAction::Segment(_) => "SEGMENT_ROLLOUT_TYPE",
            RolloutAction::Unknown => "UNKNOWN_ROLLOUT_TYPE",
        }
    }
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct ThresholdRollout {
    pub percentage: f32,
    pub value: bool,
}

#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct SegmentRollout {
    pub value: bool,
    pub operator: SegmentOperator,
    pub segments: Vec<Segment>,
}

impl Namespace {
    /// Build the evaluation model from a fetched document.
    ///
    /// The upstream snapshot endpoint is known to emit repeated rule and
    /// distribution entries; duplicates (by rule id / variant id) are dropped
    /// here, first occurrence wins.
    pub fn from_document(doc: source::Document) -> Namespace {
        let mut flags = HashMap::with_capacity(doc.flags.len());
        let mut rules = HashMap::new();
        let mut rollouts = HashMap::new();

        for flag in doc.flags {
            flags.insert(
                flag.key.clone(),
                Flag {
                    key: flag.key.clone(),
                    kind: flag.kind,
                    enabled: flag.enabled,
                },
            );

            let flag_rules = transform_rules(flag.rules);
            if !flag_rules.is_empty() {
                rules.insert(flag.key.clone(), flag_rules);
            }

            let flag_rollouts: Vec<Rollout> =
                flag.rollouts.into_iter().map(transform_rollout).collect();
            if !flag_rollouts.is_empty() {
                rollouts.insert(flag.key, flag_rollouts);
            }
        }

        Namespace {
            key: doc.namespace.key,
            flags,
            rules,
            rollouts,
        }
    }

    /// The namespace key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn flag(&self, flag_key: &str) -> Option<&Flag> {
        self.flags.get(flag_key)
    }

    pub(crate) fn rules(&self, flag_key: &str) -> Option<&[Rule]> {
        self.rules.get(flag_key).map(Vec::as_slice)
    }

    pub(crate) fn rollouts(&self, flag_key: &str) -> Option<&[Rollout]> {
        self.rollouts.get(flag_key).map(Vec::as_slice)
    }

    pub(crate) fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }
}

fn transform_rules(rules: Vec<source::Rule>) -> Vec<Rule> {
    let mut seen_rules = HashSet::new();
    let mut out = Vec::with_capacity(rules.len());

    for rule in rules {
        if !seen_rules.insert(rule.id.clone()) {
            continue;
        }

        let mut seen_variants = HashSet::new();
        let distributions = rule
            .distributions
            .into_iter()
            .filter(|distribution| seen_variants.insert(distribution.variant_id.clone()))
            .map(|distribution| Distribution {
                rule_id: distribution.rule_id,
                rollout: distribution.rollout,
                variant_key: distribution.variant_key,
                variant_attachment: distribution.variant_attachment,
            })
            .collect();

        out.push(Rule {
            id: rule.id,
            rank: rule.rank,
            operator: rule.segment_operator,
            segments: rule.segments.into_iter().map(transform_segment).collect(),
            distributions,
        });
    }

    out
}

fn transform_segment(segment: source::Segment) -> Segment {
    Segment {
        key: segment.key,
        match_type: segment.match_type,
        constraints: segment
            .constraints
            .into_iter()
            .map(|constraint| Constraint {
                id: constraint.id,
                comparison: constraint.comparison,
                property: constraint.property,
                operator: constraint.operator,
                value: constraint.value,
            })
            .collect(),
    }
}

fn transform_rollout(rollout: source::Rollout) -> Rollout {
    let action = match rollout.kind {
        source::RolloutType::Threshold => match rollout.threshold {
            Some(threshold) => RolloutAction::Threshold(ThresholdRollout {
                percentage: threshold.percentage,
                value: threshold.value,
            }),
            None => RolloutAction::Unknown,
        },
        source::RolloutType::Segment => match rollout.segment {
            Some(segment) => RolloutAction::Segment(SegmentRollout {
                value: segment.value,
                operator: segment.segment_operator,
                segments: segment.segments.into_iter().map(transform_segment).collect(),
            }),
            None => RolloutAction::Unknown,
        },
        source::RolloutType::Unknown => RolloutAction::Unknown,
    };

    Rollout {
        rank: rollout.rank,
        action,
    }
}
