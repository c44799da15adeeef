//! Wire format of the namespace snapshot document served by the upstream
//! Flipt instance. These models mirror the JSON exactly (camelCase keys,
//! SCREAMING_SNAKE enum constants) and are transformed into the denormalized
//! evaluation model in [`super::namespace`] before use.
use serde::{Deserialize, Serialize};

/// One namespace worth of flag state, as fetched from the snapshot endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The namespace this document describes.
    pub namespace: Namespace,
    /// All flags in the namespace, with their rules and rollouts inlined.
    #[serde(default)]
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Namespace {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FlagType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub rank: usize,
    #[serde(default)]
    pub segment_operator: SegmentOperator,
    #[serde(default)]
    pub distributions: Vec<Distribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub match_type: SegmentMatchType,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Constraint {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub comparison: ConstraintComparisonType,
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Distribution {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub variant_id: String,
    #[serde(default)]
    pub variant_key: String,
    #[serde(default)]
    pub variant_attachment: String,
    #[serde(default)]
    pub rollout: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Rollout {
    #[serde(rename = "type", default)]
    pub kind: RolloutType,
    #[serde(default)]
    pub rank: usize,
    #[serde(default)]
    pub segment: Option<SegmentRollout>,
    #[serde(default)]
    pub threshold: Option<Threshold>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SegmentRollout {
    #[serde(default)]
    pub value: bool,
    #[serde(default)]
    pub segment_operator: SegmentOperator,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Threshold {
    #[serde(default)]
    pub percentage: f32,
    #[serde(default)]
    pub value: bool,
}

/// Type of a flag: decides whether rules (variant) or rollouts (boolean)
/// drive its evaluation.
///
/// Unrecognized wire values deserialize to [`FlagType::Unknown`], which is a
/// hard evaluation error rather than a silent default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagType {
    #[default]
    #[serde(rename = "VARIANT_FLAG_TYPE")]
    #[allow(missing_docs)]
    Variant,
    #[serde(rename = "BOOLEAN_FLAG_TYPE")]
    #[allow(missing_docs)]
    Boolean,
    #[serde(rename = "UNKNOWN_FLAG_TYPE", other)]
    #[allow(missing_docs)]
    Unknown,
}

/// How segment results combine within a rule or segment rollout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentOperator {
    /// Every segment must match.
    #[serde(rename = "AND_SEGMENT_OPERATOR")]
    And,
    /// At least one segment must match.
    #[default]
    #[serde(rename = "OR_SEGMENT_OPERATOR", other)]
    Or,
}

/// How constraint results combine within a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentMatchType {
    /// Every constraint must match.
    #[serde(rename = "ALL_SEGMENT_MATCH_TYPE")]
    All,
    /// At least one constraint must match.
    #[default]
    #[serde(rename = "ANY_SEGMENT_MATCH_TYPE", other)]
    Any,
}

/// Comparison family of a constraint; selects which operator set applies and
/// how operands parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ConstraintComparisonType {
    #[serde(rename = "STRING_CONSTRAINT_COMPARISON_TYPE")]
    String,
    #[serde(rename = "NUMBER_CONSTRAINT_COMPARISON_TYPE")]
    Number,
    #[serde(rename = "BOOLEAN_CONSTRAINT_COMPARISON_TYPE")]
    Boolean,
    #[serde(rename = "DATETIME_CONSTRAINT_COMPARISON_TYPE")]
    DateTime,
    #[serde(rename = "ENTITY_ID_CONSTRAINT_COMPARISON_TYPE")]
    EntityId,
    #[default]
    #[serde(rename = "UNKNOWN_CONSTRAINT_COMPARISON_TYPE", other)]
    Unknown,
}

/// Type of a boolean-flag rollout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RolloutType {
    #[serde(rename = "SEGMENT_ROLLOUT_TYPE")]
    Segment,
    #[serde(rename = "THRESHOLD_ROLLOUT_TYPE")]
    Threshold,
    #[default]
    #[serde(rename = "UNKNOWN_ROLLOUT_TYPE", other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document() {
        let doc: Document = serde_json::from_str(
            r#"{"namespace": {"key": "default"}, "flags": []}"#,
        )
        .expect("valid document");

        assert_eq!(doc.namespace.key, "default");
        assert!(doc.flags.is_empty());
    }

    #[test]
    fn parses_wire_enum_constants() {
        let flag: Flag = serde_json::from_str(
            r#"{
                "key": "flag1",
                "name": "flag1",
                "type": "VARIANT_FLAG_TYPE",
                "enabled": true,
                "rules": [{
                    "id": "r1",
                    "rank": 1,
                    "segmentOperator": "AND_SEGMENT_OPERATOR",
                    "segments": [{
                        "key": "seg1",
                        "matchType": "ALL_SEGMENT_MATCH_TYPE",
                        "constraints": [{
                            "id": "c1",
                            "type": "NUMBER_CONSTRAINT_COMPARISON_TYPE",
                            "property": "age",
                            "operator": "gte",
                            "value": "21"
                        }]
                    }],
                    "distributions": []
                }]
            }"#,
        )
        .expect("valid flag");

        assert_eq!(flag.kind, FlagType::Variant);
        let rule = &flag.rules[0];
        assert_eq!(rule.segment_operator, SegmentOperator::And);
        let segment = &rule.segments[0];
        assert_eq!(segment.match_type, SegmentMatchType::All);
        assert_eq!(
            segment.constraints[0].comparison,
            ConstraintComparisonType::Number
        );
    }

    #[test]
    fn unknown_enum_values_map_to_unknown_variants() {
        let constraint: Constraint = serde_json::from_str(
            r#"{"type": "SEMVER_CONSTRAINT_COMPARISON_TYPE", "property": "v", "operator": "eq", "value": "1"}"#,
        )
        .expect("constraint with unrecognized type still parses");
        assert_eq!(constraint.comparison, ConstraintComparisonType::Unknown);

        let rollout: Rollout =
            serde_json::from_str(r#"{"type": "BANDIT_ROLLOUT_TYPE", "rank": 1}"#)
                .expect("rollout with unrecognized type still parses");
        assert_eq!(rollout.kind, RolloutType::Unknown);
    }

    #[test]
    fn missing_operator_defaults_to_or() {
        let rule: Rule = serde_json::from_str(r#"{"id": "r1", "rank": 1}"#).expect("valid rule");
        assert_eq!(rule.segment_operator, SegmentOperator::Or);
    }
}
