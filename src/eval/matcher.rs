//! Typed constraint matching.
//!
//! Each constraint is evaluated against a single context value (or the
//! entity id for the entity-id family). Parse failures of either operand are
//! logged and reduce to "no match" for that constraint; only an unrecognized
//! comparison type aborts the surrounding evaluation.
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::EvaluationError;
use crate::snapshot::{Constraint, ConstraintComparisonType};

const OP_EQ: &str = "eq";
const OP_NEQ: &str = "neq";
const OP_LT: &str = "lt";
const OP_LTE: &str = "lte";
const OP_GT: &str = "gt";
const OP_GTE: &str = "gte";
const OP_EMPTY: &str = "empty";
const OP_NOT_EMPTY: &str = "notempty";
const OP_TRUE: &str = "true";
const OP_FALSE: &str = "false";
const OP_PRESENT: &str = "present";
const OP_NOT_PRESENT: &str = "notpresent";
const OP_PREFIX: &str = "prefix";
const OP_SUFFIX: &str = "suffix";
const OP_IS_ONE_OF: &str = "isoneof";
const OP_IS_NOT_ONE_OF: &str = "isnotoneof";

/// A constraint operand failed to parse. Reduces to "no match" for the
/// constraint it occurred in.
#[derive(thiserror::Error, Debug)]
pub(crate) enum ParseError {
    #[error("parsing number from '{0}'")]
    Number(String),
    #[error("parsing boolean from '{0}'")]
    Boolean(String),
    #[error("parsing datetime from '{0}'")]
    DateTime(String),
    #[error("parsing one-of list from '{0}'")]
    OneOf(String),
}

/// Evaluate one constraint against the request context and entity id.
pub(crate) fn matches(
    constraint: &Constraint,
    context: &HashMap<String, String>,
    entity_id: &str,
) -> Result<bool, EvaluationError> {
    let property = context
        .get(&constraint.property)
        .map(String::as_str)
        .unwrap_or_default();

    let result = match constraint.comparison {
        ConstraintComparisonType::String => matches_string(constraint, property),
        ConstraintComparisonType::Number => matches_number(constraint, property),
        ConstraintComparisonType::Boolean => matches_boolean(constraint, property),
        ConstraintComparisonType::DateTime => matches_datetime(constraint, property),
        ConstraintComparisonType::EntityId => matches_string(constraint, entity_id),
        ConstraintComparisonType::Unknown => return Err(EvaluationError::UnknownConstraintType),
    };

    match result {
        Ok(matched) => Ok(matched),
        Err(err) => {
            log::warn!(target: "flipt",
                property = constraint.property.as_str(),
                operator = constraint.operator.as_str();
                "error matching constraint: {err}");
            Ok(false)
        }
    }
}

fn matches_string(constraint: &Constraint, value: &str) -> Result<bool, ParseError> {
    match constraint.operator.as_str() {
        OP_EMPTY => return Ok(value.trim().is_empty()),
        OP_NOT_EMPTY => return Ok(!value.trim().is_empty()),
        _ => {}
    }

    if value.is_empty() {
        return Ok(false);
    }

    Ok(match constraint.operator.as_str() {
        OP_EQ => constraint.value == value,
        OP_NEQ => constraint.value != value,
        OP_PREFIX => value.trim().starts_with(&constraint.value),
        OP_SUFFIX => value.trim().ends_with(&constraint.value),
        OP_IS_ONE_OF => one_of_list(&constraint.value)?.iter().any(|v| v == value),
        OP_IS_NOT_ONE_OF => !one_of_list(&constraint.value)?.iter().any(|v| v == value),
        _ => false,
    })
}

fn matches_number(constraint: &Constraint, value: &str) -> Result<bool, ParseError> {
    match constraint.operator.as_str() {
        OP_NOT_PRESENT => return Ok(value.trim().is_empty()),
        OP_PRESENT => return Ok(!value.trim().is_empty()),
        _ => {}
    }

    // can't parse an empty string
    if value.is_empty() {
        return Ok(false);
    }

    let number: f64 = value
        .parse()
        .map_err(|_| ParseError::Number(value.to_owned()))?;

    match constraint.operator.as_str() {
        OP_IS_ONE_OF => {
            let values: Vec<f64> = serde_json::from_str(&constraint.value)
                .map_err(|_| ParseError::OneOf(constraint.value.clone()))?;
            return Ok(values.contains(&number));
        }
        OP_IS_NOT_ONE_OF => {
            let values: Vec<f64> = serde_json::from_str(&constraint.value)
                .map_err(|_| ParseError::OneOf(constraint.value.clone()))?;
            return Ok(!values.contains(&number));
        }
        _ => {}
    }

    let bound: f64 = constraint
        .value
        .parse()
        .map_err(|_| ParseError::Number(constraint.value.clone()))?;

    Ok(match constraint.operator.as_str() {
        OP_EQ => number == bound,
        OP_NEQ => number != bound,
        OP_LT => number < bound,
        OP_LTE => number <= bound,
        OP_GT => number > bound,
        OP_GTE => number >= bound,
        _ => false,
    })
}

fn matches_boolean(constraint: &Constraint, value: &str) -> Result<bool, ParseError> {
    match constraint.operator.as_str() {
        OP_NOT_PRESENT => return Ok(value.trim().is_empty()),
        OP_PRESENT => return Ok(!value.trim().is_empty()),
        _ => {}
    }

    // can't parse an empty string
    if value.is_empty() {
        return Ok(false);
    }

    let parsed: bool = value
        .parse()
        .map_err(|_| ParseError::Boolean(value.to_owned()))?;

    Ok(match constraint.operator.as_str() {
        OP_TRUE => parsed,
        OP_FALSE => !parsed,
        _ => false,
    })
}

fn matches_datetime(constraint: &Constraint, value: &str) -> Result<bool, ParseError> {
    match constraint.operator.as_str() {
        OP_NOT_PRESENT => return Ok(value.trim().is_empty()),
        OP_PRESENT => return Ok(!value.trim().is_empty()),
        _ => {}
    }

    // can't parse an empty string
    if value.is_empty() {
        return Ok(false);
    }

    let datetime = parse_datetime(value)?;
    let bound = parse_datetime(&constraint.value)?;

    Ok(match constraint.operator.as_str() {
        OP_EQ => datetime == bound,
        OP_NEQ => datetime != bound,
        OP_LT => datetime < bound,
        OP_LTE => datetime <= bound,
        OP_GT => datetime > bound,
        OP_GTE => datetime >= bound,
        _ => false,
    })
}

/// Parse a timestamp-with-offset (RFC 3339) value, falling back to a
/// date-only value at midnight. Either way the result is normalized to UTC.
fn parse_datetime(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    Err(ParseError::DateTime(value.to_owned()))
}

fn one_of_list(value: &str) -> Result<Vec<String>, ParseError> {
    serde_json::from_str(value).map_err(|_| ParseError::OneOf(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::snapshot::{Constraint, ConstraintComparisonType};

    fn constraint(
        comparison: ConstraintComparisonType,
        property: &str,
        operator: &str,
        value: &str,
    ) -> Constraint {
        Constraint {
            id: "c1".into(),
            comparison,
            property: property.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval(constraint: &Constraint, context: &HashMap<String, String>) -> bool {
        matches(constraint, context, "entity-1").expect("no evaluation error")
    }

    #[test]
    fn string_operators() {
        let ctx = context(&[("city", "berlin"), ("padded", "  x  ")]);

        let cases = [
            ("eq", "berlin", true),
            ("eq", "paris", false),
            ("neq", "paris", true),
            ("prefix", "ber", true),
            ("suffix", "lin", true),
            ("isoneof", r#"["berlin","paris"]"#, true),
            ("isoneof", r#"["paris"]"#, false),
            ("isnotoneof", r#"["paris"]"#, true),
        ];
        for (operator, value, expected) in cases {
            let c = constraint(ConstraintComparisonType::String, "city", operator, value);
            assert_eq!(eval(&c, &ctx), expected, "{operator} {value}");
        }

        // empty/notempty answer from the trimmed value
        let c = constraint(ConstraintComparisonType::String, "missing", "empty", "");
        assert!(eval(&c, &ctx));
        let c = constraint(ConstraintComparisonType::String, "padded", "notempty", "");
        assert!(eval(&c, &ctx));
    }

    #[test]
    fn string_absent_value_is_no_match_without_error() {
        let ctx = context(&[]);
        let c = constraint(ConstraintComparisonType::String, "city", "eq", "berlin");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn string_malformed_one_of_list_is_no_match() {
        let ctx = context(&[("city", "berlin")]);
        let c = constraint(ConstraintComparisonType::String, "city", "isoneof", "not-json");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn number_operators() {
        let ctx = context(&[("age", "30")]);

        let cases = [
            ("eq", "30", true),
            ("neq", "30", false),
            ("lt", "31", true),
            ("lte", "30", true),
            ("gt", "29.5", true),
            ("gte", "30.1", false),
            ("isoneof", "[29, 30]", true),
            ("isnotoneof", "[29, 30]", false),
        ];
        for (operator, value, expected) in cases {
            let c = constraint(ConstraintComparisonType::Number, "age", operator, value);
            assert_eq!(eval(&c, &ctx), expected, "{operator} {value}");
        }
    }

    #[test]
    fn number_presence_operators() {
        let ctx = context(&[("age", "30")]);
        let c = constraint(ConstraintComparisonType::Number, "age", "present", "");
        assert!(eval(&c, &ctx));
        let c = constraint(ConstraintComparisonType::Number, "height", "notpresent", "");
        assert!(eval(&c, &ctx));
    }

    #[test]
    fn number_parse_failure_is_no_match_not_error() {
        let ctx = context(&[("age", "not-a-number")]);
        let c = constraint(ConstraintComparisonType::Number, "age", "eq", "30");
        assert!(!eval(&c, &ctx));

        // malformed constraint bound behaves the same way
        let ctx = context(&[("age", "30")]);
        let c = constraint(ConstraintComparisonType::Number, "age", "eq", "thirty");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn boolean_operators() {
        let ctx = context(&[("beta", "true"), ("legacy", "false")]);

        let c = constraint(ConstraintComparisonType::Boolean, "beta", "true", "");
        assert!(eval(&c, &ctx));
        let c = constraint(ConstraintComparisonType::Boolean, "legacy", "false", "");
        assert!(eval(&c, &ctx));
        let c = constraint(ConstraintComparisonType::Boolean, "beta", "false", "");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn boolean_parse_failure_is_no_match() {
        let ctx = context(&[("beta", "yes")]);
        let c = constraint(ConstraintComparisonType::Boolean, "beta", "true", "");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn datetime_operators_normalize_to_utc() {
        let ctx = context(&[("signed_up", "2024-05-01T12:00:00+02:00")]);

        // 12:00+02:00 is 10:00 UTC
        let c = constraint(
            ConstraintComparisonType::DateTime,
            "signed_up",
            "eq",
            "2024-05-01T10:00:00Z",
        );
        assert!(eval(&c, &ctx));

        let c = constraint(
            ConstraintComparisonType::DateTime,
            "signed_up",
            "lt",
            "2024-06-01",
        );
        assert!(eval(&c, &ctx));

        let c = constraint(
            ConstraintComparisonType::DateTime,
            "signed_up",
            "gte",
            "2024-05-02",
        );
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn datetime_date_only_values_compare_at_midnight() {
        let ctx = context(&[("day", "2024-05-01")]);
        let c = constraint(
            ConstraintComparisonType::DateTime,
            "day",
            "eq",
            "2024-05-01T00:00:00Z",
        );
        assert!(eval(&c, &ctx));
    }

    #[test]
    fn datetime_parse_failure_is_no_match() {
        let ctx = context(&[("day", "yesterday")]);
        let c = constraint(ConstraintComparisonType::DateTime, "day", "eq", "2024-05-01");
        assert!(!eval(&c, &ctx));
    }

    #[test]
    fn entity_id_family_matches_the_entity_identifier() {
        let ctx = context(&[]);
        let c = constraint(ConstraintComparisonType::EntityId, "", "eq", "entity-1");
        assert!(eval(&c, &ctx));
        let c = constraint(
            ConstraintComparisonType::EntityId,
            "",
            "isoneof",
            r#"["entity-1","entity-2"]"#,
        );
        assert!(eval(&c, &ctx));
    }

    #[test]
    fn unknown_comparison_type_is_a_hard_error() {
        let ctx = context(&[]);
        let c = constraint(ConstraintComparisonType::Unknown, "city", "eq", "berlin");
        assert_eq!(
            matches(&c, &ctx, "entity-1"),
            Err(EvaluationError::UnknownConstraintType)
        );
    }

    #[test]
    fn unknown_operator_is_no_match() {
        let ctx = context(&[("city", "berlin")]);
        let c = constraint(ConstraintComparisonType::String, "city", "matches", ".*");
        assert!(!eval(&c, &ctx));
    }
}
