//! Rule evaluation for conditional routing.
//!
//! A switch node carries an ordered rule list. Each rule names a dotted
//! path into the state, an operator from the closed set below, and a
//! string-serialized comparand. The first matching rule decides the
//! route.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed operator set for conditional rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Values are equal (numeric when both sides parse as numbers).
    Equals,
    /// Negation of [`Operator::Equals`].
    NotEquals,
    /// String containment, or array membership.
    Contains,
    /// Negation of [`Operator::Contains`].
    NotContains,
    /// String prefix.
    StartsWith,
    /// String suffix.
    EndsWith,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-or-equal.
    Lte,
    /// Null, empty string, empty array, or empty object.
    IsEmpty,
    /// Negation of [`Operator::IsEmpty`].
    IsNotEmpty,
    /// The field path resolves at all.
    Exists,
    /// Regular-expression match on the stringified field.
    MatchesRegex,
    /// Boolean coercion is true.
    IsTrue,
    /// Boolean coercion is false.
    IsFalse,
    /// String/array/object length equals the comparand.
    LengthEq,
    /// Length strictly greater than the comparand.
    LengthGt,
    /// Length strictly less than the comparand.
    LengthLt,
    /// Datetime strictly earlier than the comparand.
    Before,
    /// Datetime strictly later than the comparand.
    After,
}

/// One routing rule of a switch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule id; becomes the route when the rule matches.
    pub id: String,
    /// Dotted path into the state (e.g. `node_outputs.cat_1.category`).
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// String-serialized comparand.
    #[serde(default)]
    pub value: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: Option<String>,
}

impl Rule {
    /// Evaluate this rule against the serialized state.
    #[must_use]
    pub fn matches(&self, state: &Value) -> bool {
        let field = lookup_path(state, &self.field);
        self.operator.evaluate(field, &self.value)
    }
}

/// Resolve a dotted path into a JSON value. Array segments may be
/// numeric indices.
#[must_use]
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

impl Operator {
    /// Evaluate the operator on `(field, comparand)`.
    ///
    /// A missing field fails every operator except [`Operator::Exists`]
    /// (false), [`Operator::IsEmpty`] (true, absent counts as empty),
    /// and the negated forms that follow from those.
    #[must_use]
    pub fn evaluate(&self, field: Option<&Value>, comparand: &str) -> bool {
        match self {
            Self::Exists => return field.is_some(),
            Self::IsEmpty => return field.is_none_or(is_empty),
            Self::IsNotEmpty => return field.is_some_and(|value| !is_empty(value)),
            _ => {}
        }
        let Some(field) = field else {
            return false;
        };

        match self {
            Self::Equals => loose_equals(field, comparand),
            Self::NotEquals => !loose_equals(field, comparand),
            Self::Contains => contains(field, comparand),
            Self::NotContains => !contains(field, comparand),
            Self::StartsWith => as_text(field).starts_with(comparand),
            Self::EndsWith => as_text(field).ends_with(comparand),
            Self::Gt => numeric(field, comparand).is_some_and(|(a, b)| a > b),
            Self::Gte => numeric(field, comparand).is_some_and(|(a, b)| a >= b),
            Self::Lt => numeric(field, comparand).is_some_and(|(a, b)| a < b),
            Self::Lte => numeric(field, comparand).is_some_and(|(a, b)| a <= b),
            Self::MatchesRegex => regex::Regex::new(comparand)
                .is_ok_and(|re| re.is_match(&as_text(field))),
            Self::IsTrue => truthy(field) == Some(true),
            Self::IsFalse => truthy(field) == Some(false),
            Self::LengthEq => lengths(field, comparand).is_some_and(|(a, b)| a == b),
            Self::LengthGt => lengths(field, comparand).is_some_and(|(a, b)| a > b),
            Self::LengthLt => lengths(field, comparand).is_some_and(|(a, b)| a < b),
            Self::Before => datetimes(field, comparand).is_some_and(|(a, b)| a < b),
            Self::After => datetimes(field, comparand).is_some_and(|(a, b)| a > b),
            Self::Exists | Self::IsEmpty | Self::IsNotEmpty => unreachable!("handled above"),
        }
    }
}

/// Stringify a field for text operators: strings verbatim, everything
/// else as its JSON rendering.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn loose_equals(field: &Value, comparand: &str) -> bool {
    if let Some((a, b)) = numeric(field, comparand) {
        return (a - b).abs() < f64::EPSILON;
    }
    as_text(field) == comparand
}

fn contains(field: &Value, comparand: &str) -> bool {
    match field {
        Value::Array(items) => items.iter().any(|item| as_text(item) == comparand),
        other => as_text(other).contains(comparand),
    }
}

fn numeric(field: &Value, comparand: &str) -> Option<(f64, f64)> {
    let a = match field {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    let b = comparand.trim().parse().ok()?;
    Some((a, b))
}

fn truthy(field: &Value) -> Option<bool> {
    match field {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => Some(number.as_f64()? != 0.0),
        Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lengths(field: &Value, comparand: &str) -> Option<(usize, usize)> {
    let length = match field {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => return None,
    };
    Some((length, comparand.trim().parse().ok()?))
}

fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime);
    }
    // date-only fallback, midnight UTC
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::from_naive_utc_and_offset(
        naive,
        FixedOffset::east_opt(0)?,
    ))
}

fn datetimes(
    field: &Value,
    comparand: &str,
) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let a = parse_datetime(field.as_str()?)?;
    let b = parse_datetime(comparand)?;
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    // equals with numeric coercion
    #[case(Operator::Equals, json!(5), "5", true)]
    #[case(Operator::Equals, json!("5.0"), "5", true)]
    #[case(Operator::Equals, json!("abc"), "abc", true)]
    #[case(Operator::Equals, json!("abc"), "abd", false)]
    #[case(Operator::NotEquals, json!("abc"), "abd", true)]
    // containment
    #[case(Operator::Contains, json!("run code now"), "code", true)]
    #[case(Operator::Contains, json!("hi"), "code", false)]
    #[case(Operator::Contains, json!(["a", "b"]), "b", true)]
    #[case(Operator::NotContains, json!(["a", "b"]), "c", true)]
    // affixes
    #[case(Operator::StartsWith, json!("billing: late"), "billing", true)]
    #[case(Operator::EndsWith, json!("file.rs"), ".rs", true)]
    #[case(Operator::StartsWith, json!("x"), "billing", false)]
    // numeric comparisons with string coercion
    #[case(Operator::Gt, json!(3), "2", true)]
    #[case(Operator::Gt, json!("3"), "3", false)]
    #[case(Operator::Gte, json!("3"), "3", true)]
    #[case(Operator::Lt, json!(1.5), "2", true)]
    #[case(Operator::Lte, json!("2.0"), "2", true)]
    #[case(Operator::Gt, json!("not a number"), "2", false)]
    // emptiness
    #[case(Operator::IsEmpty, json!(""), "", true)]
    #[case(Operator::IsEmpty, json!([]), "", true)]
    #[case(Operator::IsEmpty, json!({}), "", true)]
    #[case(Operator::IsEmpty, json!(null), "", true)]
    #[case(Operator::IsEmpty, json!("x"), "", false)]
    #[case(Operator::IsNotEmpty, json!("x"), "", true)]
    #[case(Operator::IsNotEmpty, json!([]), "", false)]
    // regex
    #[case(Operator::MatchesRegex, json!("ORD-1234"), r"^ORD-\d+$", true)]
    #[case(Operator::MatchesRegex, json!("ord"), r"^ORD-\d+$", false)]
    #[case(Operator::MatchesRegex, json!("x"), "(unclosed", false)]
    // boolean coercion
    #[case(Operator::IsTrue, json!(true), "", true)]
    #[case(Operator::IsTrue, json!("1"), "", true)]
    #[case(Operator::IsTrue, json!("true"), "", true)]
    #[case(Operator::IsTrue, json!(0), "", false)]
    #[case(Operator::IsFalse, json!(false), "", true)]
    #[case(Operator::IsFalse, json!("0"), "", true)]
    #[case(Operator::IsFalse, json!("maybe"), "", false)]
    // lengths
    #[case(Operator::LengthEq, json!("abc"), "3", true)]
    #[case(Operator::LengthGt, json!([1, 2, 3]), "2", true)]
    #[case(Operator::LengthLt, json!({"a": 1}), "2", true)]
    #[case(Operator::LengthEq, json!(7), "1", false)]
    // datetimes
    #[case(Operator::Before, json!("2026-01-01T00:00:00Z"), "2026-06-01T00:00:00Z", true)]
    #[case(Operator::After, json!("2026-06-01T00:00:00Z"), "2026-01-01", true)]
    #[case(Operator::Before, json!("not a date"), "2026-01-01", false)]
    fn operator_table(
        #[case] operator: Operator,
        #[case] field: Value,
        #[case] comparand: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(
            operator.evaluate(Some(&field), comparand),
            expected,
            "{operator:?}({field}, {comparand:?})"
        );
    }

    #[test]
    fn missing_field_semantics() {
        assert!(!Operator::Exists.evaluate(None, ""));
        assert!(Operator::Exists.evaluate(Some(&json!(null)), ""));
        assert!(Operator::IsEmpty.evaluate(None, ""));
        assert!(!Operator::IsNotEmpty.evaluate(None, ""));
        assert!(!Operator::Equals.evaluate(None, "x"));
        assert!(!Operator::Gt.evaluate(None, "1"));
    }

    #[test]
    fn lookup_dotted_paths() {
        let state = json!({
            "trigger": {"text": "hello"},
            "node_outputs": {"cat_1": {"category": "billing"}},
            "items": [{"name": "first"}],
        });
        assert_eq!(
            lookup_path(&state, "node_outputs.cat_1.category"),
            Some(&json!("billing"))
        );
        assert_eq!(lookup_path(&state, "items.0.name"), Some(&json!("first")));
        assert_eq!(lookup_path(&state, "trigger.missing"), None);
        assert_eq!(lookup_path(&state, "trigger.text.deeper"), None);
        assert_eq!(lookup_path(&state, "items.x"), None);
    }

    #[test]
    fn rule_matches_against_state() {
        let rule = Rule {
            id: "r1".into(),
            field: "trigger.text".into(),
            operator: Operator::Contains,
            value: "code".into(),
            label: None,
        };
        assert!(rule.matches(&json!({"trigger": {"text": "run code"}})));
        assert!(!rule.matches(&json!({"trigger": {"text": "hi"}})));
        assert!(!rule.matches(&json!({})));
    }

    #[test]
    fn operator_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&Operator::MatchesRegex).unwrap(),
            "\"matches_regex\""
        );
        let op: Operator = serde_json::from_str("\"starts_with\"").unwrap();
        assert_eq!(op, Operator::StartsWith);
    }

    #[test]
    fn rule_serde_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r1",
            "field": "route",
            "operator": "is_empty",
        }))
        .unwrap();
        assert_eq!(rule.value, "");
        assert!(rule.label.is_none());
    }
}
