// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Row snapshots and opaque primary keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Storage kind of a table's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Serial integer keys.
    #[default]
    Integer,
    /// Text keys (UUIDs, slugs).
    Text,
}

/// Primary-key value of a row.
///
/// Keys are opaque to the tree core: they are only compared, hashed and echoed
/// back. Serialization is untagged so the wire form is a plain JSON number or
/// string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    /// Integer key.
    Int(i64),
    /// Text key.
    Text(String),
}

impl RowKey {
    /// Extracts a key from a field value.
    ///
    /// Null, booleans and structured values carry no key. Non-integral numbers
    /// become text keys so synthetic leaves built from arbitrary aggregate
    /// elements still get a stable id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(n.as_i64().map_or_else(|| Self::Text(n.to_string()), Self::Int)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Normalizes the key against a table's key kind.
    ///
    /// Browsers post ids as strings; `"5"` names the same row as `5` on an
    /// integer-keyed table.
    pub fn coerce(self, kind: KeyKind) -> Self {
        match (self, kind) {
            (Self::Text(s), KeyKind::Integer) => match s.trim().parse::<i64>() {
                Ok(n) => Self::Int(n),
                Err(_) => Self::Text(s),
            },
            (Self::Int(n), KeyKind::Text) => Self::Text(n.to_string()),
            (key, _) => key,
        }
    }

    /// JSON form of the key, suitable for a field delta.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RowKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Immutable snapshot of one record: field name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

/// Minimal field/value mapping expressing one store update.
pub type Delta = Row;

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// True when `field` is present and not null.
    pub fn is_set(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Key stored in `field`, normalized to `kind`.
    pub fn key(&self, field: &str, kind: KeyKind) -> Option<RowKey> {
        self.get(field)
            .and_then(RowKey::from_value)
            .map(|k| k.coerce(kind))
    }

    /// Display string of `field` (missing and null render as `""`).
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(display_value).unwrap_or_default()
    }

    /// Set `field`, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Overwrite every field present in `delta`.
    pub fn merge(&mut self, delta: &Self) {
        for (field, value) in &delta.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Self::Object(row.0)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Render a value the way labels and tags show it.
///
/// Strings are shown raw, null is empty, arrays are joined with `", "`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Loose equality used by filters: exact JSON equality, or numeric equality
/// across integer/float representations.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y).is_eq(),
        _ => false,
    }
}

/// Sibling ordering over order-field values.
///
/// Nulls and missing values sort last; numbers sort before strings; strings
/// compare case-insensitively when `nocase` is set. Ties are `Equal` so a
/// stable sort keeps fetch order.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>, nocase: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.total_cmp(&y)
            }
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,
            (Value::String(x), Value::String(y)) if nocase => {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
            _ => display_value(a).cmp(&display_value(b)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_from_value_accepts_numbers_and_strings() {
        assert_eq!(RowKey::from_value(&json!(7)), Some(RowKey::Int(7)));
        assert_eq!(RowKey::from_value(&json!("a-1")), Some(RowKey::from("a-1")));
        assert_eq!(RowKey::from_value(&json!(null)), None);
        assert_eq!(RowKey::from_value(&json!(true)), None);
        assert_eq!(RowKey::from_value(&json!(1.5)), Some(RowKey::from("1.5")));
    }

    #[test]
    fn coerce_parses_posted_integer_ids() {
        assert_eq!(RowKey::from("5").coerce(KeyKind::Integer), RowKey::Int(5));
        assert_eq!(
            RowKey::from("abc").coerce(KeyKind::Integer),
            RowKey::from("abc")
        );
        assert_eq!(RowKey::Int(5).coerce(KeyKind::Text), RowKey::from("5"));
    }

    #[test]
    fn key_serializes_untagged() {
        assert_eq!(serde_json::to_value(RowKey::Int(3)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(RowKey::from("x")).unwrap(), json!("x"));
        let k: RowKey = serde_json::from_value(json!("x")).unwrap();
        assert_eq!(k, RowKey::from("x"));
    }

    #[test]
    fn display_joins_arrays_and_blanks_null() {
        assert_eq!(display_value(&json!(["a", 2, null])), "a, 2, ");
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!("plain")), "plain");
    }

    #[test]
    fn nocase_ordering_ignores_case() {
        let a = json!("apple");
        let b = json!("Banana");
        assert_eq!(compare_values(Some(&a), Some(&b), true), Ordering::Less);
        assert_eq!(compare_values(Some(&a), Some(&b), false), Ordering::Greater);
    }

    #[test]
    fn nulls_sort_last() {
        let one = json!(1);
        assert_eq!(compare_values(None, Some(&one), false), Ordering::Greater);
        assert_eq!(
            compare_values(Some(&Value::Null), Some(&one), false),
            Ordering::Greater
        );
    }

    #[test]
    fn numeric_equality_crosses_representations() {
        assert!(values_equal(&json!(2), &json!(2.0)));
        assert!(!values_equal(&json!("2"), &json!(2)));
    }
}
