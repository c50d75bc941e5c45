use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Caller-owned customization map attached to every flow node
pub type Customizations = BTreeMap<String, CustomValue>;

/// Schema-free value stored in a node's customizations
///
/// The core treats these values as opaque. The only operation it performs on
/// them is a deep copy during duplication and, when enabled, identifier
/// remapping of string leaves.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(untagged)]
pub enum CustomValue {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Any JSON number, integers kept exact
    Number(serde_json::Number),
    /// Text
    String(String),
    /// Ordered list of values
    List(Vec<CustomValue>),
    /// Keyed map of values
    Map(BTreeMap<String, CustomValue>),
}

impl CustomValue {
    /// Check if the value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, CustomValue::Null)
    }

    /// Try to view the value as a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CustomValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to view the value as a floating point number
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CustomValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Try to view the value as a signed integer
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CustomValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Replace every string leaf that exactly matches a key of `ids` with the mapped value.
    ///
    /// Returns the number of replaced leaves.
    pub fn remap_references(&mut self, ids: &HashMap<String, String>) -> usize {
        match self {
            CustomValue::String(s) => match ids.get(s.as_str()) {
                Some(replacement) => {
                    *s = replacement.clone();
                    1
                }
                None => 0,
            },
            CustomValue::List(items) => items.iter_mut().map(|v| v.remap_references(ids)).sum(),
            CustomValue::Map(entries) => entries
                .values_mut()
                .map(|v| v.remap_references(ids))
                .sum(),
            CustomValue::Null | CustomValue::Bool(_) | CustomValue::Number(_) => 0,
        }
    }
}

impl From<serde_json::Value> for CustomValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CustomValue::Null,
            serde_json::Value::Bool(b) => CustomValue::Bool(b),
            serde_json::Value::Number(n) => CustomValue::Number(n),
            serde_json::Value::String(s) => CustomValue::String(s),
            serde_json::Value::Array(items) => {
                CustomValue::List(items.into_iter().map(CustomValue::from).collect())
            }
            serde_json::Value::Object(entries) => CustomValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, CustomValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&CustomValue> for serde_json::Value {
    fn from(value: &CustomValue) -> Self {
        match value {
            CustomValue::Null => serde_json::Value::Null,
            CustomValue::Bool(b) => serde_json::Value::Bool(*b),
            CustomValue::Number(n) => serde_json::Value::Number(n.clone()),
            CustomValue::String(s) => serde_json::Value::String(s.clone()),
            CustomValue::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            CustomValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for CustomValue {
    fn from(s: &str) -> Self {
        CustomValue::String(s.to_string())
    }
}

/// Non-finite floats have no JSON form and become `Null`
impl From<f64> for CustomValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(CustomValue::Null, CustomValue::Number)
    }
}

impl From<i64> for CustomValue {
    fn from(n: i64) -> Self {
        CustomValue::Number(n.into())
    }
}

impl From<u64> for CustomValue {
    fn from(n: u64) -> Self {
        CustomValue::Number(n.into())
    }
}

impl From<bool> for CustomValue {
    fn from(b: bool) -> Self {
        CustomValue::Bool(b)
    }
}
