use std::collections::BTreeMap;
use std::fmt;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Flat payload map as produced by the center: `key -> raw JSON value`.
pub type FlatMap = serde_json::Map<String, serde_json::Value>;

/// A configuration leaf, classified at insertion time.
///
/// `Map` never appears at the top level of a flattened object (nested
/// tables become dotted keys); it survives only inside arrays, where
/// array-of-tables payloads keep their shape for [`Item::slice_map`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Time(OffsetDateTime),
    Undefined,
}

impl Value {
    /// Classifies a JSON value. Numbers prefer `Int` when they fit i64,
    /// then `Uint`, then `Float`. JSON has no time type, so timestamps
    /// arrive as strings and stay `String`; [`Item::time`] coerces them.
    pub fn from_json(value: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Undefined,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Classifies a TOML value. Datetimes become `Time` when they carry
    /// an offset (RFC 3339); local datetimes fall back to `String`.
    pub fn from_toml(value: &toml::Value) -> Value {
        use toml::Value as Toml;
        match value {
            Toml::String(s) => Value::String(s.clone()),
            Toml::Integer(i) => Value::Int(*i),
            Toml::Float(f) => Value::Float(*f),
            Toml::Boolean(b) => Value::Bool(*b),
            Toml::Datetime(dt) => {
                let rendered = dt.to_string();
                match OffsetDateTime::parse(&rendered, &Rfc3339) {
                    Ok(parsed) => Value::Time(parsed),
                    Err(_) => Value::String(rendered),
                }
            }
            Toml::Array(items) => {
                Value::Array(items.iter().map(Value::from_toml).collect())
            }
            Toml::Table(table) => Value::Map(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_toml(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value back to JSON, for snapshots and display.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Int(i) => Json::from(*i),
            Value::Uint(u) => Json::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Array(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Time(t) => t
                .format(&Rfc3339)
                .map(Json::String)
                .unwrap_or(Json::Null),
            Value::Undefined => Json::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Time(t) => match t.format(&Rfc3339) {
                Ok(rendered) => f.write_str(&rendered),
                Err(_) => Ok(()),
            },
            Value::Array(_) | Value::Map(_) => {
                write!(f, "{}", self.to_json())
            }
            Value::Undefined => Ok(()),
        }
    }
}

/// Flattens nested maps into dotted keys: `{"a": {"b": 1}}` becomes
/// `a.b -> 1`. Arrays are leaves and keep their contents whole.
pub fn flatten(map: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        flatten_into(key, value, &mut out);
    }
    out
}

/// Classifies and flattens a raw center payload in one pass.
pub fn flatten_json(flat: &FlatMap) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in flat {
        flatten_into(key, &Value::from_json(value), &mut out);
    }
    out
}

fn flatten_into(
    prefix: &str,
    value: &Value,
    out: &mut BTreeMap<String, Value>,
) {
    match value {
        Value::Map(map) => {
            for (key, nested) in map {
                flatten_into(&format!("{prefix}.{key}"), nested, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// One configuration lookup result, carrying the value (or its absence)
/// through the coercing accessors.
#[derive(Debug, Clone)]
pub struct Item {
    value: Option<Value>,
}

impl Item {
    pub(crate) fn present(value: Value) -> Self {
        Self { value: Some(value) }
    }

    pub(crate) fn missing() -> Self {
        Self { value: None }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Raw value without coercion; `Undefined` when absent.
    pub fn value(&self) -> Value {
        self.value.clone().unwrap_or(Value::Undefined)
    }

    /// Replaces a missing item with a fallback value.
    pub fn or(
        self,
        fallback: Value,
    ) -> Item {
        if self.exists() { self } else { Item::present(fallback) }
    }

    /// Display form of any value; empty for missing or `Undefined`.
    pub fn string(&self) -> String {
        match &self.value {
            Some(value) => value.to_string(),
            None => String::new(),
        }
    }

    /// Int, Uint and Float (truncated) convert directly, Bool maps to
    /// 0/1, String parses as decimal. Everything else is 0.
    pub fn int(&self) -> i64 {
        match &self.value {
            Some(Value::Int(i)) => *i,
            Some(Value::Uint(u)) => *u as i64,
            Some(Value::Float(f)) => *f as i64,
            Some(Value::Bool(b)) => i64::from(*b),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// [`Item::int`] reinterpreted as unsigned; negative values wrap.
    pub fn uint(&self) -> u64 {
        match &self.value {
            Some(Value::Uint(u)) => *u,
            _ => self.int() as u64,
        }
    }

    pub fn float(&self) -> f64 {
        match &self.value {
            Some(Value::Int(i)) => *i as f64,
            Some(Value::Uint(u)) => *u as f64,
            Some(Value::Float(f)) => *f,
            Some(Value::Bool(b)) => f64::from(u8::from(*b)),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Numbers are true when non-zero, strings parse `true`/`false` and
    /// `1`/`0`, arrays are true when non-empty, times when after the
    /// epoch. Missing and `Undefined` are false.
    pub fn boolean(&self) -> bool {
        match &self.value {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(i)) => *i != 0,
            Some(Value::Uint(u)) => *u != 0,
            Some(Value::Float(f)) => *f != 0.0,
            Some(Value::String(s)) => match s.trim() {
                "1" => true,
                "0" => false,
                other => other.parse().unwrap_or(false),
            },
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Time(t)) => t.unix_timestamp() > 0,
            _ => false,
        }
    }

    /// `Time` values convert directly, strings parse as RFC 3339.
    /// Everything else is the unix epoch.
    pub fn time(&self) -> OffsetDateTime {
        match &self.value {
            Some(Value::Time(t)) => *t,
            Some(Value::String(s)) => {
                OffsetDateTime::parse(s.trim(), &Rfc3339)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            }
            _ => OffsetDateTime::UNIX_EPOCH,
        }
    }

    /// `YYYY-MM-DD hh:mm:ss` rendering of [`Item::time`].
    pub fn to_datetime(&self) -> String {
        let layout = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        );
        self.time().format(&layout).unwrap_or_default()
    }

    /// Array contents, or a one-element vector wrapping a scalar.
    /// Missing items yield an empty vector.
    pub fn slice(&self) -> Vec<Value> {
        match &self.value {
            Some(Value::Array(items)) => items.clone(),
            Some(value) => vec![value.clone()],
            None => Vec::new(),
        }
    }

    /// Array-of-tables payloads; non-map elements are skipped.
    pub fn slice_map(&self) -> Vec<BTreeMap<String, Value>> {
        match &self.value {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Map(map) => Some(map.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
