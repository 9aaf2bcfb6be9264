use serde::Serialize;
use serde_json::{Number, Value};

/// Transport-safe scalar. Composite values never reach the wire as structures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransportValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl TransportValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<TransportValue> for Value {
    fn from(v: TransportValue) -> Self {
        match v {
            TransportValue::Null => Value::Null,
            TransportValue::Bool(b) => Value::Bool(b),
            TransportValue::Number(n) => Value::Number(n),
            TransportValue::String(s) => Value::String(s),
        }
    }
}

/// Scalars pass through, null stays null, objects and arrays become compact JSON text.
pub fn coerce(value: &Value) -> TransportValue {
    match value {
        Value::Null => TransportValue::Null,
        Value::Bool(b) => TransportValue::Bool(*b),
        Value::Number(n) => TransportValue::Number(n.clone()),
        Value::String(s) => TransportValue::String(s.clone()),
        composite @ (Value::Array(_) | Value::Object(_)) => {
            TransportValue::String(composite.to_string())
        }
    }
}

/// Convert any serializable value into a field value.
///
/// Values serde cannot represent as JSON (e.g. maps with non-string keys)
/// become a placeholder string so the rest of the record still ships.
pub fn to_field_value<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "field value is not representable as JSON; substituting placeholder");
            Value::String(format!("<unserializable: {e}>"))
        }
    }
}

/// Re-serialize text that holds a JSON object or array so equal documents
/// produce identical strings; anything else is returned trimmed.
pub fn normalize_json_text(text: &str) -> String {
    let trimmed = text.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(parsed) = serde_json::from_str::<Value>(trimmed)
    {
        return parsed.to_string();
    }
    trimmed.to_string()
}
