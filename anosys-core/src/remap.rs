use serde::Serialize;
use serde_json::{Map, Value};

use crate::coerce::{TransportValue, coerce};
use crate::registry::KeyRegistry;

/// Semantic field name → value, in insertion order.
pub type FieldRecord = Map<String, Value>;

/// Short key → scalar, ready for the collector. Holds no nulls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WireRecord(Map<String, Value>);

impl WireRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn insert(&mut self, key: String, value: TransportValue) {
        self.0.insert(key, value.into());
    }
}

/// Rewrite a field record under short keys, dropping null fields.
pub fn remap(registry: &KeyRegistry, record: &FieldRecord) -> WireRecord {
    let mut wire = WireRecord::default();
    for (field, value) in record {
        if value.is_null() {
            continue;
        }
        let key = registry.resolve(field, value);
        wire.insert(key, coerce(value));
    }
    wire
}
