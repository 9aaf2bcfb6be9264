//! Semantic field name → short wire key table.
//!
//! Keys are assigned once and reused for the lifetime of the registry: the
//! collector interprets historical data by key, so an assignment is never
//! revised or evicted. Unknown fields get a key minted from one of three
//! independent counters, picked by the class of the value that first
//! introduced the field.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;

use crate::config::CounterCfg;
use crate::telemetry::keys::SEEDED_KEYS;

pub const STRING_PREFIX: &str = "cvs";
pub const NUMBER_PREFIX: &str = "cvn";
pub const BOOL_PREFIX: &str = "cvb";

/// Classification of a value for key minting. Total over JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueClass {
    Bool,
    Number,
    Other,
}

impl ValueClass {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            _ => Self::Other,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Bool => BOOL_PREFIX,
            Self::Number => NUMBER_PREFIX,
            Self::Other => STRING_PREFIX,
        }
    }
}

/// Current value of each class counter (the next index it would mint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub string: u64,
    pub number: u64,
    pub boolean: u64,
}

#[derive(Debug)]
struct Table {
    by_field: HashMap<String, String>,
    issued: HashSet<String>,
    counters: CounterSnapshot,
}

impl Table {
    fn counter_mut(&mut self, class: ValueClass) -> &mut u64 {
        match class {
            ValueClass::Bool => &mut self.counters.boolean,
            ValueClass::Number => &mut self.counters.number,
            ValueClass::Other => &mut self.counters.string,
        }
    }

    fn mint(&mut self, class: ValueClass) -> String {
        loop {
            let counter = self.counter_mut(class);
            let key = format!("{}{}", class.prefix(), *counter);
            *counter += 1;
            // Seeded keys can sit inside a counter's range (cvs199, cvs200).
            if !self.issued.contains(&key) {
                return key;
            }
        }
    }
}

/// Process-scoped, additive-only key table. Shared across tasks behind `Arc`.
#[derive(Debug)]
pub struct KeyRegistry {
    inner: Mutex<Table>,
}

impl KeyRegistry {
    /// Registry pre-populated with the well-known fields.
    pub fn new(counters: CounterCfg) -> Self {
        let reg = Self::empty(counters);
        {
            let mut table = reg.lock();
            for (field, key) in SEEDED_KEYS {
                table.by_field.insert((*field).to_string(), (*key).to_string());
                table.issued.insert((*key).to_string());
            }
        }
        reg
    }

    /// Registry with no seeded fields. Mostly useful in tests.
    pub fn empty(counters: CounterCfg) -> Self {
        Self {
            inner: Mutex::new(Table {
                by_field: HashMap::new(),
                issued: HashSet::new(),
                counters: CounterSnapshot {
                    string: counters.string,
                    number: counters.number,
                    boolean: counters.boolean,
                },
            }),
        }
    }

    /// Short key for `field`, minting one from `value`'s class on first sight.
    ///
    /// Lookups of already-registered fields never touch a counter, whatever `value` is.
    pub fn resolve(&self, field: &str, value: &Value) -> String {
        let mut table = self.lock();
        if let Some(key) = table.by_field.get(field) {
            return key.clone();
        }
        let key = table.mint(ValueClass::of(value));
        table.by_field.insert(field.to_string(), key.clone());
        table.issued.insert(key.clone());
        tracing::debug!(field, key = %key, "minted short key");
        key
    }

    pub fn lookup(&self, field: &str) -> Option<String> {
        self.lock().by_field.get(field).cloned()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.lock().counters
    }

    pub fn len(&self) -> usize {
        self.lock().by_field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        // Mutations are single inserts of fully formed keys; a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new(CounterCfg::default())
    }
}
