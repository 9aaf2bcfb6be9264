//! Call logging for arbitrary functions.
//!
//! `FunctionLogger::wrap` returns a [`Logged`] wrapper that records the
//! serialized arguments, the output or error, and timing of every call, and
//! submits one record per call through the exporter. The wrapped function's
//! result is returned untouched.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::coerce::to_field_value;
use crate::remap::FieldRecord;
use crate::telemetry::Exporter;
use crate::telemetry::keys::*;

/// `error.type` for a call that panicked.
pub const PANICKED: &str = "panic";
/// `error.type` for an async call dropped before it completed.
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct FunctionLogger {
    exporter: Exporter,
    source: Arc<str>,
}

impl FunctionLogger {
    pub fn new(exporter: Exporter, source: impl Into<Arc<str>>) -> Self {
        Self {
            exporter,
            source: source.into(),
        }
    }

    pub fn wrap<F>(&self, name: impl Into<String>, f: F) -> Logged<F> {
        Logged {
            name: name.into(),
            f,
            exporter: self.exporter.clone(),
            source: self.source.clone(),
        }
    }
}

/// A function plus the logger that records its calls.
///
/// Arguments are passed as one value; use a tuple for several.
#[derive(Debug, Clone)]
pub struct Logged<F> {
    name: String,
    f: F,
    exporter: Exporter,
    source: Arc<str>,
}

impl<F> Logged<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn guard<A: Serialize>(&self, args: &A) -> CallGuard {
        CallGuard::open(&self.name, &self.source, to_field_value(args), self.exporter.clone())
    }

    /// Call a fallible function. `Err` is recorded and returned as is.
    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Serialize,
        T: Serialize,
        E: Display + Debug,
    {
        let guard = self.guard(&args);
        let result = (self.f)(args);
        guard.complete(&result);
        result
    }

    /// Call an infallible function and record its return value.
    pub fn run<A, T>(&self, args: A) -> T
    where
        F: Fn(A) -> T,
        A: Serialize,
        T: Serialize,
    {
        let guard = self.guard(&args);
        let out = (self.f)(args);
        guard.succeed(to_field_value(&out));
        out
    }

    /// Async [`call`](Self::call). Dropping the future early records a cancelled call.
    pub async fn call_async<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Serialize,
        T: Serialize,
        E: Display + Debug,
    {
        let guard = self.guard(&args);
        let result = (self.f)(args).await;
        guard.complete(&result);
        result
    }

    /// Async [`run`](Self::run).
    pub async fn run_async<A, Fut, T>(&self, args: A) -> T
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
        A: Serialize,
        T: Serialize,
    {
        let guard = self.guard(&args);
        let out = (self.f)(args).await;
        guard.succeed(to_field_value(&out));
        out
    }
}

/// Holds the record of one call in flight and submits it exactly once:
/// on completion, or from `Drop` if the call never completed.
struct CallGuard {
    record: Option<FieldRecord>,
    start: chrono::DateTime<Utc>,
    exporter: Exporter,
}

impl CallGuard {
    fn open(name: &str, source: &str, input: Value, exporter: Exporter) -> Self {
        let start = Utc::now();
        let mut record = Map::new();
        record.insert(FIELD_NAME.into(), Value::from(name));
        record.insert(FIELD_SOURCE.into(), Value::from(source));
        record.insert(FIELD_FN_INPUT.into(), input);
        record.insert(FIELD_START_TIME.into(), Value::from(start.to_rfc3339()));
        record.insert(FIELD_START_TIMESTAMP.into(), Value::from(start.timestamp()));
        Self {
            record: Some(record),
            start,
            exporter,
        }
    }

    fn complete<T: Serialize, E: Display + Debug>(self, result: &Result<T, E>) {
        match result {
            Ok(value) => self.succeed(to_field_value(value)),
            Err(e) => self.fail(
                std::any::type_name::<E>(),
                e.to_string(),
                format!("{e:?}"),
            ),
        }
    }

    fn succeed(mut self, output: Value) {
        if let Some(rec) = self.record.as_mut() {
            rec.insert(FIELD_FN_OUTPUT.into(), output);
            rec.insert(FIELD_STATUS.into(), Value::from("ok"));
        }
        self.submit();
    }

    fn fail(mut self, kind: &str, message: String, stack: String) {
        self.mark_failed(kind, message, stack);
        self.submit();
    }

    fn mark_failed(&mut self, kind: &str, message: String, stack: String) {
        if let Some(rec) = self.record.as_mut() {
            rec.insert(FIELD_STATUS.into(), Value::from("error"));
            rec.insert(FIELD_ERROR_TYPE.into(), Value::from(kind));
            rec.insert(FIELD_ERROR_MESSAGE.into(), Value::from(message));
            rec.insert(FIELD_ERROR_STACK.into(), Value::from(stack));
        }
    }

    fn submit(&mut self) {
        let Some(mut rec) = self.record.take() else {
            return;
        };
        let end = Utc::now();
        rec.insert(FIELD_END_TIME.into(), Value::from(end.to_rfc3339()));
        rec.insert(FIELD_END_TIMESTAMP.into(), Value::from(end.timestamp()));
        rec.insert(
            FIELD_DURATION_MS.into(),
            Value::from((end - self.start).num_milliseconds()),
        );
        self.exporter.submit(rec);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.record.is_none() {
            return;
        }
        if std::thread::panicking() {
            self.mark_failed(PANICKED, "function panicked".into(), String::new());
        } else {
            self.mark_failed(CANCELLED, "call dropped before completion".into(), String::new());
        }
        self.submit();
    }
}
