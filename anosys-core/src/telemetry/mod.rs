//! Span model, field extraction and the exporter that ships records.
//!
//! Every record, whichever path produced it (interceptor span, function
//! logger, raw event), goes through [`Exporter::send_record`]: remap under
//! the shared key registry, then one transport attempt. Failures are logged
//! and dropped; nothing here ever fails the instrumented call.

pub mod extract;
pub mod keys;
pub mod span;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use span::{SpanContext, SpanKind, SpanRecord, SpanStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::CoreResult;
use crate::registry::KeyRegistry;
use crate::remap::{FieldRecord, WireRecord, remap};
use crate::transport::{HttpTransport, Transport};
use extract::{ExtractOptions, extract_span_info};

/// Cheap to clone; clones share the key registry and the transport.
#[derive(Clone)]
pub struct Exporter {
    registry: Arc<KeyRegistry>,
    transport: Arc<dyn Transport>,
    source: Arc<str>,
    verbose: bool,
    report_abandoned_streams: bool,
    inflight: Arc<Inflight>,
}

/// Count of detached sends not yet finished.
#[derive(Debug, Default)]
struct Inflight {
    count: AtomicUsize,
    idle: tokio::sync::Notify,
}

/// Decrements the in-flight count when the send ends or its task is dropped.
struct InflightGuard(Arc<Inflight>);

impl InflightGuard {
    fn new(inflight: &Arc<Inflight>) -> Self {
        inflight.count.fetch_add(1, Ordering::SeqCst);
        Self(inflight.clone())
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("endpoint", &self.transport.endpoint())
            .field("source", &self.source)
            .field("verbose", &self.verbose)
            .field("registered_fields", &self.registry.len())
            .finish()
    }
}

impl Exporter {
    pub fn new(registry: KeyRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry: Arc::new(registry),
            transport,
            source: Arc::from(DEFAULT_SPAN_SOURCE),
            verbose: false,
            report_abandoned_streams: false,
            inflight: Arc::default(),
        }
    }

    /// Resolve the collector endpoint and build an HTTP-backed exporter.
    pub async fn from_config(cfg: &Config) -> CoreResult<Self> {
        let endpoint = cfg.resolve_endpoint().await;
        let api_key = cfg
            .api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()));
        let transport = HttpTransport::new(endpoint, api_key, &cfg.http)?;
        tracing::info!(
            endpoint = transport.endpoint(),
            verbose = cfg.verbose,
            "anosys telemetry ready"
        );
        let mut exporter =
            Self::new(KeyRegistry::new(cfg.counters), Arc::new(transport)).with_verbose(cfg.verbose);
        if let Some(source) = &cfg.source {
            exporter = exporter.with_source(source.as_str());
        }
        exporter.report_abandoned_streams = cfg.report_abandoned_streams;
        Ok(exporter)
    }

    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_abandoned_stream_reports(mut self, enabled: bool) -> Self {
        self.report_abandoned_streams = enabled;
        self
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn reports_abandoned_streams(&self) -> bool {
        self.report_abandoned_streams
    }

    pub fn remap(&self, record: &FieldRecord) -> WireRecord {
        remap(&self.registry, record)
    }

    /// Remap and deliver one record. Transport failures are logged, never returned.
    pub async fn send_record(&self, record: &FieldRecord) {
        let wire = self.remap(record);
        if wire.is_empty() {
            tracing::debug!("telemetry record has no non-null fields; skipped");
            return;
        }
        let payload = self.verbose.then(|| payload_text(&wire));
        if let Some(p) = &payload {
            tracing::debug!(payload = %p, "sending telemetry record");
        }
        if let Err(e) = self.transport.send(&wire).await {
            match payload {
                Some(p) => tracing::warn!(
                    error = %e,
                    endpoint = self.transport.endpoint(),
                    payload = %p,
                    "telemetry send failed"
                ),
                None => tracing::warn!(
                    error = %e,
                    endpoint = self.transport.endpoint(),
                    "telemetry send failed"
                ),
            }
        }
    }

    /// Extract, remap and send a finished span.
    pub async fn export_span(&self, span: &SpanRecord) {
        let opts = ExtractOptions {
            source: &self.source,
            ..ExtractOptions::default()
        };
        let record = extract_span_info(span, &opts);
        self.send_record(&record).await;
    }

    /// Send an arbitrary caller-built record through the same remap and transport path.
    pub async fn log_event(&self, record: FieldRecord) {
        self.send_record(&record).await;
    }

    /// Fire-and-forget [`send_record`](Self::send_record).
    ///
    /// Inside a tokio runtime the send is spawned on it. Outside one, a
    /// helper thread drives it on its own current-thread runtime.
    pub fn submit(&self, record: FieldRecord) {
        let exporter = self.clone();
        let guard = InflightGuard::new(&self.inflight);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                exporter.send_record(&record).await;
                drop(guard);
            });
            return;
        }
        let spawned = std::thread::Builder::new()
            .name("anosys-submit".into())
            .spawn(move || {
                let _guard = guard;
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(exporter.send_record(&record)),
                    Err(e) => tracing::warn!(error = %e, "no runtime for telemetry send; record dropped"),
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not start telemetry thread; record dropped");
        }
    }

    /// Wait until every detached send has finished, for at most `timeout`.
    /// Returns `false` if sends were still running when the time ran out.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inflight.idle.notified();
                if self.inflight.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Fire-and-forget [`export_span`](Self::export_span).
    pub fn submit_span(&self, span: &SpanRecord) {
        let opts = ExtractOptions {
            source: &self.source,
            ..ExtractOptions::default()
        };
        self.submit(extract_span_info(span, &opts));
    }
}

fn payload_text(wire: &WireRecord) -> String {
    serde_json::to_string(wire).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}
