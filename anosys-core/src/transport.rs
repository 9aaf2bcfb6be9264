//! Delivery of wire records to the collector.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::HttpCfg;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::remap::WireRecord;

/// One attempt to deliver one record. No retry, no queue.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, record: &WireRecord) -> CoreResult<()>;

    /// Where records go, for logs.
    fn endpoint(&self) -> &str;
}

/// POSTs each record as a JSON object, bounded by `HttpCfg::timeout_ms`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        cfg: &HttpCfg,
    ) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::from_cfg(cfg)?,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, record: &WireRecord) -> CoreResult<()> {
        let bearer = self.api_key.as_ref().map(|k| k.expose_secret());
        self.http.post_record(&self.endpoint, record, bearer).await
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
