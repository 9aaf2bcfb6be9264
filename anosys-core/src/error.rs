use thiserror::Error;

/// Core error type for anosys.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum AnosysError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    /// Telemetry POST to the collector failed. Never surfaced to instrumented callers.
    #[error("telemetry transport failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnosysError {
    /// Stable short name, recorded as `error.type` on spans and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderError { .. } => "provider_error",
            Self::Transport { .. } => "transport",
            Self::Discovery(_) => "discovery",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, AnosysError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_includes_status_when_present() {
        let with = AnosysError::Transport {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(with.to_string(), "telemetry transport failed (502): bad gateway");

        let without = AnosysError::Transport {
            status: None,
            message: "timed out".into(),
        };
        assert_eq!(without.to_string(), "telemetry transport failed: timed out");
    }

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(AnosysError::Validation("x".into()).kind(), "validation");
        assert_eq!(
            AnosysError::RateLimited {
                provider: "openai".into(),
                retry_after: None
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(AnosysError::Other(anyhow::anyhow!("boom")).kind(), "other");
    }
}
