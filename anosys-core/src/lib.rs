pub mod coerce;
pub mod config;
pub mod decorator;
pub mod error;
pub mod http_client;
pub mod interceptor;
pub mod model;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod remap;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use config::Config;
pub use decorator::{FunctionLogger, Logged};
pub use error::{AnosysError, CoreResult};
pub use interceptor::Instrumented;
pub use provider::{AiClient, ChatOutput};
pub use telemetry::Exporter;
