//! Proxy server: listener, per-session pipelines, metrics

mod listener;
pub mod metrics;
pub mod session;
mod stream;

pub use listener::Listener;
pub use metrics::{DurationHistogram, ProxyMetrics};
pub use session::ProxyHandlers;
pub use stream::NetworkStream;
