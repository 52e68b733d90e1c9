//! Logging macros that set target to "shielddb_proxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "shielddb_proxy::server::session::backend"), creating overly
//! verbose logger names in downstream collectors. These macros ensure all
//! logs from this crate use a single "shielddb_proxy" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "shielddb_proxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "shielddb_proxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "shielddb_proxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "shielddb_proxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "shielddb_proxy", $($arg)*) };
}
