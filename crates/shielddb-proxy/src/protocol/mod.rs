//! Wire protocol support.
//!
//! Only the PostgreSQL v3 protocol is implemented; the proxy is transparent
//! and touches exactly the messages the data path needs to inspect or
//! rewrite.

pub mod postgres;
