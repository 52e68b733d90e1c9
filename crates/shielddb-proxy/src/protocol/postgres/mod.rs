//! PostgreSQL wire protocol (version 3.0)
//!
//! - `constants`: message type bytes, request codes, error fields, OIDs
//! - `messages`: typed views over the message payloads the proxy rewrites
//! - `codec`: framed packet reading and writing with in-place mutation

pub mod codec;
pub mod constants;
pub mod messages;

pub use codec::Packet;
