//! Shared protocol state
//!
//! One [`ProtocolState`] exists per session. The client pipeline is the
//! only writer of the registries and the only producer of the pending
//! queue; the database pipeline is the only consumer. The per-query
//! placeholder settings are written on `Parse` and cleared on
//! `ReadyForQuery`.

use parking_lot::Mutex;

use crate::inspect::ColumnEncryptionSetting;
use crate::protocol::postgres::constants::{
    MSG_BIND, MSG_DATA_ROW, MSG_EXECUTE, MSG_PARAMETER_DESCRIPTION, MSG_PARSE, MSG_QUERY,
    MSG_READY_FOR_QUERY, MSG_ROW_DESCRIPTION, MSG_TERMINATE,
};
use crate::protocol::postgres::Packet;

use super::pending::PendingQueryQueue;
use super::registry::{CursorRegistry, StatementRegistry};

/// Classification of a client-originated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientPacketKind {
    /// 'Q' simple query
    SimpleQuery,
    /// 'P' parse (prepare statement)
    ParseStatement,
    /// 'B' bind (create portal)
    BindStatement,
    /// 'E' execute portal
    ExecutePortal,
    /// 'X' terminate
    Terminate,
    /// Anything else, forwarded untouched
    #[default]
    Other,
}

/// Classification of a server-originated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerPacketKind {
    /// 'D' data row
    DataRow,
    /// 'T' row description
    RowDescription,
    /// 't' parameter description
    ParameterDescription,
    /// 'Z' ready for query
    ReadyForQuery,
    /// Anything else, forwarded untouched
    #[default]
    Other,
}

/// Classify a client packet by its type byte. Startup-phase packets carry
/// no type byte and classify as `Other`.
pub fn classify_client(packet: &Packet) -> ClientPacketKind {
    match packet.message_type {
        Some(MSG_QUERY) => ClientPacketKind::SimpleQuery,
        Some(MSG_PARSE) => ClientPacketKind::ParseStatement,
        Some(MSG_BIND) => ClientPacketKind::BindStatement,
        Some(MSG_EXECUTE) => ClientPacketKind::ExecutePortal,
        Some(MSG_TERMINATE) => ClientPacketKind::Terminate,
        _ => ClientPacketKind::Other,
    }
}

/// Classify a server packet by its type byte.
pub fn classify_server(packet: &Packet) -> ServerPacketKind {
    match packet.message_type {
        Some(MSG_DATA_ROW) => ServerPacketKind::DataRow,
        Some(MSG_ROW_DESCRIPTION) => ServerPacketKind::RowDescription,
        Some(MSG_PARAMETER_DESCRIPTION) => ServerPacketKind::ParameterDescription,
        Some(MSG_READY_FOR_QUERY) => ServerPacketKind::ReadyForQuery,
        _ => ServerPacketKind::Other,
    }
}

/// Protocol state shared by the two pipeline tasks of one session.
#[derive(Default)]
pub struct ProtocolState {
    /// Prepared statements registered by Parse messages
    pub statements: StatementRegistry,
    /// Portals registered by Bind messages
    pub portals: CursorRegistry,
    /// Queries awaiting responses
    pub pending: PendingQueryQueue,
    /// Placeholder encryption settings captured at Parse time, consumed by
    /// the ParameterDescription rewrite, cleared on ReadyForQuery
    placeholder_settings: Mutex<Option<Vec<Option<ColumnEncryptionSetting>>>>,
    /// Most recently observed client packet classification
    last_client: Mutex<ClientPacketKind>,
    /// Most recently observed server packet classification
    last_server: Mutex<ServerPacketKind>,
}

impl ProtocolState {
    /// Create fresh state for a new session.
    pub fn new() -> Self {
        Self {
            statements: StatementRegistry::new(),
            portals: CursorRegistry::new(),
            pending: PendingQueryQueue::new(),
            placeholder_settings: Mutex::new(None),
            last_client: Mutex::new(ClientPacketKind::Other),
            last_server: Mutex::new(ServerPacketKind::Other),
        }
    }

    /// Record and return the classification of a client packet.
    pub fn observe_client_packet(&self, packet: &Packet) -> ClientPacketKind {
        let kind = classify_client(packet);
        *self.last_client.lock() = kind;
        kind
    }

    /// Record and return the classification of a server packet.
    pub fn observe_server_packet(&self, packet: &Packet) -> ServerPacketKind {
        let kind = classify_server(packet);
        *self.last_server.lock() = kind;
        kind
    }

    /// The classification of the most recent client packet.
    pub fn last_client_packet(&self) -> ClientPacketKind {
        *self.last_client.lock()
    }

    /// The classification of the most recent server packet.
    pub fn last_server_packet(&self) -> ServerPacketKind {
        *self.last_server.lock()
    }

    /// Store the placeholder settings recognized for the current query.
    pub fn set_placeholder_settings(&self, settings: Vec<Option<ColumnEncryptionSetting>>) {
        *self.placeholder_settings.lock() = Some(settings);
    }

    /// The placeholder settings for the current query, if any.
    pub fn placeholder_settings(&self) -> Option<Vec<Option<ColumnEncryptionSetting>>> {
        self.placeholder_settings.lock().clone()
    }

    /// Drop the per-query placeholder settings. Called on ReadyForQuery.
    pub fn clear_placeholder_settings(&self) {
        *self.placeholder_settings.lock() = None;
    }
}
