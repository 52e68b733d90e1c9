//! PostgreSQL protocol constants
//!
//! This module defines constants for the PostgreSQL wire protocol version 3.0.
//! Reference: <https://www.postgresql.org/docs/current/protocol-message-formats.html>

// ============================================================================
// Special Request Codes (used in startup-phase messages)
// ============================================================================

/// SSL request code - sent instead of StartupMessage to request SSL
/// Value: 80877103 (0x04D2162F)
pub const SSL_REQUEST_CODE: u32 = 80877103;

/// Response byte when the server accepts an SSL request
pub const SSL_ALLOW: u8 = b'S';

/// Response byte when the server denies an SSL request
pub const SSL_DENY: u8 = b'N';

// ============================================================================
// Frontend Message Types (client -> server)
// ============================================================================

/// Simple query ('Q') - executes a SQL query string
pub const MSG_QUERY: u8 = b'Q';

/// Parse ('P') - prepare a statement (extended query protocol)
pub const MSG_PARSE: u8 = b'P';

/// Bind ('B') - bind parameters to prepared statement
pub const MSG_BIND: u8 = b'B';

/// Execute ('E') - execute a bound portal
pub const MSG_EXECUTE: u8 = b'E';

/// Terminate ('X') - client requests connection close
pub const MSG_TERMINATE: u8 = b'X';

// ============================================================================
// Backend Message Types (server -> client)
// ============================================================================

/// Data row ('D') - a row of query result data
pub const MSG_DATA_ROW: u8 = b'D';

/// Row description ('T') - describes columns in query result
pub const MSG_ROW_DESCRIPTION: u8 = b'T';

/// Parameter description ('t') - describes statement parameters
pub const MSG_PARAMETER_DESCRIPTION: u8 = b't';

/// Ready for query ('Z') - server is ready for a new query
pub const MSG_READY_FOR_QUERY: u8 = b'Z';

/// Parameter status ('S') - server configuration parameter report
pub const MSG_PARAMETER_STATUS: u8 = b'S';

/// Error response ('E') - error occurred
pub const MSG_ERROR_RESPONSE: u8 = b'E';

/// Parse complete ('1') - Parse command succeeded
pub const MSG_PARSE_COMPLETE: u8 = b'1';

/// Bind complete ('2') - Bind command succeeded
pub const MSG_BIND_COMPLETE: u8 = b'2';

/// Command complete ('C') - query execution complete
pub const MSG_COMMAND_COMPLETE: u8 = b'C';

/// Empty query response ('I') - query string was empty
pub const MSG_EMPTY_QUERY: u8 = b'I';

/// No data ('n') - statement returns no rows
pub const MSG_NO_DATA: u8 = b'n';

/// Portal suspended ('s') - execution suspended by row limit
pub const MSG_PORTAL_SUSPENDED: u8 = b's';

// ============================================================================
// Error/Notice Field Types
// ============================================================================

/// Severity - ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
pub const ERROR_FIELD_SEVERITY: u8 = b'S';

/// SQLSTATE code - 5-character error code
pub const ERROR_FIELD_CODE: u8 = b'C';

/// Message - primary human-readable error message
pub const ERROR_FIELD_MESSAGE: u8 = b'M';

// ============================================================================
// SQLSTATE Codes (for proxy-generated errors)
// ============================================================================

/// Syntax error or access rule violation - used for censored queries and
/// for decode failures surfaced to the client
pub const SQLSTATE_ACCESS_RULE_VIOLATION: &str = "42000";

// ============================================================================
// Transaction Status (in ReadyForQuery message)
// ============================================================================

/// Idle - not in a transaction block
pub const TXN_STATUS_IDLE: u8 = b'I';

/// The canonical ReadyForQuery packet with idle status.
/// 'Z', length 5 (4-byte length field + 1 status byte), 'I'.
pub const READY_FOR_QUERY_IDLE: [u8; 6] = [MSG_READY_FOR_QUERY, 0, 0, 0, 5, TXN_STATUS_IDLE];

/// The Terminate packet: 'X' with an empty payload.
pub const TERMINATE_PACKET: [u8; 5] = [MSG_TERMINATE, 0, 0, 0, 4];

// ============================================================================
// Data Formats and Type OIDs
// ============================================================================

/// Text format code in Bind result formats and RowDescription fields
pub const FORMAT_TEXT: i16 = 0;

/// Binary format code
pub const FORMAT_BINARY: i16 = 1;

/// OID of the BYTEA type. Encrypted column payloads are stored as BYTEA
/// regardless of the logical column type.
pub const BYTEA_OID: u32 = 17;

// ============================================================================
// Helper Functions
// ============================================================================

/// Get a human-readable name for a backend (server->client) message type.
///
/// Note: Some message type bytes are shared between frontend and backend.
/// This function returns the backend interpretation.
pub fn backend_message_name(msg_type: u8) -> &'static str {
    match msg_type {
        MSG_DATA_ROW => "DataRow",
        MSG_ROW_DESCRIPTION => "RowDescription",
        MSG_PARAMETER_DESCRIPTION => "ParameterDescription",
        MSG_READY_FOR_QUERY => "ReadyForQuery",
        MSG_PARAMETER_STATUS => "ParameterStatus",
        MSG_ERROR_RESPONSE => "ErrorResponse",
        MSG_PARSE_COMPLETE => "ParseComplete",
        MSG_BIND_COMPLETE => "BindComplete",
        MSG_COMMAND_COMPLETE => "CommandComplete",
        MSG_EMPTY_QUERY => "EmptyQueryResponse",
        MSG_NO_DATA => "NoData",
        MSG_PORTAL_SUSPENDED => "PortalSuspended",
        _ => "Unknown",
    }
}

/// Get a human-readable name for a frontend (client->server) message type.
pub fn frontend_message_name(msg_type: u8) -> &'static str {
    match msg_type {
        MSG_QUERY => "Query",
        MSG_PARSE => "Parse",
        MSG_BIND => "Bind",
        MSG_EXECUTE => "Execute",
        MSG_TERMINATE => "Terminate",
        _ => "Other",
    }
}
