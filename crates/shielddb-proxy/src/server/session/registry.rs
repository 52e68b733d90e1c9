//! Prepared statement and portal registries
//!
//! PostgreSQL's extended query protocol names server-side objects: `Parse`
//! creates a prepared statement, `Bind` instantiates it as a portal
//! (cursor). The proxy shadows both so a later `Execute` can be correlated
//! back to the SQL text that produced it.
//!
//! Entries are never removed before session teardown. `Close` messages
//! pass through the proxy unobserved, so a long-lived connection that
//! churns named statements retains them here; in practice the registries
//! stay small because clients overwhelmingly use the unnamed statement.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{ProxyError, Result};
use crate::protocol::postgres::messages::BindPacket;

/// A prepared statement registered by a Parse message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    /// Statement name ("" for the unnamed statement)
    pub name: String,
    /// The SQL text as forwarded to the database
    pub query: String,
    /// Parameter type OIDs as forwarded to the database
    pub param_oids: Vec<u32>,
}

/// A portal (cursor) registered by a Bind message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
    /// The Bind that created this portal, as forwarded to the database
    pub bind: BindPacket,
    /// SQL text of the statement the portal was bound from
    pub statement_query: String,
}

impl Portal {
    /// Portal name ("" for the unnamed portal).
    pub fn name(&self) -> &str {
        &self.bind.portal
    }
}

/// Registry of prepared statements, keyed by name.
///
/// The unnamed statement ("") is always replaceable; named statements
/// reject duplicate registration, mirroring the database's own rules.
#[derive(Debug, Default)]
pub struct StatementRegistry {
    statements: Mutex<HashMap<String, PreparedStatement>>,
}

impl StatementRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement. Fails if a named statement with the same name
    /// already exists.
    pub fn add(&self, statement: PreparedStatement) -> Result<()> {
        let mut statements = self.statements.lock();
        if !statement.name.is_empty() && statements.contains_key(&statement.name) {
            return Err(ProxyError::Protocol(format!(
                "Prepared statement \"{}\" already exists",
                statement.name
            )));
        }
        statements.insert(statement.name.clone(), statement);
        Ok(())
    }

    /// Look up a statement by name.
    pub fn get(&self, name: &str) -> Option<PreparedStatement> {
        self.statements.lock().get(name).cloned()
    }

    /// Number of registered statements.
    pub fn len(&self) -> usize {
        self.statements.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.statements.lock().is_empty()
    }
}

/// Registry of portals, keyed by portal name. Same naming rules as
/// [`StatementRegistry`].
#[derive(Debug, Default)]
pub struct CursorRegistry {
    portals: Mutex<HashMap<String, Portal>>,
}

impl CursorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a portal. Fails if a named portal with the same name
    /// already exists.
    pub fn add(&self, portal: Portal) -> Result<()> {
        let mut portals = self.portals.lock();
        let name = portal.name().to_string();
        if !name.is_empty() && portals.contains_key(&name) {
            return Err(ProxyError::Protocol(format!(
                "Portal \"{}\" already exists",
                name
            )));
        }
        portals.insert(name, portal);
        Ok(())
    }

    /// Look up a portal by name.
    pub fn get(&self, name: &str) -> Option<Portal> {
        self.portals.lock().get(name).cloned()
    }

    /// Number of registered portals.
    pub fn len(&self) -> usize {
        self.portals.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.portals.lock().is_empty()
    }
}
