//! Pending query queue
//!
//! The protocol is pipelined: a client may send several requests before the
//! first response arrives. This FIFO records every query-bearing request at
//! the time it is forwarded, so the database-side pipeline knows which SQL
//! text (and which Bind, for extended queries) produced the `DataRow`s it
//! is currently reading.
//!
//! It is the only state shared across the two pipeline tasks with
//! cross-task hand-off: the client side pushes, the database side peeks at
//! the head for every data packet and pops it on `ReadyForQuery`. The
//! queue is abandoned at session teardown; no flush is required.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::protocol::postgres::messages::{BindPacket, ExecutePacket};

/// A query awaiting its response from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingQuery {
    /// A simple 'Q' query
    Simple {
        /// The SQL text as forwarded to the database
        sql: String,
    },
    /// An extended Parse/Bind/Execute query
    Extended {
        /// SQL text of the executed statement
        sql: String,
        /// The Bind that created the executed portal
        bind: BindPacket,
        /// The Execute message that triggered the query
        execute: ExecutePacket,
    },
}

impl PendingQuery {
    /// The SQL text that produced this query.
    pub fn sql(&self) -> &str {
        match self {
            PendingQuery::Simple { sql } => sql,
            PendingQuery::Extended { sql, .. } => sql,
        }
    }

    /// The Bind of an extended query, if any.
    pub fn bind(&self) -> Option<&BindPacket> {
        match self {
            PendingQuery::Simple { .. } => None,
            PendingQuery::Extended { bind, .. } => Some(bind),
        }
    }
}

/// FIFO of queries whose responses have not completed yet.
#[derive(Debug, Default)]
pub struct PendingQueryQueue {
    queue: Mutex<VecDeque<PendingQuery>>,
}

impl PendingQueryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a query at request time.
    pub fn push(&self, query: PendingQuery) {
        self.queue.lock().push_back(query);
    }

    /// Clone the head without removing it. Every `DataRow` of a response is
    /// attributed to the same head entry.
    pub fn peek(&self) -> Option<PendingQuery> {
        self.queue.lock().front().cloned()
    }

    /// Discard the head. Called on `ReadyForQuery`.
    pub fn pop(&self) -> Option<PendingQuery> {
        self.queue.lock().pop_front()
    }

    /// Number of unanswered queries.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether no queries are in flight.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
