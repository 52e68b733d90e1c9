//! Client-to-database pipeline
//!
//! Reads framed packets from the client, runs the censor and the query
//! observers, and forwards (possibly rewritten) packets to the database.
//! Censored queries never reach the database: the client receives a
//! synthesized ErrorResponse plus ReadyForQuery and the session continues.
//!
//! The pipeline parks on request from the database side (TLS dance, SSL
//! deny restart) by surrendering its socket halves over the session's
//! rendezvous channel; a fresh pipeline is spawned with the new sockets.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::timeout;
use tracing::Instrument;

use crate::censor::Verdict;
use crate::error::{ProxyError, Result};
use crate::protocol::postgres::codec;
use crate::protocol::postgres::constants::{
    BYTEA_OID, MSG_ERROR_RESPONSE, READY_FOR_QUERY_IDLE, SQLSTATE_ACCESS_RULE_VIOLATION,
};
use crate::protocol::postgres::messages::{
    encode_error_response, parse_simple_query, BindPacket, ExecutePacket, ParsePacket,
};
use crate::protocol::postgres::Packet;
use crate::scrub::scrub_query;
use crate::server::stream::NetworkStream;

use super::pending::PendingQuery;
use super::registry::{Portal, PreparedStatement};
use super::state::ClientPacketKind;
use super::{ClientParts, SessionShared, SharedClientWriter};

/// What to do with a handled client packet.
enum PacketOutcome {
    /// Forward to the database
    Forward,
    /// Forward, then end the session cleanly (Terminate)
    ForwardAndClose,
    /// Drop the packet; the client has been answered by the censor
    Censored,
}

/// The censor/observer disposition of a query-bearing packet.
enum QueryDisposition {
    /// The censor rejected the query
    Blocked {
        /// Message for the synthesized ErrorResponse
        message: String,
    },
    /// Forward, with the observers' rewritten text if any
    Forward {
        /// `Some` when an observer changed the query
        rewritten: Option<String>,
    },
}

/// Spawn the client pipeline task.
///
/// `startup_phase` is true for the first spawn of a session and after
/// every respawn: the first packet read carries no type byte.
pub(crate) fn spawn_client_pipeline(
    shared: Arc<SessionShared>,
    client_read: ReadHalf<NetworkStream>,
    server_write: WriteHalf<NetworkStream>,
    client_writer: SharedClientWriter,
    startup_phase: bool,
) {
    let pipeline = ClientPipeline {
        shared,
        client_read,
        server_write,
        client_writer,
        startup_phase,
    };
    tokio::spawn(
        pipeline
            .run()
            .instrument(tracing::debug_span!("ProxyClientConnection")),
    );
}

struct ClientPipeline {
    shared: Arc<SessionShared>,
    client_read: ReadHalf<NetworkStream>,
    server_write: WriteHalf<NetworkStream>,
    client_writer: SharedClientWriter,
    startup_phase: bool,
}

impl ClientPipeline {
    async fn run(mut self) {
        loop {
            if self.shared.stop.is_requested() {
                self.park().await;
                return;
            }

            let packet = tokio::select! {
                biased;
                _ = self.shared.stop.notified() => {
                    self.park().await;
                    return;
                }
                result = codec::read_client_packet(&mut self.client_read, self.startup_phase) => {
                    match result {
                        Ok(packet) => packet,
                        Err(err) => {
                            // A stop may race the read failing; the parked
                            // sockets are still wanted in that case.
                            if self.shared.stop.is_requested() {
                                self.park().await;
                                return;
                            }
                            // EOF and closed connections are expected here
                            debug!("Can't read packet from client: {}", err);
                            let _ = self.shared.error_tx.send(err);
                            return;
                        }
                    }
                }
            };
            self.startup_phase = false;

            let started = Instant::now();
            let outcome = self
                .handle_packet(packet)
                .instrument(tracing::debug_span!("ProxyClientConnectionLoop"))
                .await;
            self.shared
                .metrics
                .request_processing_seconds
                .observe(started.elapsed());

            match outcome {
                Ok(PacketOutcome::Forward) => {}
                Ok(PacketOutcome::Censored) => {}
                Ok(PacketOutcome::ForwardAndClose) => {
                    let _ = self
                        .shared
                        .error_tx
                        .send(ProxyError::Connection("client terminated session".into()));
                    return;
                }
                Err(err) => {
                    let _ = self.shared.error_tx.send(err);
                    return;
                }
            }
        }
    }

    /// Surrender the socket halves to the database pipeline.
    async fn park(self) {
        let parts = ClientParts {
            client_read: self.client_read,
            server_write: self.server_write,
            client_writer: self.client_writer,
        };
        if self.shared.stop.park(parts).await {
            debug!("Client pipeline parked");
        } else {
            debug!("Session ended while client pipeline was parking");
        }
    }

    /// Classify the packet, apply censor/observer side effects and forward
    /// it unless it was censored.
    async fn handle_packet(&mut self, mut packet: Packet) -> Result<PacketOutcome> {
        let kind = self.shared.state.observe_client_packet(&packet);
        match kind {
            ClientPacketKind::SimpleQuery => {
                let query = parse_simple_query(&packet.payload)?;
                match self.observe_query(&query).await? {
                    QueryDisposition::Blocked { message } => {
                        self.reject_query(&message).await?;
                        return Ok(PacketOutcome::Censored);
                    }
                    QueryDisposition::Forward { rewritten } => {
                        // Pending queries carry the client's own text; the
                        // schema store resolves columns against it later.
                        self.shared
                            .state
                            .pending
                            .push(PendingQuery::Simple { sql: query });
                        if let Some(new_query) = rewritten {
                            packet.replace_query(&new_query);
                        }
                    }
                }
            }
            ClientPacketKind::ParseStatement => {
                if let QueryDisposition::Blocked { message } =
                    self.handle_parse(&mut packet).await?
                {
                    self.reject_query(&message).await?;
                    return Ok(PacketOutcome::Censored);
                }
            }
            ClientPacketKind::BindStatement => {
                self.handle_bind(&mut packet).await?;
            }
            ClientPacketKind::ExecutePortal => {
                self.handle_execute(&packet)?;
            }
            ClientPacketKind::Terminate => {
                self.forward(&packet).await?;
                debug!("Client sent Terminate");
                return Ok(PacketOutcome::ForwardAndClose);
            }
            ClientPacketKind::Other => {}
        }

        self.forward(&packet).await?;
        Ok(PacketOutcome::Forward)
    }

    /// Handle a Parse: censor/observe the statement text, register the
    /// prepared statement and rewrite type-aware parameter OIDs to BYTEA.
    async fn handle_parse(&mut self, packet: &mut Packet) -> Result<QueryDisposition> {
        let mut parse = ParsePacket::parse(&packet.payload)?;
        let original_query = parse.query.clone();

        let disposition = self.observe_query(&original_query).await?;
        let mut changed = false;
        match &disposition {
            QueryDisposition::Blocked { .. } => return Ok(disposition),
            QueryDisposition::Forward { rewritten } => {
                if let Some(new_query) = rewritten {
                    parse.query = new_query.clone();
                    changed = true;
                }
            }
        }

        // Encrypted values travel as BYTEA regardless of the column's
        // logical type; the declared parameter OIDs must agree with what
        // the database will actually receive.
        if let Some(settings) = self.shared.schema.lookup(&original_query) {
            for (i, oid) in parse.param_oids.iter_mut().enumerate() {
                if let Some(Some(setting)) = settings.get(i) {
                    if setting.type_aware && *oid != BYTEA_OID {
                        *oid = BYTEA_OID;
                        changed = true;
                    }
                }
            }
            self.shared.state.set_placeholder_settings(settings);
        }

        // Registration can outlive a statement the database rejects; such
        // entries are never cleaned up (Close is not tracked) and stay in
        // the registry until the session ends.
        self.shared.state.statements.add(PreparedStatement {
            name: parse.name.clone(),
            query: original_query,
            param_oids: parse.param_oids.clone(),
        })?;
        debug!(prepared_name = %parse.name, "Registered new prepared statement");

        if changed {
            packet.replace_parse(&parse);
        }
        Ok(QueryDisposition::Forward { rewritten: None })
    }

    /// Handle a Bind: let observers rewrite the parameter values, register
    /// the portal. A Bind for an unknown statement is forwarded untouched;
    /// the database will reject it.
    async fn handle_bind(&mut self, packet: &mut Packet) -> Result<()> {
        let mut bind = BindPacket::parse(&packet.payload)?;
        debug!(portal = %bind.portal, statement = %bind.statement, "Bind packet");

        let Some(statement) = self.shared.state.statements.get(&bind.statement) else {
            warn!(
                statement = %bind.statement,
                "Bind references unknown prepared statement, forwarding as-is"
            );
            return Ok(());
        };

        match self
            .shared
            .observers
            .on_bind(&self.shared.access, &statement.query, bind.parameters.clone())
            .await
        {
            Ok((new_parameters, changed)) => {
                if changed {
                    debug!("Updating bind packet");
                    bind.parameters = new_parameters;
                    packet.replace_bind(&bind);
                }
            }
            Err(err) if err.is_key_read_error() => return Err(err),
            Err(err) => {
                // Forward the packet unchanged; the parameter values were
                // not consumed by the observer.
                error!("Failed to handle Bind packet: {}", err);
            }
        }

        self.shared.state.portals.add(Portal {
            bind,
            statement_query: statement.query,
        })?;
        Ok(())
    }

    /// Handle an Execute: correlate the portal back to its SQL and enqueue
    /// the extended query for response attribution.
    fn handle_execute(&mut self, packet: &Packet) -> Result<()> {
        let execute = ExecutePacket::parse(&packet.payload)?;
        let portal = self.shared.state.portals.get(&execute.portal).ok_or_else(|| {
            ProxyError::Protocol(format!(
                "Execute references unknown portal \"{}\"",
                execute.portal
            ))
        })?;
        self.shared.state.pending.push(PendingQuery::Extended {
            sql: portal.statement_query,
            bind: portal.bind,
            execute,
        });
        Ok(())
    }

    /// Run the censor and the query observers over a query text.
    async fn observe_query(&self, query: &str) -> Result<QueryDisposition> {
        if tracing::enabled!(target: "shielddb_proxy", tracing::Level::DEBUG) {
            debug!(sql = %scrub_query(query), "New query");
        }

        let verdict = {
            let _span = tracing::debug_span!("censor").entered();
            self.shared.censor.handle_query(query)
        };
        if let Verdict::Block { message } = verdict {
            self.shared.metrics.query_censored();
            warn!(session_id = %self.shared.session_id, "Censor blocked query");
            return Ok(QueryDisposition::Blocked { message });
        }

        match self.shared.observers.on_query(&self.shared.access, query).await {
            Ok((new_query, true)) => Ok(QueryDisposition::Forward {
                rewritten: Some(new_query),
            }),
            Ok((_, false)) => Ok(QueryDisposition::Forward { rewritten: None }),
            Err(err) if err.is_key_read_error() => Err(err),
            Err(err) => {
                error!("Error occurred on query handler: {}", err);
                Ok(QueryDisposition::Forward { rewritten: None })
            }
        }
    }

    /// Answer a censored query: synthesized ErrorResponse followed by the
    /// canonical idle ReadyForQuery. The database never sees the query.
    async fn reject_query(&self, message: &str) -> Result<()> {
        let error_packet = Packet::new(
            MSG_ERROR_RESPONSE,
            encode_error_response("ERROR", SQLSTATE_ACCESS_RULE_VIOLATION, message),
        );
        let mut writer = self.client_writer.lock().await;
        timeout(self.shared.network_timeout, async {
            codec::write_packet(&mut *writer, &error_packet).await?;
            codec::write_raw(&mut *writer, &READY_FOR_QUERY_IDLE).await
        })
        .await
        .map_err(|_| ProxyError::Timeout("Writing censored-query response".into()))?
    }

    /// Forward a packet to the database under the configured write
    /// deadline.
    async fn forward(&mut self, packet: &Packet) -> Result<()> {
        timeout(
            self.shared.network_timeout,
            codec::write_packet(&mut self.server_write, packet),
        )
        .await
        .map_err(|_| ProxyError::Timeout("Writing packet to database".into()))?
    }
}
