//! Database-to-client pipeline
//!
//! Reads framed packets from the database, decrypts result columns,
//! rewrites RowDescription/ParameterDescription type OIDs, and forwards to
//! the client. Three states drive the loop:
//!
//! - `FirstPacket`: the server's reply to a forwarded `SSLRequest` is a
//!   single byte, so only the type byte is read. `'S'` starts the TLS
//!   dance, `'N'` restarts the client pipeline for a plain startup, and
//!   anything else is an ordinary packet whose remainder is read and
//!   forwarded.
//! - `Serve`: normal packet processing. A decode or decryption failure is
//!   answered with a synthesized error to the client, after which the
//!   pipeline drains the rest of the response.
//! - `SkipResponse`: discard packets until the server's own ReadyForQuery,
//!   which is handled (to reset per-query state) but not forwarded.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{split, ReadHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::Instrument;

use crate::error::{ProxyError, Result};
use crate::inspect::ColumnContext;
use crate::protocol::postgres::codec;
use crate::protocol::postgres::constants::{
    FORMAT_BINARY, FORMAT_TEXT, MSG_ERROR_RESPONSE, READY_FOR_QUERY_IDLE, SQLSTATE_ACCESS_RULE_VIOLATION,
    SSL_ALLOW, SSL_DENY,
};
use crate::protocol::postgres::messages::{
    encode_error_response, format_code_at, DataRow, ParameterDescription, RowDescription,
};
use crate::protocol::postgres::Packet;
use crate::server::stream::NetworkStream;
use crate::tls::{client_identity, TlsAcceptor, TlsConnector, TlsError};

use super::state::{classify_server, ServerPacketKind};
use super::{
    client::spawn_client_pipeline, ClientParts, SessionShared, SharedClientWriter,
    CLIENT_STOP_TIMEOUT,
};

/// Database pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    /// Waiting for the single-byte reply to the client's SSLRequest
    FirstPacket,
    /// Normal packet processing
    Serve,
    /// Draining a response after a decode failure
    SkipResponse,
}

/// The database-to-client half of a session.
pub(crate) struct BackendPipeline {
    shared: Arc<SessionShared>,
    /// Server read half (Option for safe taking during TLS upgrade)
    server_read: Option<ReadHalf<NetworkStream>>,
    /// Client write half, shared with the client pipeline
    client_writer: Option<SharedClientWriter>,
    /// Receiving end of the client pipeline's park rendezvous
    parts_rx: mpsc::Receiver<ClientParts>,
    tls_acceptor: Option<TlsAcceptor>,
    tls_connector: Option<TlsConnector>,
    /// Target host name, used for SNI on the database handshake
    server_name: String,
    state: HandlerState,
}

impl BackendPipeline {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        server_read: ReadHalf<NetworkStream>,
        client_writer: SharedClientWriter,
        parts_rx: mpsc::Receiver<ClientParts>,
        tls_acceptor: Option<TlsAcceptor>,
        tls_connector: Option<TlsConnector>,
        server_name: String,
    ) -> Self {
        Self {
            shared,
            server_read: Some(server_read),
            client_writer: Some(client_writer),
            parts_rx,
            tls_acceptor,
            tls_connector,
            server_name,
            state: HandlerState::FirstPacket,
        }
    }

    /// Drive the pipeline until EOF or a fatal error.
    pub(crate) async fn run(mut self) -> Result<()> {
        let span = tracing::debug_span!("PgDecryptStream");
        async move { self.serve_loop().await }.instrument(span).await
    }

    fn server_read_mut(&mut self) -> Result<&mut ReadHalf<NetworkStream>> {
        self.server_read
            .as_mut()
            .ok_or_else(|| ProxyError::Connection("Server stream not available".into()))
    }

    fn client_writer(&self) -> Result<SharedClientWriter> {
        self.client_writer
            .clone()
            .ok_or_else(|| ProxyError::Connection("Client stream not available".into()))
    }

    async fn serve_loop(&mut self) -> Result<()> {
        loop {
            match self.state {
                HandlerState::FirstPacket => self.handle_first_packet().await?,
                HandlerState::Serve => self.handle_serve().await?,
                HandlerState::SkipResponse => self.handle_skip_response().await?,
            }
        }
    }

    /// The server's first reply may be the one-byte answer to an
    /// SSLRequest; read only the type byte and branch on it.
    async fn handle_first_packet(&mut self) -> Result<()> {
        self.state = HandlerState::Serve;
        debug!("Read startup message");
        let first = codec::read_message_type(self.server_read_mut()?).await?;
        match first {
            SSL_ALLOW => {
                debug!("SSL allow");
                self.upgrade_to_tls().await
            }
            SSL_DENY => {
                debug!("Deny ssl request");
                self.deny_ssl().await
            }
            other => {
                // Not an SSL negotiation: the client sent a plain startup
                // and this is an ordinary typed packet.
                debug!("Non-ssl request start up message");
                let packet = codec::read_packet_after_type(self.server_read_mut()?, other).await?;
                self.forward_to_client(&packet).await
            }
        }
    }

    async fn handle_serve(&mut self) -> Result<()> {
        let mut packet = match codec::read_packet(self.server_read_mut()?).await {
            Ok(packet) => packet,
            Err(err) => {
                // EOF from the database is the normal end of a session
                debug!("Can't read packet: {}", err);
                return Err(err);
            }
        };
        let started = Instant::now();

        let result = self
            .handle_database_packet(&mut packet)
            .instrument(tracing::debug_span!("PgDecryptStreamLoop"))
            .await;

        match result {
            Err(err) if err.is_encoding_error() => {
                warn!(
                    session_id = %self.shared.session_id,
                    "Response decode failed, draining until ReadyForQuery: {}", err
                );
                self.send_client_error(&err.to_string()).await?;
                self.shared.metrics.response_skipped();
                self.state = HandlerState::SkipResponse;
                return Ok(());
            }
            Err(err) => return Err(err),
            Ok(()) => {}
        }

        self.forward_to_client(&packet).await?;
        self.shared
            .metrics
            .response_processing_seconds
            .observe(started.elapsed());
        Ok(())
    }

    async fn handle_skip_response(&mut self) -> Result<()> {
        let mut packet = codec::read_packet(self.server_read_mut()?).await?;
        let last = classify_server(&packet) == ServerPacketKind::ReadyForQuery;
        if last {
            self.state = HandlerState::Serve;
            // Process the ReadyForQuery to reset the protocol state; it is
            // not forwarded, the client already got a synthesized one.
            self.handle_database_packet(&mut packet).await?;
        }
        debug!(last = last, "Skipping the packet");
        Ok(())
    }

    /// Server-side protocol transitions: decrypt DataRows, rewrite
    /// description OIDs, release the pending query on ReadyForQuery.
    async fn handle_database_packet(&mut self, packet: &mut Packet) -> Result<()> {
        match self.shared.state.observe_server_packet(packet) {
            ServerPacketKind::DataRow => self.handle_data_row(packet).await,
            ServerPacketKind::RowDescription => self.handle_row_description(packet),
            ServerPacketKind::ParameterDescription => self.handle_parameter_description(packet),
            ServerPacketKind::ReadyForQuery => {
                debug!("ReadyForQuery packet");
                self.shared.state.pending.pop();
                self.shared.state.clear_placeholder_settings();
                Ok(())
            }
            ServerPacketKind::Other => Ok(()),
        }
    }

    /// Decrypt the columns of a DataRow in place.
    async fn handle_data_row(&mut self, packet: &mut Packet) -> Result<()> {
        debug!("Matched data row packet");
        let pending = self.shared.state.pending.peek().ok_or_else(|| {
            ProxyError::Protocol("DataRow received without a pending query".into())
        })?;

        let mut row = DataRow::parse(&packet.payload)?;
        if row.columns.is_empty() {
            return Ok(());
        }

        let settings = self.shared.schema.lookup(pending.sql());
        let bind = pending.bind();

        let mut changed = false;
        for (i, column) in row.columns.iter_mut().enumerate() {
            // NULL columns are never decrypted and their wire encoding is
            // preserved exactly.
            let Some(data) = column.as_mut() else {
                continue;
            };

            let format = match bind {
                Some(bind) => format_code_at(&bind.result_formats, i)?,
                None => FORMAT_TEXT,
            };
            let setting = settings
                .as_ref()
                .and_then(|items| items.get(i))
                .and_then(|item| item.as_ref());

            let ctx = ColumnContext {
                access: &self.shared.access,
                index: i,
                binary_format: format == FORMAT_BINARY,
                setting,
            };
            trace!(column_index = i, data_length = data.len(), "Process column data");
            let new_data = self.shared.cryptor.on_column_decryption(&ctx, data).await?;
            if new_data != *data {
                *data = new_data;
                changed = true;
            }
        }

        if changed {
            packet.replace_payload(row.encode());
        }
        Ok(())
    }

    /// Rewrite the advertised type OIDs of type-aware encrypted columns so
    /// the client sees the logical type instead of BYTEA.
    fn handle_row_description(&mut self, packet: &mut Packet) -> Result<()> {
        let Some(pending) = self.shared.state.pending.peek() else {
            debug!("RowDescription without an active query");
            return Ok(());
        };
        let Some(settings) = self.shared.schema.lookup(pending.sql()) else {
            debug!("RowDescription without recognized encryption settings");
            return Ok(());
        };

        let mut description = RowDescription::parse(&packet.payload)?;
        if settings.len() != description.fields.len() {
            error!("Column count in RowDescription does not match the parsed query");
            return Ok(());
        }

        let mut changed = false;
        for (field, setting) in description.fields.iter_mut().zip(settings.iter()) {
            if let Some(setting) = setting {
                if let Some(oid) = setting.advertised_oid() {
                    if field.type_oid != oid {
                        field.type_oid = oid;
                        changed = true;
                    }
                }
            }
        }

        if changed {
            packet.replace_payload(description.encode());
        }
        Ok(())
    }

    /// Rewrite parameter OIDs for type-aware placeholders recognized at
    /// Parse time. A count mismatch between the settings and the
    /// advertised OIDs rewrites only the indexes present in both.
    fn handle_parameter_description(&mut self, packet: &mut Packet) -> Result<()> {
        let Some(items) = self.shared.state.placeholder_settings() else {
            debug!("ParameterDescription without recognized encryption settings");
            return Ok(());
        };

        let mut description = ParameterDescription::parse(&packet.payload)?;
        let mut changed = false;
        for (i, oid) in description.param_oids.iter_mut().enumerate() {
            if let Some(Some(setting)) = items.get(i) {
                if let Some(new_oid) = setting.advertised_oid() {
                    if *oid != new_oid {
                        *oid = new_oid;
                        changed = true;
                    }
                }
            }
        }

        if changed {
            packet.replace_payload(description.encode());
        }
        Ok(())
    }

    /// Stop the client pipeline and take over its socket halves.
    async fn stop_client(&mut self) -> Result<ClientParts> {
        self.shared.stop.request();
        let parts = timeout(CLIENT_STOP_TIMEOUT, self.parts_rx.recv())
            .await
            .map_err(|_| {
                ProxyError::Timeout("Client pipeline did not stop for TLS upgrade".into())
            })?
            .ok_or_else(|| ProxyError::Connection("Client pipeline is gone".into()))?;
        self.shared.stop.clear();
        debug!("Stop client connection");
        Ok(parts)
    }

    /// The server denied SSL: restart the client pipeline so it accepts a
    /// plain startup message, then forward the 'N' byte. Clients retrying
    /// without TLS re-send their startup from scratch.
    async fn deny_ssl(&mut self) -> Result<()> {
        let parts = self.stop_client().await?;
        spawn_client_pipeline(
            Arc::clone(&self.shared),
            parts.client_read,
            parts.server_write,
            parts.client_writer,
            true,
        );

        let writer = self.client_writer()?;
        let mut writer = writer.lock().await;
        timeout(
            self.shared.network_timeout,
            codec::write_raw(&mut *writer, &[SSL_DENY]),
        )
        .await
        .map_err(|_| ProxyError::Timeout("Forwarding SSL deny byte".into()))?
    }

    /// The server accepted SSL: park the client pipeline, forward the 'S'
    /// byte, wrap both sockets in TLS and respawn the client pipeline on
    /// the new streams.
    async fn upgrade_to_tls(&mut self) -> Result<()> {
        let no_tls_config = || {
            ProxyError::Tls(TlsError::config(
                "SSL upgrade requested but TLS is not configured; provide a certificate and \
                 key for client connections and a CA for the database connection",
            ))
        };
        let acceptor = self.tls_acceptor.take().ok_or_else(no_tls_config)?;
        let connector = self.tls_connector.clone().ok_or_else(no_tls_config)?;

        debug!("Start tls proxy");
        let parts = self.stop_client().await?;

        // Forward the 'S' byte only after the client pipeline has parked,
        // so at most one task owns each socket during the handshake.
        {
            let mut writer = parts.client_writer.lock().await;
            timeout(
                self.shared.network_timeout,
                codec::write_raw(&mut *writer, &[SSL_ALLOW]),
            )
            .await
            .map_err(|_| ProxyError::Timeout("Forwarding SSL allow byte".into()))??;
        }

        // Reunite both streams from their halves. The parked pipeline has
        // surrendered its references, so the writer lock has exactly one
        // owner left after dropping the parked clone.
        let ClientParts {
            client_read,
            server_write,
            client_writer: parked_writer,
        } = parts;
        drop(parked_writer);
        let own_writer = self
            .client_writer
            .take()
            .ok_or_else(|| ProxyError::Connection("Client stream not available".into()))?;
        let client_write = Arc::try_unwrap(own_writer)
            .map_err(|_| ProxyError::Protocol("Client writer still shared during TLS upgrade".into()))?
            .into_inner();
        let client_stream = client_read.unsplit(client_write);
        let server_read = self
            .server_read
            .take()
            .ok_or_else(|| ProxyError::Connection("Server stream not available".into()))?;
        let server_stream = server_read.unsplit(server_write);

        let client_tcp = client_stream.into_tcp().map_err(|_| {
            ProxyError::Protocol("Cannot upgrade: client connection already uses TLS".into())
        })?;
        let server_tcp = server_stream.into_tcp().map_err(|_| {
            ProxyError::Protocol("Cannot upgrade: database connection already uses TLS".into())
        })?;

        debug!("Init tls with client");
        let tls_client = match acceptor.accept(client_tcp).await {
            Ok(stream) => stream,
            Err(err) => {
                if let Some(hint) = err.suggestion() {
                    info!("{}", hint);
                }
                error!("Error in tls handshake with client: {}", err);
                return Err(err.into());
            }
        };
        if let Some(id) = client_identity(&tls_client) {
            info!(client_id = %id, "Set new clientID");
            self.shared.access.set_client_id(id.clone());
            self.shared.client_id_observers.on_new_client_id(&id);
        }

        debug!("Init tls with db");
        let tls_server = match connector.connect(server_tcp, &self.server_name).await {
            Ok(stream) => stream,
            Err(err) => {
                if let Some(hint) = err.suggestion() {
                    info!("{}", hint);
                }
                error!("Can't initialize tls connection with db: {}", err);
                return Err(err.into());
            }
        };

        // Re-seat the session sockets and restart the client pipeline on
        // the wrapped streams.
        let (client_read, client_write) = split(NetworkStream::ServerTls(Box::new(tls_client)));
        let (server_read, server_write) = split(NetworkStream::ClientTls(Box::new(tls_server)));
        let client_writer: SharedClientWriter = Arc::new(AsyncMutex::new(client_write));
        self.server_read = Some(server_read);
        self.client_writer = Some(Arc::clone(&client_writer));
        spawn_client_pipeline(
            Arc::clone(&self.shared),
            client_read,
            server_write,
            client_writer,
            true,
        );

        self.shared.metrics.tls_upgraded();
        info!(session_id = %self.shared.session_id, "TLS connection established on both sides");
        Ok(())
    }

    /// Send a synthesized error plus the canonical idle ReadyForQuery to
    /// the client.
    async fn send_client_error(&mut self, message: &str) -> Result<()> {
        let error_packet = Packet::new(
            MSG_ERROR_RESPONSE,
            encode_error_response("ERROR", SQLSTATE_ACCESS_RULE_VIOLATION, message),
        );
        let writer = self.client_writer()?;
        let mut writer = writer.lock().await;
        timeout(self.shared.network_timeout, async {
            codec::write_packet(&mut *writer, &error_packet).await?;
            codec::write_raw(&mut *writer, &READY_FOR_QUERY_IDLE).await
        })
        .await
        .map_err(|_| ProxyError::Timeout("Writing error response to client".into()))?
    }

    /// Forward a packet to the client under the configured write deadline.
    async fn forward_to_client(&mut self, packet: &Packet) -> Result<()> {
        let writer = self.client_writer()?;
        let mut writer = writer.lock().await;
        timeout(
            self.shared.network_timeout,
            codec::write_packet(&mut *writer, packet),
        )
        .await
        .map_err(|_| ProxyError::Timeout("Writing packet to client".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio::time::timeout as tokio_timeout;

    use crate::inspect::{ColumnCryptor, ColumnEncryptionSetting, SchemaStore};
    use crate::protocol::postgres::constants::{
        MSG_COMMAND_COMPLETE, MSG_DATA_ROW, MSG_PARAMETER_DESCRIPTION, MSG_PARAMETER_STATUS,
        MSG_READY_FOR_QUERY, MSG_ROW_DESCRIPTION, TXN_STATUS_IDLE,
    };
    use crate::protocol::postgres::messages::{BindPacket, FieldDescription, ParameterDescription};
    use crate::server::session::client::spawn_client_pipeline;
    use crate::server::session::testutil::session_with;
    use crate::server::session::{PendingQuery, ProxyHandlers, SharedClientWriter};

    /// Schema store with one type-aware column (stored BYTEA, advertised
    /// TEXT) for queries mentioning "enc".
    struct EncColumnSchema;

    impl SchemaStore for EncColumnSchema {
        fn lookup(&self, query: &str) -> Option<Vec<Option<ColumnEncryptionSetting>>> {
            if query.contains("enc") {
                Some(vec![Some(ColumnEncryptionSetting {
                    column_name: "enc".into(),
                    type_aware: true,
                    db_data_type_oid: Some(25),
                })])
            } else {
                None
            }
        }
    }

    /// Cryptor that uppercases every column and records the formats it saw.
    struct RecordingCryptor {
        formats: Mutex<Vec<bool>>,
    }

    impl RecordingCryptor {
        fn new() -> Self {
            Self {
                formats: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ColumnCryptor for RecordingCryptor {
        async fn on_column_decryption(
            &self,
            ctx: &ColumnContext<'_>,
            data: &[u8],
        ) -> Result<Vec<u8>> {
            self.formats.lock().push(ctx.binary_format);
            Ok(data.to_ascii_uppercase())
        }
    }

    /// Cryptor that fails with an encoding error on every column.
    struct FailingCryptor;

    #[async_trait]
    impl ColumnCryptor for FailingCryptor {
        async fn on_column_decryption(
            &self,
            _ctx: &ColumnContext<'_>,
            _data: &[u8],
        ) -> Result<Vec<u8>> {
            Err(ProxyError::Encoding("can't decrypt column".into()))
        }
    }

    struct Harness {
        shared: Arc<SessionShared>,
        run: JoinHandle<Result<()>>,
        /// Test end of the client socket
        client: DuplexStream,
        /// Test end of the server socket
        server: DuplexStream,
        _client_read: tokio::io::ReadHalf<NetworkStream>,
        _server_write: WriteHalf<NetworkStream>,
    }

    fn start(handlers: ProxyHandlers, state: HandlerState) -> Harness {
        let session = session_with(handlers);
        let (client_local, client_remote) = duplex(8192);
        let (server_local, server_remote) = duplex(8192);

        let (client_read, client_write) = split(NetworkStream::mem(client_local));
        let (server_read, server_write) = split(NetworkStream::mem(server_local));
        let client_writer: SharedClientWriter = Arc::new(AsyncMutex::new(client_write));

        let mut pipeline = BackendPipeline::new(
            Arc::clone(&session.shared),
            server_read,
            client_writer,
            session.parts_rx,
            None,
            None,
            "db.test".into(),
        );
        pipeline.state = state;

        Harness {
            shared: session.shared,
            run: tokio::spawn(pipeline.run()),
            client: client_remote,
            server: server_remote,
            _client_read: client_read,
            _server_write: server_write,
        }
    }

    async fn write_frame(stream: &mut DuplexStream, msg_type: u8, payload: &[u8]) {
        stream.write_all(&[msg_type]).await.unwrap();
        stream
            .write_all(&(payload.len() as u32 + 4).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_frame(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
        let mut head = [0u8; 5];
        stream.read_exact(&mut head).await.unwrap();
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize - 4;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        (head[0], payload)
    }

    fn push_simple(shared: &SessionShared, sql: &str) {
        shared.state.pending.push(PendingQuery::Simple {
            sql: sql.to_string(),
        });
    }

    #[tokio::test]
    async fn test_response_forwarded_and_queue_released_on_ready() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::Serve);
        push_simple(&harness.shared, "SELECT 1");

        write_frame(&mut harness.server, MSG_COMMAND_COMPLETE, b"SELECT 1\0").await;
        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_COMMAND_COMPLETE);
        assert_eq!(payload, b"SELECT 1\0");
        assert_eq!(harness.shared.state.pending.len(), 1);

        write_frame(&mut harness.server, MSG_READY_FOR_QUERY, &[TXN_STATUS_IDLE]).await;
        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_READY_FOR_QUERY);
        assert_eq!(payload, &[TXN_STATUS_IDLE]);
        assert!(harness.shared.state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_row_description_oid_rewrite() {
        let handlers = ProxyHandlers {
            schema: Arc::new(EncColumnSchema),
            ..ProxyHandlers::passthrough()
        };
        let mut harness = start(handlers, HandlerState::Serve);
        push_simple(&harness.shared, "SELECT enc FROM t");

        let description = RowDescription {
            fields: vec![FieldDescription {
                name: "enc".into(),
                table_oid: 16384,
                column_id: 1,
                type_oid: 17,
                type_size: -1,
                type_modifier: -1,
                format: FORMAT_TEXT,
            }],
        };
        write_frame(&mut harness.server, MSG_ROW_DESCRIPTION, &description.encode()).await;

        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_ROW_DESCRIPTION);
        let rewritten = RowDescription::parse(&payload).unwrap();
        assert_eq!(rewritten.fields[0].type_oid, 25);
        assert_eq!(rewritten.fields[0].name, "enc");
    }

    #[tokio::test]
    async fn test_row_description_count_mismatch_passes_through() {
        let handlers = ProxyHandlers {
            schema: Arc::new(EncColumnSchema),
            ..ProxyHandlers::passthrough()
        };
        let mut harness = start(handlers, HandlerState::Serve);
        push_simple(&harness.shared, "SELECT enc, other FROM t");

        // Two fields but only one setting: forwarded untouched.
        let field = FieldDescription {
            name: "enc".into(),
            table_oid: 0,
            column_id: 0,
            type_oid: 17,
            type_size: -1,
            type_modifier: -1,
            format: FORMAT_TEXT,
        };
        let description = RowDescription {
            fields: vec![field.clone(), FieldDescription {
                name: "other".into(),
                ..field
            }],
        };
        let encoded = description.encode();
        write_frame(&mut harness.server, MSG_ROW_DESCRIPTION, &encoded).await;

        let (_, payload) = read_frame(&mut harness.client).await;
        assert_eq!(payload, encoded);
    }

    #[tokio::test]
    async fn test_data_row_decryption_skips_nulls() {
        let cryptor = Arc::new(RecordingCryptor::new());
        let handlers = ProxyHandlers {
            cryptor: Arc::clone(&cryptor) as Arc<dyn ColumnCryptor>,
            ..ProxyHandlers::passthrough()
        };
        let mut harness = start(handlers, HandlerState::Serve);
        push_simple(&harness.shared, "SELECT a, b, c FROM t");

        let row = DataRow {
            columns: vec![Some(b"abc".to_vec()), None, Some(b"def".to_vec())],
        };
        write_frame(&mut harness.server, MSG_DATA_ROW, &row.encode()).await;

        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_DATA_ROW);
        let rewritten = DataRow::parse(&payload).unwrap();
        assert_eq!(
            rewritten.columns,
            vec![Some(b"ABC".to_vec()), None, Some(b"DEF".to_vec())]
        );
        // The NULL column never reached the cryptor; all seen as text.
        assert_eq!(cryptor.formats.lock().as_slice(), &[false, false]);
    }

    #[tokio::test]
    async fn test_data_row_formats_come_from_bind() {
        let cryptor = Arc::new(RecordingCryptor::new());
        let handlers = ProxyHandlers {
            cryptor: Arc::clone(&cryptor) as Arc<dyn ColumnCryptor>,
            ..ProxyHandlers::passthrough()
        };
        let mut harness = start(handlers, HandlerState::Serve);
        harness.shared.state.pending.push(PendingQuery::Extended {
            sql: "SELECT a, b FROM t".into(),
            bind: BindPacket {
                portal: "p1".into(),
                statement: "s1".into(),
                parameter_formats: vec![],
                parameters: vec![],
                result_formats: vec![FORMAT_BINARY, FORMAT_TEXT],
            },
            execute: crate::protocol::postgres::messages::ExecutePacket {
                portal: "p1".into(),
                max_rows: 0,
            },
        });

        let row = DataRow {
            columns: vec![Some(vec![0, 1]), Some(b"x".to_vec())],
        };
        write_frame(&mut harness.server, MSG_DATA_ROW, &row.encode()).await;

        let _ = read_frame(&mut harness.client).await;
        assert_eq!(cryptor.formats.lock().as_slice(), &[true, false]);
    }

    #[tokio::test]
    async fn test_zero_column_data_row_passes_through() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::Serve);
        push_simple(&harness.shared, "SELECT");

        let payload = 0u16.to_be_bytes().to_vec();
        write_frame(&mut harness.server, MSG_DATA_ROW, &payload).await;

        let (msg_type, forwarded) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_DATA_ROW);
        assert_eq!(forwarded, payload);
    }

    #[tokio::test]
    async fn test_data_row_without_pending_query_is_fatal() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::Serve);

        let row = DataRow {
            columns: vec![Some(b"x".to_vec())],
        };
        write_frame(&mut harness.server, MSG_DATA_ROW, &row.encode()).await;

        let result = harness.run.await.unwrap();
        assert!(matches!(result, Err(ProxyError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_decode_failure_drains_until_ready_for_query() {
        let handlers = ProxyHandlers {
            cryptor: Arc::new(FailingCryptor),
            ..ProxyHandlers::passthrough()
        };
        let mut harness = start(handlers, HandlerState::Serve);
        push_simple(&harness.shared, "SELECT enc FROM t");

        // The cryptor fails on this row.
        let row = DataRow {
            columns: vec![Some(b"garbage".to_vec())],
        };
        write_frame(&mut harness.server, MSG_DATA_ROW, &row.encode()).await;

        // Client gets the synthesized error and ReadyForQuery.
        let (msg_type, _) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_ERROR_RESPONSE);
        let mut tail = [0u8; 6];
        harness.client.read_exact(&mut tail).await.unwrap();
        assert_eq!(tail, READY_FOR_QUERY_IDLE);

        // The rest of the response is discarded, including the server's
        // own ReadyForQuery, which still resets the protocol state.
        write_frame(&mut harness.server, MSG_COMMAND_COMPLETE, b"SELECT 1\0").await;
        write_frame(&mut harness.server, MSG_READY_FOR_QUERY, &[TXN_STATUS_IDLE]).await;

        // Back in serve state: the next packet is forwarded again.
        write_frame(&mut harness.server, MSG_PARAMETER_STATUS, b"TimeZone\0UTC\0").await;
        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_PARAMETER_STATUS);
        assert_eq!(payload, b"TimeZone\0UTC\0");
        assert!(harness.shared.state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_parameter_description_rewrite_with_count_mismatch() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::Serve);
        harness.shared.state.set_placeholder_settings(vec![Some(
            ColumnEncryptionSetting {
                column_name: "enc".into(),
                type_aware: true,
                db_data_type_oid: Some(25),
            },
        )]);

        // Two advertised OIDs, one setting: only the first is rewritten.
        let description = ParameterDescription {
            param_oids: vec![17, 23],
        };
        write_frame(
            &mut harness.server,
            MSG_PARAMETER_DESCRIPTION,
            &description.encode(),
        )
        .await;

        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, MSG_PARAMETER_DESCRIPTION);
        let rewritten = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(rewritten.param_oids, vec![25, 23]);
    }

    #[tokio::test]
    async fn test_first_packet_regular_byte_forwards_whole_packet() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::FirstPacket);

        // Authentication request: not an SSL negotiation byte.
        write_frame(&mut harness.server, b'R', &[0, 0, 0, 0]).await;

        let (msg_type, payload) = read_frame(&mut harness.client).await;
        assert_eq!(msg_type, b'R');
        assert_eq!(payload, &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_ssl_allow_without_tls_config_is_fatal() {
        let mut harness = start(ProxyHandlers::passthrough(), HandlerState::FirstPacket);

        harness.server.write_all(&[SSL_ALLOW]).await.unwrap();

        let result = harness.run.await.unwrap();
        assert!(matches!(result, Err(ProxyError::Tls(_))));
    }

    #[tokio::test]
    async fn test_ssl_deny_restarts_client_pipeline() {
        // Full wiring: a live client pipeline plus the database pipeline,
        // so the stop-rendezvous actually runs.
        let session = session_with(ProxyHandlers::passthrough());
        let (client_local, mut client_remote) = duplex(8192);
        let (server_local, mut server_remote) = duplex(8192);

        let (client_read, client_write) = split(NetworkStream::mem(client_local));
        let (server_read, server_write) = split(NetworkStream::mem(server_local));
        let client_writer: SharedClientWriter = Arc::new(AsyncMutex::new(client_write));

        spawn_client_pipeline(
            Arc::clone(&session.shared),
            client_read,
            server_write,
            Arc::clone(&client_writer),
            true,
        );

        let mut pipeline = BackendPipeline::new(
            Arc::clone(&session.shared),
            server_read,
            client_writer,
            session.parts_rx,
            None,
            None,
            "db.test".into(),
        );
        pipeline.state = HandlerState::FirstPacket;
        let _run = tokio::spawn(pipeline.run());

        // Client pipeline consumes the SSLRequest in startup framing.
        let ssl_request: Vec<u8> = vec![0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];
        client_remote.write_all(&ssl_request).await.unwrap();
        let mut forwarded = vec![0u8; 8];
        server_remote.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, ssl_request);

        // Server denies SSL.
        server_remote.write_all(&[SSL_DENY]).await.unwrap();

        // The deny byte reaches the client.
        let mut deny = [0u8; 1];
        client_remote.read_exact(&mut deny).await.unwrap();
        assert_eq!(deny[0], SSL_DENY);

        // The restarted pipeline accepts a plain startup message and
        // forwards it in startup framing.
        let startup: Vec<u8> = {
            let mut body = vec![0u8, 3, 0, 0];
            body.extend_from_slice(b"user\0postgres\0\0");
            let mut framed = ((body.len() + 4) as u32).to_be_bytes().to_vec();
            framed.extend_from_slice(&body);
            framed
        };
        client_remote.write_all(&startup).await.unwrap();
        let mut forwarded = vec![0u8; startup.len()];
        tokio_timeout(
            Duration::from_secs(2),
            server_remote.read_exact(&mut forwarded),
        )
        .await
        .expect("restarted client pipeline should forward the startup")
        .unwrap();
        assert_eq!(forwarded, startup);
    }
}
