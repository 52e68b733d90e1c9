//! Data-path collaborator traits
//!
//! The proxy core never interprets SQL or touches key material itself.
//! Everything beyond packet plumbing is delegated through the traits in
//! this module:
//!
//! - [`QueryObserver`] may rewrite query text and bound parameter values on
//!   the client-to-server path (transparent encryption lives behind this).
//! - [`SchemaStore`] maps a query to per-column encryption settings.
//! - [`ColumnCryptor`] transforms individual result column payloads on the
//!   server-to-client path and supplies the OID advertised for type-aware
//!   columns.
//! - [`ClientIdObserver`] is notified when a TLS handshake derives a client
//!   identity from a certificate.
//!
//! All implementations must be `Send + Sync`; observers are shared between
//! the two per-connection pipeline tasks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::postgres::messages::BindParam;

/// Per-session context handed to observers and cryptors.
///
/// The client identity is empty until a TLS handshake with a client
/// certificate completes.
#[derive(Debug)]
pub struct AccessContext {
    /// Unique id of the proxied session, for log correlation
    pub session_id: Uuid,
    client_id: Mutex<Option<String>>,
}

impl AccessContext {
    /// Create a context for a new session.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            client_id: Mutex::new(None),
        }
    }

    /// The identity derived from the client certificate, if any.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    /// Record the identity derived from the client certificate.
    pub fn set_client_id(&self, id: String) {
        *self.client_id.lock() = Some(id);
    }
}

/// Encryption settings for one result column or statement placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEncryptionSetting {
    /// Column name in the schema
    pub column_name: String,
    /// Whether the column participates in type-aware rewriting: stored as
    /// BYTEA at the server but advertised to clients with its logical type
    pub type_aware: bool,
    /// The OID advertised to clients for a type-aware column
    pub db_data_type_oid: Option<u32>,
}

impl ColumnEncryptionSetting {
    /// The OID to advertise for this column, when type-aware rewriting
    /// applies.
    pub fn advertised_oid(&self) -> Option<u32> {
        if self.type_aware {
            self.db_data_type_oid
        } else {
            None
        }
    }
}

/// Maps query text to per-column encryption settings.
///
/// The returned vector is indexed by result column (or placeholder)
/// position; `None` entries are columns without encryption settings.
/// Treated as immutable after construction.
pub trait SchemaStore: Send + Sync {
    /// Look up the encryption settings relevant to a query. Returns `None`
    /// when the query touches no configured columns.
    fn lookup(&self, query: &str) -> Option<Vec<Option<ColumnEncryptionSetting>>>;
}

/// A schema store with no configured columns. The proxy degrades to
/// censor-and-forward when this is installed.
#[derive(Debug, Default)]
pub struct EmptySchemaStore;

impl SchemaStore for EmptySchemaStore {
    fn lookup(&self, _query: &str) -> Option<Vec<Option<ColumnEncryptionSetting>>> {
        None
    }
}

/// Observes (and may rewrite) queries and bound parameters on their way to
/// the database.
#[async_trait]
pub trait QueryObserver: Send + Sync {
    /// Observe a query. Returns `Some(new_text)` when the query was
    /// rewritten, `None` to forward it unchanged.
    async fn on_query(&self, ctx: &AccessContext, query: &str) -> Result<Option<String>>;

    /// Observe the parameter values of a Bind for `query`. Returns
    /// `Some(new_params)` when rewritten (the count may change), `None` to
    /// forward unchanged.
    async fn on_bind(
        &self,
        ctx: &AccessContext,
        query: &str,
        params: &[BindParam],
    ) -> Result<Option<Vec<BindParam>>>;
}

/// Ordered set of query observers. Rewrites chain: each observer sees the
/// previous observer's output.
#[derive(Default)]
pub struct QueryObserverSet {
    observers: Vec<Arc<dyn QueryObserver>>,
}

impl QueryObserverSet {
    /// Create an empty observer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer to the chain.
    pub fn add(&mut self, observer: Arc<dyn QueryObserver>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Run the query through all observers. Returns the final text and
    /// whether any observer changed it.
    pub async fn on_query(&self, ctx: &AccessContext, query: &str) -> Result<(String, bool)> {
        let mut current = query.to_string();
        let mut changed = false;
        for observer in &self.observers {
            if let Some(new_query) = observer.on_query(ctx, &current).await? {
                current = new_query;
                changed = true;
            }
        }
        Ok((current, changed))
    }

    /// Run Bind parameters through all observers. Returns the final values
    /// and whether any observer changed them.
    pub async fn on_bind(
        &self,
        ctx: &AccessContext,
        query: &str,
        params: Vec<BindParam>,
    ) -> Result<(Vec<BindParam>, bool)> {
        let mut current = params;
        let mut changed = false;
        for observer in &self.observers {
            if let Some(new_params) = observer.on_bind(ctx, query, &current).await? {
                current = new_params;
                changed = true;
            }
        }
        Ok((current, changed))
    }
}

/// Context for a single column transformation.
#[derive(Debug)]
pub struct ColumnContext<'a> {
    /// Session-scoped context
    pub access: &'a AccessContext,
    /// Zero-based result column index
    pub index: usize,
    /// Whether the column value is in binary format
    pub binary_format: bool,
    /// The encryption settings for this column, when known
    pub setting: Option<&'a ColumnEncryptionSetting>,
}

/// Transforms result column payloads on the server-to-client path.
#[async_trait]
pub trait ColumnCryptor: Send + Sync {
    /// Process one non-NULL column value, returning the bytes to forward.
    /// Returning the input unchanged is the correct behavior for columns
    /// the cryptor does not recognize.
    async fn on_column_decryption(&self, ctx: &ColumnContext<'_>, data: &[u8]) -> Result<Vec<u8>>;
}

/// A cryptor that forwards every column untouched.
#[derive(Debug, Default)]
pub struct PassthroughCryptor;

#[async_trait]
impl ColumnCryptor for PassthroughCryptor {
    async fn on_column_decryption(&self, _ctx: &ColumnContext<'_>, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Receives the client identity derived from a TLS client certificate.
pub trait ClientIdObserver: Send + Sync {
    /// Called once per session after a successful client handshake with a
    /// certificate.
    fn on_new_client_id(&self, client_id: &str);
}

/// Ordered list of client-id observers owned by the session.
#[derive(Default)]
pub struct ClientIdObserverSet {
    observers: Vec<Arc<dyn ClientIdObserver>>,
}

impl ClientIdObserverSet {
    /// Create an empty observer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    pub fn add(&mut self, observer: Arc<dyn ClientIdObserver>) {
        self.observers.push(observer);
    }

    /// Notify all observers of a new client identity.
    pub fn on_new_client_id(&self, client_id: &str) {
        for observer in &self.observers {
            observer.on_new_client_id(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercasingObserver;

    #[async_trait]
    impl QueryObserver for UppercasingObserver {
        async fn on_query(&self, _ctx: &AccessContext, query: &str) -> Result<Option<String>> {
            Ok(Some(query.to_uppercase()))
        }

        async fn on_bind(
            &self,
            _ctx: &AccessContext,
            _query: &str,
            _params: &[BindParam],
        ) -> Result<Option<Vec<BindParam>>> {
            Ok(None)
        }
    }

    struct SuffixObserver;

    #[async_trait]
    impl QueryObserver for SuffixObserver {
        async fn on_query(&self, _ctx: &AccessContext, query: &str) -> Result<Option<String>> {
            Ok(Some(format!("{} LIMIT 1", query)))
        }

        async fn on_bind(
            &self,
            _ctx: &AccessContext,
            _query: &str,
            params: &[BindParam],
        ) -> Result<Option<Vec<BindParam>>> {
            let mut new_params = params.to_vec();
            new_params.push(Some(b"extra".to_vec()));
            Ok(Some(new_params))
        }
    }

    fn ctx() -> AccessContext {
        AccessContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_observer_chain_order() {
        let mut set = QueryObserverSet::new();
        set.add(Arc::new(UppercasingObserver));
        set.add(Arc::new(SuffixObserver));

        let (query, changed) = set.on_query(&ctx(), "select 1").await.unwrap();
        assert!(changed);
        assert_eq!(query, "SELECT 1 LIMIT 1");
    }

    #[tokio::test]
    async fn test_empty_observer_set_is_unchanged() {
        let set = QueryObserverSet::new();
        let (query, changed) = set.on_query(&ctx(), "select 1").await.unwrap();
        assert!(!changed);
        assert_eq!(query, "select 1");
    }

    #[tokio::test]
    async fn test_on_bind_can_change_parameter_count() {
        let mut set = QueryObserverSet::new();
        set.add(Arc::new(SuffixObserver));

        let params = vec![Some(b"a".to_vec())];
        let (new_params, changed) = set.on_bind(&ctx(), "q", params).await.unwrap();
        assert!(changed);
        assert_eq!(new_params.len(), 2);
    }

    #[test]
    fn test_access_context_client_id() {
        let ctx = ctx();
        assert!(ctx.client_id().is_none());
        ctx.set_client_id("abcd".to_string());
        assert_eq!(ctx.client_id().as_deref(), Some("abcd"));
    }

    #[test]
    fn test_advertised_oid_requires_type_awareness() {
        let setting = ColumnEncryptionSetting {
            column_name: "enc".into(),
            type_aware: false,
            db_data_type_oid: Some(25),
        };
        assert_eq!(setting.advertised_oid(), None);

        let aware = ColumnEncryptionSetting {
            type_aware: true,
            ..setting
        };
        assert_eq!(aware.advertised_oid(), Some(25));
    }

    #[tokio::test]
    async fn test_passthrough_cryptor() {
        let access = ctx();
        let cryptor = PassthroughCryptor;
        let column_ctx = ColumnContext {
            access: &access,
            index: 0,
            binary_format: false,
            setting: None,
        };
        let out = cryptor
            .on_column_decryption(&column_ctx, b"payload")
            .await
            .unwrap();
        assert_eq!(out, b"payload");
    }
}
