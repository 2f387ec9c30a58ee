//! Sessions bound to a single endpoint

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::providers::{Http, Middleware, Provider};
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::providers::registry::EndpointDescriptor;
use crate::{GatewayError, Result};

/// Creates sessions for endpoints and probes them
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// A connected client for one endpoint
    type Session: Send + Sync + 'static;

    /// Bind a new session to `endpoint`
    fn connect(&self, endpoint: &EndpointDescriptor) -> Result<Self::Session>;

    /// Minimal side-effect-free call used to judge endpoint health
    async fn probe(&self, session: &Self::Session) -> Result<()>;
}

/// JSON-RPC over HTTP using ethers
#[derive(Debug, Clone, Default)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    type Session = Provider<Http>;

    fn connect(&self, endpoint: &EndpointDescriptor) -> Result<Self::Session> {
        debug!(
            endpoint = endpoint.name(),
            url = endpoint.url(),
            "Initializing HTTP client"
        );

        let http_client = Client::builder().timeout(endpoint.timeout()).build()?;

        let url = Url::parse(endpoint.url()).map_err(|e| {
            GatewayError::configuration(format!(
                "Invalid URL for endpoint {}: {}",
                endpoint.name(),
                e
            ))
        })?;

        Ok(Provider::new(Http::new_with_client(url, http_client)))
    }

    async fn probe(&self, session: &Self::Session) -> Result<()> {
        session.get_block_number().await?;
        Ok(())
    }
}

/// Session together with the descriptor it was connected for
struct PooledSession<S> {
    endpoint: Arc<EndpointDescriptor>,
    session: Arc<S>,
}

/// Lazily created, reused sessions keyed by endpoint name
///
/// A cached session is only served for the exact descriptor it was built
/// from. After a reconfiguration reuses a name, the first lookup with the new
/// descriptor replaces whatever an in-flight caller left behind.
pub struct SessionPool<C: Connector> {
    connector: C,
    sessions: DashMap<String, PooledSession<C::Session>>,
}

impl<C: Connector> SessionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sessions: DashMap::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Existing session for `endpoint`, or a newly connected one
    pub fn session_for(&self, endpoint: &Arc<EndpointDescriptor>) -> Result<Arc<C::Session>> {
        if let Some(pooled) = self.sessions.get(endpoint.name()) {
            if Arc::ptr_eq(&pooled.endpoint, endpoint) {
                return Ok(Arc::clone(&pooled.session));
            }
        }

        let session = Arc::new(self.connector.connect(endpoint)?);
        let mut entry = self
            .sessions
            .entry(endpoint.name().to_string())
            .or_insert_with(|| PooledSession {
                endpoint: Arc::clone(endpoint),
                session: Arc::clone(&session),
            });
        if !Arc::ptr_eq(&entry.endpoint, endpoint) {
            debug!(
                endpoint = endpoint.name(),
                url = endpoint.url(),
                "Replacing session bound to a previous endpoint definition"
            );
            *entry = PooledSession {
                endpoint: Arc::clone(endpoint),
                session,
            };
        }
        Ok(Arc::clone(&entry.session))
    }

    /// Drop the cached session for one endpoint
    pub fn evict(&self, name: &str) {
        if self.sessions.remove(name).is_some() {
            debug!(endpoint = name, "Evicted session");
        }
    }

    /// Drop every cached session
    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
