pub mod authz;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod ingest;
pub mod registry;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;

use dispatcher::Dispatcher;
use ingest::MessageService;
use registry::ConnectionRegistry;
use store::MessageStore;

/// Process-wide realtime state: the connection registry and the services
/// built on it. Created at server start, drained at shutdown.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    store: Arc<dyn MessageStore>,
    registry: ConnectionRegistry,
    messages: MessageService,
    jwt_secret: String,
}

impl Gateway {
    pub fn new(store: Arc<dyn MessageStore>, jwt_secret: impl Into<String>) -> Self {
        let registry = ConnectionRegistry::new();
        let messages = MessageService::new(store.clone(), Dispatcher::new(registry.clone()));
        Self {
            inner: Arc::new(GatewayInner {
                store,
                registry,
                messages,
                jwt_secret: jwt_secret.into(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn messages(&self) -> &MessageService {
        &self.inner.messages
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner.jwt_secret
    }

    /// Close every live connection. Their tasks deregister on the way out.
    pub async fn shutdown(&self) {
        let closed = self.inner.registry.drain().await;
        info!("Gateway shut down, closed {} live connections", closed);
    }
}
