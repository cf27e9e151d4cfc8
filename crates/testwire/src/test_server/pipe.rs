use std::sync::Arc;

use parking_lot::Mutex;
use testwire_core::RpcError;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientConnection, ClientOptions};
use crate::objects::TestFramework;
use crate::server::{ServerConnection, ServerOptions};
use crate::session::Session;
use crate::subscription::Subscription;

/// Both roles in this process, joined by an in-memory duplex stream.
pub(super) struct PipeServer {
    client: ClientConnection,
    server: ServerConnection,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PipeServer {
    pub(super) fn new(
        framework: Arc<dyn TestFramework>,
        client: ClientOptions,
        server: ServerOptions,
    ) -> Self {
        let (client_end, server_end) = tokio::io::duplex(client.config.pipe_buffer);
        Self {
            client: ClientConnection::new(client_end, client),
            server: ServerConnection::new(server_end, framework, server),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Run both handshakes concurrently, then load the suite through the
    /// client.
    pub(super) async fn initialize(&self, cancel: &CancellationToken) -> Result<Session, RpcError> {
        let started = tokio::try_join!(self.client.start(cancel), self.server.start(cancel));
        let (client_subs, server_subs) = match started {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                self.client.stop().await;
                self.server.stop().await;
                return Err(e);
            }
        };
        {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.extend(client_subs);
            subscriptions.extend(server_subs);
        }
        let suite = self.client.test_suite(cancel).await?;
        Ok(Session::remote(self.client.connection().clone(), suite))
    }

    pub(super) async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        // Either side ending closes the stream, which ends the other.
        let (client, server) = tokio::join!(self.client.run(cancel), self.server.run(cancel));
        client.and(server)
    }

    pub(super) async fn stop(&self) -> Result<(), RpcError> {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.client.shutdown().await;
        self.server.stop().await;
        Ok(())
    }
}
