//! The host side of a connection.

use std::sync::Arc;

use testwire_core::{Handshake, Message, RpcError, SettingsBag};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Role};
use crate::objects::{EventSinkStub, FrameworkServant, TestFramework};
use crate::subscription::{self, Subscription};

/// How a server answers the handshake.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Settings used when the client brings none.
    pub settings: Option<SettingsBag>,
    /// Defaults to [`ConnectionConfig::from_env`].
    pub config: ConnectionConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            settings: None,
            config: ConnectionConfig::from_env(),
        }
    }
}

/// A connection in the server role, hosting a [`TestFramework`] at the
/// reserved bootstrap id.
pub struct ServerConnection {
    connection: Connection,
    framework: Arc<FrameworkServant>,
    options: ServerOptions,
}

impl ServerConnection {
    pub fn new<S>(stream: S, framework: Arc<dyn TestFramework>, options: ServerOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Connection::new(stream, Role::Server, options.config.clone());
        let framework = connection.register_framework(framework);
        Self {
            connection,
            framework,
            options,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Answer the client's handshake, then start the read loop and, when
    /// asked for, the statistics subscription.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<Vec<Subscription>, RpcError> {
        match self.handshake(cancel).await {
            Ok(subscriptions) => Ok(subscriptions),
            Err(e) => {
                tracing::debug!(error = %e, "server handshake failed");
                self.connection.stop().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<Vec<Subscription>, RpcError> {
        let connection = &self.connection;
        let mut reader = connection.begin()?;
        let offer = connection.read_handshake(&mut reader, cancel).await?;

        let settings = offer
            .settings
            .or_else(|| self.options.settings.clone())
            .unwrap_or_default();
        connection.apply_remote_settings(settings.clone());

        let sink = offer
            .event_sink
            .map(|reference| connection.resolve_stub::<EventSinkStub>(reference.id))
            .transpose()?;
        connection.set_peer(offer.want_statistics_events, sink);

        let test_suite = if offer.load_test_suite {
            Some(self.framework.load(connection, cancel.child_token()).await?)
        } else {
            None
        };

        let reply = Handshake {
            want_statistics_events: offer.want_statistics_events,
            load_test_suite: false,
            settings: Some(settings),
            event_sink: None,
            test_suite,
        };
        connection.send_message(&Message::Handshake(reply)).await?;
        tracing::debug!(
            load_test_suite = offer.load_test_suite,
            want_statistics_events = offer.want_statistics_events,
            "server handshake complete"
        );

        connection.spawn_reader(reader);
        let mut subscriptions = Vec::new();
        if connection.peer_wants_statistics() {
            subscriptions.extend(subscription::forward_statistics(connection));
        }
        Ok(subscriptions)
    }

    pub fn settings(&self) -> SettingsBag {
        self.connection.settings()
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        self.connection.run(cancel).await
    }

    pub async fn stop(&self) {
        self.connection.stop().await
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await
    }
}

/// Host entry point for a launched topology: connect to the driver at
/// `addr`, serve `framework` until the driver shuts the connection down.
pub async fn serve<A: ToSocketAddrs>(
    addr: A,
    framework: Arc<dyn TestFramework>,
    options: ServerOptions,
    cancel: &CancellationToken,
) -> Result<(), RpcError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        tracing::debug!(%peer, "connected to driver");
    }
    let server = ServerConnection::new(stream, framework, options);
    server.start(cancel).await?;
    server.run(cancel).await
}
