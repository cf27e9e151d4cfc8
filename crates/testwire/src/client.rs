//! The driver side of a connection.

use std::sync::Arc;

use testwire_core::{FRAMEWORK_OBJECT_ID, Handshake, Message, ProtocolError, RpcError, SettingsBag};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Role};
use crate::objects::{EventSink, TestFrameworkStub, TestSuiteStub, TracingEventSink};
use crate::subscription::{self, Subscription};

/// What a client offers during the handshake.
#[derive(Clone)]
pub struct ClientOptions {
    /// Settings to impose on the host. `None` adopts the host's.
    pub settings: Option<SettingsBag>,
    /// Receives the host's log entries and statistics.
    pub event_sink: Arc<dyn EventSink>,
    pub want_statistics_events: bool,
    /// Ask the host to load its suite as part of the handshake.
    pub load_test_suite: bool,
    /// Defaults to [`ConnectionConfig::from_env`].
    pub config: ConnectionConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            settings: None,
            event_sink: Arc::new(TracingEventSink),
            want_statistics_events: false,
            load_test_suite: true,
            config: ConnectionConfig::from_env(),
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("settings", &self.settings)
            .field("want_statistics_events", &self.want_statistics_events)
            .field("load_test_suite", &self.load_test_suite)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A connection in the client role.
pub struct ClientConnection {
    connection: Connection,
    options: ClientOptions,
    suite: OnceCell<Arc<TestSuiteStub>>,
}

impl ClientConnection {
    pub fn new<S>(stream: S, options: ClientOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            connection: Connection::new(stream, Role::Client, options.config.clone()),
            options,
            suite: OnceCell::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Perform the handshake, then start the read loop and the settings
    /// subscription.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<Vec<Subscription>, RpcError> {
        match self.handshake(cancel).await {
            Ok(subscriptions) => Ok(subscriptions),
            Err(e) => {
                tracing::debug!(error = %e, "client handshake failed");
                self.connection.stop().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<Vec<Subscription>, RpcError> {
        let connection = &self.connection;
        let mut reader = connection.begin()?;
        if let Some(settings) = &self.options.settings {
            connection.update_settings(|bag| *bag = settings.clone());
        }
        let sink = connection.register_event_sink(self.options.event_sink.clone());

        let offer = Handshake {
            want_statistics_events: self.options.want_statistics_events,
            load_test_suite: self.options.load_test_suite,
            settings: self.options.settings.clone(),
            event_sink: Some(sink),
            test_suite: None,
        };
        connection.send_message(&Message::Handshake(offer)).await?;

        let reply = connection.read_handshake(&mut reader, cancel).await?;
        let settings = reply
            .settings
            .ok_or_else(|| ProtocolError::Handshake("reply carries no settings".into()))?;
        connection.apply_remote_settings(settings);
        match (self.options.load_test_suite, reply.test_suite) {
            (true, Some(reference)) => {
                let suite = connection.resolve_stub::<TestSuiteStub>(reference.id)?;
                let _ = self.suite.set(suite);
            }
            (true, None) => {
                return Err(ProtocolError::Handshake("reply carries no test suite".into()).into());
            }
            (false, _) => {}
        }
        tracing::debug!(
            load_test_suite = self.options.load_test_suite,
            want_statistics_events = self.options.want_statistics_events,
            "client handshake complete"
        );

        connection.spawn_reader(reader);
        Ok(vec![subscription::forward_settings(connection)])
    }

    /// The host's framework object.
    pub fn framework(&self) -> Result<Arc<TestFrameworkStub>, RpcError> {
        self.connection.resolve_stub(FRAMEWORK_OBJECT_ID)
    }

    /// The suite from the handshake, or one loaded on demand.
    pub async fn test_suite(&self, cancel: &CancellationToken) -> Result<Arc<TestSuiteStub>, RpcError> {
        self.suite
            .get_or_try_init(|| async { self.framework()?.load_test_suite(cancel).await })
            .await
            .cloned()
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
