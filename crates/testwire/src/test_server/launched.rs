use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use testwire_core::RpcError;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientConnection, ClientOptions};
use crate::session::Session;
use crate::subscription::Subscription;

/// Identifies an application started by a [`Launcher`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationHandle {
    pub id: u64,
    pub description: String,
}

/// What the launched application needs to reach the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Where the driver is listening.
    pub endpoint: SocketAddr,
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
}

/// Starts and stops the external test host (a process, an emulator, a
/// device). Only this contract is consumed here.
pub trait Launcher: Send + Sync + 'static {
    fn launch_application(
        &self,
        options: LaunchOptions,
    ) -> BoxFuture<'_, Result<ApplicationHandle, RpcError>>;

    /// Resolves when the application exits, with whether it succeeded.
    fn wait_for_exit(
        &self,
        handle: ApplicationHandle,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<bool, RpcError>>;

    fn stop_application(&self, handle: ApplicationHandle) -> BoxFuture<'_, Result<(), RpcError>>;
}

/// Settings for a launched server.
#[derive(Debug, Clone)]
pub struct LaunchedOptions {
    /// Address to listen on; port `0` picks a free one.
    pub bind: SocketAddr,
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
}

impl Default for LaunchedOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            arguments: Vec::new(),
            environment: Vec::new(),
        }
    }
}

pub(super) struct LaunchedServer {
    launcher: Arc<dyn Launcher>,
    options: LaunchedOptions,
    client_options: ClientOptions,
    client: OnceCell<ClientConnection>,
    handle: Mutex<Option<ApplicationHandle>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LaunchedServer {
    pub(super) fn new(
        launcher: Arc<dyn Launcher>,
        options: LaunchedOptions,
        client_options: ClientOptions,
    ) -> Self {
        Self {
            launcher,
            options,
            client_options,
            client: OnceCell::new(),
            handle: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Listen, launch the application pointed at the listener, accept its
    /// connection and load the suite over it.
    pub(super) async fn initialize(&self, cancel: &CancellationToken) -> Result<Session, RpcError> {
        let listener = TcpListener::bind(self.options.bind).await?;
        let endpoint = listener.local_addr()?;
        let handle = self
            .launcher
            .launch_application(LaunchOptions {
                endpoint,
                arguments: self.options.arguments.clone(),
                environment: self.options.environment.clone(),
            })
            .await?;
        tracing::debug!(%endpoint, application = %handle.description, "application launched");
        *self.handle.lock() = Some(handle.clone());

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Canceled),
            exited = self.launcher.wait_for_exit(handle, cancel.child_token()) => {
                let success = exited?;
                return Err(RpcError::handler(format!(
                    "application exited before connecting (success: {success})"
                )));
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tracing::debug!(%peer, "application connected");
                stream
            }
        };
        stream.set_nodelay(true)?;

        let client = ClientConnection::new(stream, self.client_options.clone());
        let subscriptions = client.start(cancel).await?;
        self.subscriptions.lock().extend(subscriptions);
        let suite = match client.test_suite(cancel).await {
            Ok(suite) => suite,
            Err(e) => {
                tracing::debug!(error = %e, "suite load failed, closing the connection");
                client.shutdown().await;
                return Err(e);
            }
        };
        let session = Session::remote(client.connection().clone(), suite);
        let _ = self.client.set(client);
        Ok(session)
    }

    /// Run the connection while watching the application. An application
    /// exit ends the run; a failed exit is an error.
    pub(super) async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        let client = self
            .client
            .get()
            .ok_or_else(|| RpcError::handler("launched server has no connection"))?;
        let Some(handle) = self.handle.lock().clone() else {
            return client.run(cancel).await;
        };
        tokio::select! {
            biased;
            result = client.run(cancel) => result,
            exited = self.launcher.wait_for_exit(handle, cancel.child_token()) => {
                client.stop().await;
                match exited? {
                    true => Ok(()),
                    false => Err(RpcError::handler("application exited with a failure")),
                }
            }
        }
    }

    pub(super) async fn stop(&self) -> Result<(), RpcError> {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        if let Some(client) = self.client.get() {
            client.shutdown().await;
        }
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => self.launcher.stop_application(handle).await,
            None => Ok(()),
        }
    }
}
