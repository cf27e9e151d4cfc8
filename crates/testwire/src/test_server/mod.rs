//! Connection setup for the supported topologies behind one surface.

mod launched;
mod local;
mod pipe;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use testwire_core::RpcError;
use tokio_util::sync::CancellationToken;

use crate::client::ClientOptions;
use crate::objects::TestFramework;
use crate::server::ServerOptions;
use crate::session::Session;

pub use launched::{ApplicationHandle, LaunchOptions, LaunchedOptions, Launcher};

use launched::LaunchedServer;
use local::LocalServer;
use pipe::PipeServer;

/// Lifecycle of a [`TestServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Initializing,
    Ready,
    Stopped,
}

enum Backend {
    Local(LocalServer),
    Pipe(PipeServer),
    Launched(LaunchedServer),
}

impl Backend {
    fn kind(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Pipe(_) => "pipe",
            Backend::Launched(_) => "launched",
        }
    }
}

/// Hands out a [`Session`] on a loaded suite, however the suite is hosted.
pub struct TestServer {
    backend: Backend,
    state: Mutex<ServerState>,
    session: Mutex<Option<Session>>,
    released: AtomicBool,
}

impl TestServer {
    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            state: Mutex::new(ServerState::Constructed),
            session: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Run the framework in this process without any wire protocol.
    pub fn local(framework: Arc<dyn TestFramework>, options: ClientOptions) -> Self {
        Self::with_backend(Backend::Local(LocalServer::new(framework, options)))
    }

    /// Host the framework behind a server connection joined to a client
    /// connection by an in-memory pipe.
    pub fn pipe(
        framework: Arc<dyn TestFramework>,
        client: ClientOptions,
        server: ServerOptions,
    ) -> Self {
        Self::with_backend(Backend::Pipe(PipeServer::new(framework, client, server)))
    }

    /// Reach a host in an external application started by `launcher`.
    pub fn launched(
        launcher: Arc<dyn Launcher>,
        options: LaunchedOptions,
        client: ClientOptions,
    ) -> Self {
        Self::with_backend(Backend::Launched(LaunchedServer::new(
            launcher, options, client,
        )))
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(RpcError::handler(format!(
                "test server is {:?}, expected {from:?}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }

    /// Acquire a session and load the suite through it.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<Session, RpcError> {
        self.transition(ServerState::Constructed, ServerState::Initializing)?;
        let result = match &self.backend {
            Backend::Local(backend) => backend.initialize(cancel).await,
            Backend::Pipe(backend) => backend.initialize(cancel).await,
            Backend::Launched(backend) => backend.initialize(cancel).await,
        };
        match result {
            Ok(session) => {
                tracing::debug!(backend = self.backend.kind(), "test server ready");
                *self.session.lock() = Some(session.clone());
                *self.state.lock() = ServerState::Ready;
                Ok(session)
            }
            Err(e) => {
                tracing::debug!(backend = self.backend.kind(), error = %e, "test server failed to initialize");
                *self.state.lock() = ServerState::Stopped;
                Err(e)
            }
        }
    }

    pub fn session(&self) -> Result<Session, RpcError> {
        match (self.state(), self.session.lock().clone()) {
            (ServerState::Ready, Some(session)) => Ok(session),
            (state, _) => Err(RpcError::handler(format!(
                "no session while the test server is {state:?}"
            ))),
        }
    }

    /// Wait until the server ends, is stopped, or `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        if self.state() != ServerState::Ready {
            return Err(RpcError::handler("test server is not ready"));
        }
        match &self.backend {
            Backend::Local(backend) => backend.run(cancel).await,
            Backend::Pipe(backend) => backend.run(cancel).await,
            Backend::Launched(backend) => backend.run(cancel).await,
        }
    }

    /// Shut the connection down and release the host. A second call is a
    /// no-op.
    pub async fn stop(&self) -> Result<(), RpcError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *self.state.lock() = ServerState::Stopped;
        self.session.lock().take();
        tracing::debug!(backend = self.backend.kind(), "stopping test server");
        match &self.backend {
            Backend::Local(backend) => backend.stop().await,
            Backend::Pipe(backend) => backend.stop().await,
            Backend::Launched(backend) => backend.stop().await,
        }
    }
}
