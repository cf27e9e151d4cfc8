use std::sync::Arc;

use testwire_core::RpcError;
use tokio_util::sync::CancellationToken;

use crate::client::ClientOptions;
use crate::objects::TestFramework;
use crate::session::Session;

/// The suite runs in this process and no wire protocol is involved.
pub(super) struct LocalServer {
    framework: Arc<dyn TestFramework>,
    options: ClientOptions,
    stopped: CancellationToken,
}

impl LocalServer {
    pub(super) fn new(framework: Arc<dyn TestFramework>, options: ClientOptions) -> Self {
        Self {
            framework,
            options,
            stopped: CancellationToken::new(),
        }
    }

    pub(super) async fn initialize(&self, cancel: &CancellationToken) -> Result<Session, RpcError> {
        let settings = self.options.settings.clone().unwrap_or_default();
        let suite = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Canceled),
            suite = self.framework.load_suite(settings.clone(), cancel.child_token()) => suite?,
        };
        tracing::debug!(suite = %suite.name(), "local suite loaded");
        Ok(Session::local(
            suite,
            settings,
            self.options.event_sink.clone(),
            self.options.want_statistics_events,
        ))
    }

    /// Nothing runs in the background; wait for a stop.
    pub(super) async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        tokio::select! {
            _ = self.stopped.cancelled() => Ok(()),
            _ = cancel.cancelled() => Err(RpcError::Canceled),
        }
    }

    pub(super) async fn stop(&self) -> Result<(), RpcError> {
        self.stopped.cancel();
        Ok(())
    }
}
