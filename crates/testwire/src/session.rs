//! Uniform access to a loaded suite, whether it lives in this process or
//! behind a connection.

use std::sync::Arc;

use parking_lot::Mutex;
use testwire_core::{
    RpcError, SettingsBag, StatisticsEvent, TestName, TestPath, TestResult, TestStatus,
};
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::context::{TestContext, TestLogger};
use crate::objects::{EventSink, TestCase, TestCaseStub, TestSuite, TestSuiteStub};

struct LocalState {
    suite: Arc<dyn TestSuite>,
    settings: Mutex<SettingsBag>,
    sink: Arc<dyn EventSink>,
    want_statistics: bool,
}

impl LocalState {
    fn logger(&self) -> TestLogger {
        let log_level = self.settings.lock().log_level();
        TestLogger::local(self.sink.clone(), self.want_statistics, log_level)
    }
}

#[derive(Clone)]
enum Inner {
    Local(Arc<LocalState>),
    Remote {
        connection: Connection,
        suite: Arc<TestSuiteStub>,
    },
}

/// A handle on one loaded test suite.
#[derive(Clone)]
pub struct Session {
    inner: Inner,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Local(_) => f.write_str("Session::Local"),
            Inner::Remote { connection, suite } => f
                .debug_struct("Session::Remote")
                .field("connection", connection)
                .field("suite", &suite.id())
                .finish(),
        }
    }
}

impl Session {
    /// A session over an in-process suite. Nothing touches the wire.
    pub fn local(
        suite: Arc<dyn TestSuite>,
        settings: SettingsBag,
        sink: Arc<dyn EventSink>,
        want_statistics: bool,
    ) -> Self {
        Self {
            inner: Inner::Local(Arc::new(LocalState {
                suite,
                settings: Mutex::new(settings),
                sink,
                want_statistics,
            })),
        }
    }

    pub fn remote(connection: Connection, suite: Arc<TestSuiteStub>) -> Self {
        Self {
            inner: Inner::Remote { connection, suite },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.inner, Inner::Local(_))
    }

    pub fn connection(&self) -> Option<&Connection> {
        match &self.inner {
            Inner::Remote { connection, .. } => Some(connection),
            Inner::Local(_) => None,
        }
    }

    pub fn settings(&self) -> SettingsBag {
        match &self.inner {
            Inner::Local(state) => state.settings.lock().clone(),
            Inner::Remote { connection, .. } => connection.settings(),
        }
    }

    /// Change the settings. A remote session forwards the change to the host.
    pub fn update_settings(&self, f: impl FnOnce(&mut SettingsBag)) {
        match &self.inner {
            Inner::Local(state) => f(&mut *state.settings.lock()),
            Inner::Remote { connection, .. } => connection.update_settings(f),
        }
    }

    pub fn set_log_level(&self, level: i32) {
        self.update_settings(|bag| bag.set_log_level(level));
    }

    pub async fn root_test_case(&self, cancel: &CancellationToken) -> Result<TestNode, RpcError> {
        match &self.inner {
            Inner::Local(state) => Ok(TestNode::local(state.suite.root_test_case(), state)),
            Inner::Remote { suite, .. } => Ok(TestNode::remote(suite.root_test_case(cancel).await?)),
        }
    }

    pub async fn resolve(
        &self,
        path: &TestPath,
        cancel: &CancellationToken,
    ) -> Result<TestNode, RpcError> {
        match &self.inner {
            Inner::Local(state) => {
                let test = state.suite.resolve(path.clone(), cancel.clone()).await?;
                Ok(TestNode::local(test, state))
            }
            Inner::Remote { suite, .. } => {
                Ok(TestNode::remote(suite.resolve_from_path(path, cancel).await?))
            }
        }
    }
}

#[derive(Clone)]
enum NodeInner {
    Local {
        test: Arc<dyn TestCase>,
        session: Arc<LocalState>,
    },
    Remote(Arc<TestCaseStub>),
}

/// A test case reached through a [`Session`].
#[derive(Clone)]
pub struct TestNode {
    inner: NodeInner,
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NodeInner::Local { test, .. } => write!(f, "TestNode::Local({})", test.name()),
            NodeInner::Remote(stub) => write!(f, "TestNode::Remote({:?})", stub),
        }
    }
}

impl TestNode {
    fn local(test: Arc<dyn TestCase>, session: &Arc<LocalState>) -> Self {
        Self {
            inner: NodeInner::Local {
                test,
                session: session.clone(),
            },
        }
    }

    fn remote(stub: Arc<TestCaseStub>) -> Self {
        Self {
            inner: NodeInner::Remote(stub),
        }
    }

    /// The stub behind a remote node.
    pub fn stub(&self) -> Option<&Arc<TestCaseStub>> {
        match &self.inner {
            NodeInner::Remote(stub) => Some(stub),
            NodeInner::Local { .. } => None,
        }
    }

    pub async fn name(&self, cancel: &CancellationToken) -> Result<TestName, RpcError> {
        match &self.inner {
            NodeInner::Local { test, .. } => Ok(test.name()),
            NodeInner::Remote(stub) => stub.name(cancel).await,
        }
    }

    pub async fn path(&self, cancel: &CancellationToken) -> Result<TestPath, RpcError> {
        match &self.inner {
            NodeInner::Local { test, .. } => Ok(test.path()),
            NodeInner::Remote(stub) => stub.path(cancel).await,
        }
    }

    pub async fn children(&self, cancel: &CancellationToken) -> Result<Vec<TestNode>, RpcError> {
        match &self.inner {
            NodeInner::Local { test, session } => Ok(test
                .children(cancel.clone())
                .await?
                .into_iter()
                .map(|child| TestNode::local(child, session))
                .collect()),
            NodeInner::Remote(stub) => Ok(stub
                .children(cancel)
                .await?
                .into_iter()
                .map(TestNode::remote)
                .collect()),
        }
    }

    pub async fn parameters(&self, cancel: &CancellationToken) -> Result<Vec<TestNode>, RpcError> {
        match &self.inner {
            NodeInner::Local { test, session } => Ok(test
                .parameters(cancel.clone())
                .await?
                .into_iter()
                .map(|child| TestNode::local(child, session))
                .collect()),
            NodeInner::Remote(stub) => Ok(stub
                .parameters(cancel)
                .await?
                .into_iter()
                .map(TestNode::remote)
                .collect()),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TestResult, RpcError> {
        match &self.inner {
            NodeInner::Local { test, session } => run_local(test.as_ref(), session, cancel).await,
            NodeInner::Remote(stub) => stub.run(cancel).await,
        }
    }
}

async fn run_local(
    test: &dyn TestCase,
    session: &LocalState,
    cancel: &CancellationToken,
) -> Result<TestResult, RpcError> {
    let logger = session.logger();
    let settings = session.settings.lock().clone();
    let context = TestContext::new(logger.clone(), settings, cancel.child_token());
    let name = test.name();

    logger.statistics(StatisticsEvent::running(name.clone()));
    let result = tokio::select! {
        biased;
        result = test.run(context) => result,
        _ = cancel.cancelled() => Err(RpcError::Canceled),
    };
    let status = match &result {
        Ok(result) => result.status,
        Err(e) if e.is_canceled() => TestStatus::Canceled,
        Err(_) => TestStatus::Error,
    };
    logger.statistics(StatisticsEvent::finished(name, status));
    result
}
