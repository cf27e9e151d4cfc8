use std::sync::Arc;

use futures_util::future::BoxFuture;
use testwire_core::{
    Command, CommandKind, Element, ObjectId, ObjectType, ProtocolError, RpcError, TestName,
    TestPath, WireValue, require_document,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{TestCase, TestCaseStub};
use crate::connection::{Connection, WeakConnection, expect_reference};

/// A loaded collection of tests.
///
/// `root_test_case` must hand out the same instance on every call so the
/// root keeps one object id per connection.
pub trait TestSuite: Send + Sync + 'static {
    fn name(&self) -> TestName;

    fn root_test_case(&self) -> Arc<dyn TestCase>;

    /// Find the test case at `path`. The default walks down from the root.
    fn resolve(
        &self,
        path: TestPath,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Arc<dyn TestCase>, RpcError>> {
        Box::pin(async move { resolve_path(self.root_test_case(), &path, &cancel).await })
    }
}

/// Walk children and parameters, following whichever node is a prefix of
/// `path`, until the exact path is reached.
pub async fn resolve_path(
    root: Arc<dyn TestCase>,
    path: &TestPath,
    cancel: &CancellationToken,
) -> Result<Arc<dyn TestCase>, RpcError> {
    let not_found = || RpcError::handler(format!("no test case at {}", path.full_name()));
    let mut current = root;
    if !current.path().is_prefix_of(path) {
        return Err(not_found());
    }
    loop {
        let current_path = current.path();
        if current_path == *path {
            return Ok(current);
        }
        if cancel.is_cancelled() {
            return Err(RpcError::Canceled);
        }

        let mut candidates = current.children(cancel.clone()).await?;
        candidates.extend(current.parameters(cancel.clone()).await?);
        let next = candidates.into_iter().find(|candidate| {
            let candidate_path = candidate.path();
            candidate_path.depth() > current_path.depth() && candidate_path.is_prefix_of(path)
        });
        match next {
            Some(next) => current = next,
            None => return Err(not_found()),
        }
    }
}

pub(crate) struct SuiteServant {
    suite: Arc<dyn TestSuite>,
}

impl SuiteServant {
    pub(crate) fn new(suite: Arc<dyn TestSuite>) -> Self {
        Self { suite }
    }

    pub(crate) async fn invoke(
        &self,
        connection: &Connection,
        command: &Command,
        cancel: CancellationToken,
    ) -> Result<Option<Element>, RpcError> {
        let test = match command.kind {
            CommandKind::GetRootTestCase => self.suite.root_test_case(),
            CommandKind::ResolveFromPath => {
                let path = require_document::<TestPath>(command.argument.as_ref())?;
                self.suite.resolve(path, cancel).await?
            }
            other => return Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        };
        Ok(Some(connection.register_test_case(test).encode()))
    }
}

/// The peer's test suite.
pub struct TestSuiteStub {
    id: ObjectId,
    connection: WeakConnection,
    root: OnceCell<Arc<TestCaseStub>>,
}

impl std::fmt::Debug for TestSuiteStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSuiteStub")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl TestSuiteStub {
    pub(crate) fn attach(id: ObjectId, connection: WeakConnection) -> Self {
        Self {
            id,
            connection,
            root: OnceCell::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub async fn root_test_case(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<TestCaseStub>, RpcError> {
        self.root
            .get_or_try_init(|| self.fetch(CommandKind::GetRootTestCase, None, cancel))
            .await
            .cloned()
    }

    pub async fn resolve_from_path(
        &self,
        path: &TestPath,
        cancel: &CancellationToken,
    ) -> Result<Arc<TestCaseStub>, RpcError> {
        self.fetch(CommandKind::ResolveFromPath, Some(path.encode()), cancel)
            .await
    }

    async fn fetch(
        &self,
        kind: CommandKind,
        argument: Option<Element>,
        cancel: &CancellationToken,
    ) -> Result<Arc<TestCaseStub>, RpcError> {
        let connection = self.connection.upgrade()?;
        let value = connection.call(kind, Some(self.id), argument, cancel).await?;
        let reference = expect_reference(value, ObjectType::TestCase)?;
        connection.resolve_stub(reference.id)
    }
}
