use std::sync::Arc;

use futures_util::future::BoxFuture;
use testwire_core::{
    Command, CommandKind, Element, ObjectId, ObjectType, ProtocolError, RpcError, SettingsBag,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{TestSuite, TestSuiteStub};
use crate::connection::{Connection, WeakConnection, expect_reference};

/// Entry point of a test host: knows how to load its suite.
pub trait TestFramework: Send + Sync + 'static {
    fn load_suite(
        &self,
        settings: SettingsBag,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Arc<dyn TestSuite>, RpcError>>;
}

pub(crate) struct FrameworkServant {
    framework: Arc<dyn TestFramework>,
    suite: OnceCell<Arc<dyn TestSuite>>,
}

impl FrameworkServant {
    pub(crate) fn new(framework: Arc<dyn TestFramework>) -> Self {
        Self {
            framework,
            suite: OnceCell::new(),
        }
    }

    /// Load the suite once; later calls hand out the same registration.
    pub(crate) async fn load(
        &self,
        connection: &Connection,
        cancel: CancellationToken,
    ) -> Result<testwire_core::ObjectRef, RpcError> {
        let suite = self
            .suite
            .get_or_try_init(|| self.framework.load_suite(connection.settings(), cancel))
            .await?;
        Ok(connection.register_suite(suite.clone()))
    }

    pub(crate) async fn invoke(
        &self,
        connection: &Connection,
        command: &Command,
        cancel: CancellationToken,
    ) -> Result<Option<Element>, RpcError> {
        match command.kind {
            CommandKind::LoadTestSuite => Ok(Some(self.load(connection, cancel).await?.encode())),
            other => Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        }
    }
}

/// The peer's framework, always at the reserved id.
pub struct TestFrameworkStub {
    id: ObjectId,
    connection: WeakConnection,
}

impl TestFrameworkStub {
    pub(crate) fn attach(id: ObjectId, connection: WeakConnection) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Ask the host to load its suite. Repeated calls return the cached stub.
    pub async fn load_test_suite(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<TestSuiteStub>, RpcError> {
        let connection = self.connection.upgrade()?;
        let value = connection
            .call(CommandKind::LoadTestSuite, Some(self.id), None, cancel)
            .await?;
        let reference = expect_reference(value, ObjectType::TestSuite)?;
        connection.resolve_stub(reference.id)
    }
}
