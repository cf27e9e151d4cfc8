use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use testwire_core::{
    Command, CommandKind, Element, ObjectId, ObjectRef, ObjectType, ProtocolError, RpcError,
    TestName, TestPath, TestResult, WireValue, require_document,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, WeakConnection};
use crate::context::TestContext;

const LIST_ELEMENT: &str = "TestCaseList";

/// One node of the test tree.
pub trait TestCase: Send + Sync + 'static {
    fn name(&self) -> TestName;

    fn path(&self) -> TestPath;

    fn has_children(&self) -> bool {
        false
    }

    fn has_parameters(&self) -> bool {
        false
    }

    /// Child test cases. Implementations should return the same instances
    /// on every call so each keeps one object id.
    fn children(
        &self,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn TestCase>>, RpcError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    /// Parameterized instances of this test case.
    fn parameters(
        &self,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn TestCase>>, RpcError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn run(&self, context: TestContext) -> BoxFuture<'_, Result<TestResult, RpcError>>;
}

/// Identifying metadata fetched by `Initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseInfo {
    pub name: TestName,
    pub path: TestPath,
    pub has_children: bool,
    pub has_parameters: bool,
}

impl WireValue for TestCaseInfo {
    const ELEMENT: &'static str = "TestCase";

    fn encode(&self) -> Element {
        Element::new(Self::ELEMENT)
            .with_attr("HasParameters", self.has_parameters)
            .with_attr("HasChildren", self.has_children)
            .with_child(self.name.encode())
            .with_child(self.path.encode())
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let flag = |name: &str| -> Result<bool, ProtocolError> {
            element
                .bool_attr(name)?
                .ok_or_else(|| ProtocolError::MissingAttribute {
                    element: element.name.clone(),
                    attribute: name.into(),
                })
        };
        Ok(Self {
            name: require_document(element.child(TestName::ELEMENT))?,
            path: require_document(element.child(TestPath::ELEMENT))?,
            has_children: flag("HasChildren")?,
            has_parameters: flag("HasParameters")?,
        })
    }
}

fn encode_refs(refs: &[ObjectRef]) -> Element {
    let mut list = Element::new(LIST_ELEMENT);
    for reference in refs {
        list.push_child(reference.encode());
    }
    list
}

fn decode_refs(value: Option<Element>) -> Result<Vec<ObjectRef>, ProtocolError> {
    let list = value.ok_or_else(|| ProtocolError::MissingChild {
        element: "Response".into(),
        child: LIST_ELEMENT.into(),
    })?;
    list.expect_name(LIST_ELEMENT)?;
    list.children
        .iter()
        .map(|child| ObjectRef::decode_typed(child, ObjectType::TestCase))
        .collect()
}

// ============================================================================
// Servant
// ============================================================================

pub(crate) struct TestCaseServant {
    test: Arc<dyn TestCase>,
    children: OnceCell<Vec<ObjectRef>>,
    parameters: OnceCell<Vec<ObjectRef>>,
}

impl TestCaseServant {
    pub(crate) fn new(test: Arc<dyn TestCase>) -> Self {
        Self {
            test,
            children: OnceCell::new(),
            parameters: OnceCell::new(),
        }
    }

    pub(crate) async fn invoke(
        &self,
        connection: &Connection,
        command: &Command,
        cancel: CancellationToken,
    ) -> Result<Option<Element>, RpcError> {
        match command.kind {
            CommandKind::Initialize => {
                let info = TestCaseInfo {
                    name: self.test.name(),
                    path: self.test.path(),
                    has_children: self.test.has_children(),
                    has_parameters: self.test.has_parameters(),
                };
                Ok(Some(info.encode()))
            }
            CommandKind::GetChildren => {
                let refs = self
                    .children
                    .get_or_try_init(|| async {
                        let children = self.test.children(cancel).await?;
                        Ok::<_, RpcError>(register_all(connection, children))
                    })
                    .await?;
                Ok(Some(encode_refs(refs)))
            }
            CommandKind::GetParameters => {
                let refs = self
                    .parameters
                    .get_or_try_init(|| async {
                        let parameters = self.test.parameters(cancel).await?;
                        Ok::<_, RpcError>(register_all(connection, parameters))
                    })
                    .await?;
                Ok(Some(encode_refs(refs)))
            }
            CommandKind::Run => {
                let result = self.run(connection, cancel).await?;
                Ok(Some(result.encode()))
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        }
    }

    async fn run(
        &self,
        connection: &Connection,
        cancel: CancellationToken,
    ) -> Result<TestResult, RpcError> {
        let context = connection.test_context(cancel);
        let logger = context.logger.clone();
        let name = self.test.name();

        logger.statistics(testwire_core::StatisticsEvent::running(name.clone()));
        let result = self.test.run(context).await;
        let status = match &result {
            Ok(result) => result.status,
            Err(e) if e.is_canceled() => testwire_core::TestStatus::Canceled,
            Err(_) => testwire_core::TestStatus::Error,
        };
        logger.statistics(testwire_core::StatisticsEvent::finished(name, status));
        result
    }
}

fn register_all(connection: &Connection, tests: Vec<Arc<dyn TestCase>>) -> Vec<ObjectRef> {
    tests
        .into_iter()
        .map(|test| connection.register_test_case(test))
        .collect()
}

// ============================================================================
// Stub
// ============================================================================

/// Where a [`TestCaseStub`] is in fetching its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubState {
    /// Only the object id is known.
    Unresolved,
    /// An `Initialize` round-trip is in flight.
    Initializing,
    Resolved(Arc<TestCaseInfo>),
}

/// The peer's test case.
pub struct TestCaseStub {
    id: ObjectId,
    connection: WeakConnection,
    state: Mutex<StubState>,
    init: tokio::sync::Mutex<()>,
    children: OnceCell<Vec<Arc<TestCaseStub>>>,
    parameters: OnceCell<Vec<Arc<TestCaseStub>>>,
}

impl std::fmt::Debug for TestCaseStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCaseStub")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl TestCaseStub {
    pub(crate) fn attach(id: ObjectId, connection: WeakConnection) -> Self {
        Self {
            id,
            connection,
            state: Mutex::new(StubState::Unresolved),
            init: tokio::sync::Mutex::new(()),
            children: OnceCell::new(),
            parameters: OnceCell::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> StubState {
        self.state.lock().clone()
    }

    /// Cached metadata, if already resolved.
    pub fn info(&self) -> Option<Arc<TestCaseInfo>> {
        match &*self.state.lock() {
            StubState::Resolved(info) => Some(info.clone()),
            _ => None,
        }
    }

    /// Fetch the metadata once. Concurrent callers share one round-trip;
    /// a failure leaves the stub unresolved.
    pub async fn initialize(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<TestCaseInfo>, RpcError> {
        if let Some(info) = self.info() {
            return Ok(info);
        }
        let _guard = self.init.lock().await;
        if let Some(info) = self.info() {
            return Ok(info);
        }

        *self.state.lock() = StubState::Initializing;
        let fetched = self.fetch_info(cancel).await;
        let mut state = self.state.lock();
        match fetched {
            Ok(info) => {
                let info = Arc::new(info);
                *state = StubState::Resolved(info.clone());
                Ok(info)
            }
            Err(e) => {
                *state = StubState::Unresolved;
                Err(e)
            }
        }
    }

    async fn fetch_info(&self, cancel: &CancellationToken) -> Result<TestCaseInfo, RpcError> {
        let connection = self.connection.upgrade()?;
        let value = connection
            .call(CommandKind::Initialize, Some(self.id), None, cancel)
            .await?;
        tracing::trace!(object_id = self.id.0, "test case initialized");
        Ok(require_document(value.as_ref())?)
    }

    pub async fn name(&self, cancel: &CancellationToken) -> Result<TestName, RpcError> {
        Ok(self.initialize(cancel).await?.name.clone())
    }

    pub async fn path(&self, cancel: &CancellationToken) -> Result<TestPath, RpcError> {
        Ok(self.initialize(cancel).await?.path.clone())
    }

    pub async fn children(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<TestCaseStub>>, RpcError> {
        self.children
            .get_or_try_init(|| self.fetch_list(CommandKind::GetChildren, cancel))
            .await
            .cloned()
    }

    pub async fn parameters(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<TestCaseStub>>, RpcError> {
        self.parameters
            .get_or_try_init(|| self.fetch_list(CommandKind::GetParameters, cancel))
            .await
            .cloned()
    }

    async fn fetch_list(
        &self,
        kind: CommandKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<TestCaseStub>>, RpcError> {
        let connection = self.connection.upgrade()?;
        let value = connection.call(kind, Some(self.id), None, cancel).await?;
        decode_refs(value)?
            .into_iter()
            .map(|reference| connection.resolve_stub(reference.id))
            .collect()
    }

    /// Run the test on the host. Cancel through `cancel`; the call returns
    /// once the host has answered.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<TestResult, RpcError> {
        let connection = self.connection.upgrade()?;
        let value = connection
            .call(CommandKind::Run, Some(self.id), None, cancel)
            .await?;
        Ok(require_document(value.as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testwire_core::{PathKind, PathNode};

    fn info() -> TestCaseInfo {
        TestCaseInfo {
            name: TestName::new("Adds"),
            path: TestPath::root(PathNode::named(PathKind::Suite, "Math"))
                .child(PathNode::named(PathKind::Test, "Adds")),
            has_children: false,
            has_parameters: true,
        }
    }

    #[test]
    fn info_carries_flags_and_identity() {
        let encoded = info().encode();
        assert_eq!(encoded.attr("HasParameters"), Some("true"));
        assert_eq!(encoded.attr("HasChildren"), Some("false"));
        assert_eq!(TestCaseInfo::decode(&encoded).unwrap(), info());
    }

    #[test]
    fn info_without_flags_is_rejected() {
        let mut encoded = info().encode();
        encoded.attributes.remove("HasChildren");
        assert!(matches!(
            TestCaseInfo::decode(&encoded),
            Err(ProtocolError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn lists_reject_foreign_references() {
        let list = encode_refs(&[ObjectRef::new(ObjectType::TestSuite, ObjectId(3))]);
        assert!(matches!(
            decode_refs(Some(list)),
            Err(ProtocolError::WrongObjectType { .. })
        ));
    }

    #[test]
    fn empty_list_decodes() {
        assert!(decode_refs(Some(encode_refs(&[]))).unwrap().is_empty());
    }
}
