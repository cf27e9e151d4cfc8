//! A small, fully deterministic test tree for exercising connections.
//!
//! ```text
//! Fixture
//! ├── passes        succeeds
//! ├── fails         reports an Error result
//! ├── errors        handler error
//! ├── panics        panics inside the handler
//! ├── blocks        waits until canceled
//! ├── logs          logs a message and a debug entry, then succeeds
//! └── parameterized (parameters: a, b), each succeeds
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use testwire::prelude::*;
use testwire::{LogEntry, PathKind, PathNode, StatisticsEvent};
use tokio::sync::Notify;

pub const ROOT: &str = "Fixture";

/// Observations shared between the fixture and the test driving it.
#[derive(Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    pub runs: AtomicUsize,
    /// Signaled once `blocks` has started running.
    pub blocking_started: Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Container,
    Pass,
    Fail,
    Error,
    Panic,
    Block,
    Log,
}

pub struct FixtureTest {
    name: TestName,
    path: TestPath,
    behavior: Behavior,
    children: Vec<Arc<dyn TestCase>>,
    parameters: Vec<Arc<dyn TestCase>>,
    probe: Arc<Probe>,
}

impl FixtureTest {
    fn leaf(parent: &TestPath, name: &str, behavior: Behavior, probe: &Arc<Probe>) -> Self {
        Self {
            name: TestName::new(name),
            path: parent.child(PathNode::named(PathKind::Test, name)),
            behavior,
            children: Vec::new(),
            parameters: Vec::new(),
            probe: probe.clone(),
        }
    }
}

impl TestCase for FixtureTest {
    fn name(&self) -> TestName {
        self.name.clone()
    }

    fn path(&self) -> TestPath {
        self.path.clone()
    }

    fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }

    fn children(
        &self,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn TestCase>>, RpcError>> {
        Box::pin(async move { Ok(self.children.clone()) })
    }

    fn parameters(
        &self,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn TestCase>>, RpcError>> {
        Box::pin(async move { Ok(self.parameters.clone()) })
    }

    fn run(&self, context: TestContext) -> BoxFuture<'_, Result<TestResult, RpcError>> {
        Box::pin(async move {
            self.probe.runs.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Pass => Ok(TestResult::success(self.name.clone())),
                Behavior::Fail => Ok(TestResult::error(self.name.clone(), "expected failure")),
                Behavior::Error => Err(RpcError::handler("fixture handler error")),
                Behavior::Panic => panic!("fixture panic"),
                Behavior::Block => {
                    self.probe.blocking_started.notify_one();
                    context.canceled().await;
                    Err(RpcError::Canceled)
                }
                Behavior::Log => {
                    context.logger.message("hello from the host").await;
                    context.logger.debug(2, "verbose detail").await;
                    Ok(TestResult::success(self.name.clone()))
                }
                Behavior::Container => {
                    let mut result = TestResult::new(self.name.clone(), TestStatus::None);
                    for child in self.children.iter().chain(&self.parameters) {
                        let child_result = match child.run(context.clone()).await {
                            Ok(child_result) => child_result,
                            Err(e) if e.is_canceled() => {
                                TestResult::new(child.name(), TestStatus::Canceled)
                            }
                            Err(e) => TestResult::error(child.name(), e.to_string()),
                        };
                        result.add_child(child_result);
                    }
                    Ok(result)
                }
            }
        })
    }
}

pub struct FixtureSuite {
    root: Arc<dyn TestCase>,
}

impl FixtureSuite {
    pub fn new(probe: Arc<Probe>) -> Self {
        let root_path = TestPath::root(PathNode::named(PathKind::Suite, ROOT));

        let mut parameterized =
            FixtureTest::leaf(&root_path, "parameterized", Behavior::Container, &probe);
        parameterized.parameters = ["a", "b"]
            .into_iter()
            .map(|value| {
                Arc::new(FixtureTest {
                    name: TestName::new("parameterized").with_parameter("value", value),
                    path: parameterized
                        .path
                        .child(PathNode::parameter("value", "string", value)),
                    behavior: Behavior::Pass,
                    children: Vec::new(),
                    parameters: Vec::new(),
                    probe: probe.clone(),
                }) as Arc<dyn TestCase>
            })
            .collect();

        let children: Vec<Arc<dyn TestCase>> = vec![
            Arc::new(FixtureTest::leaf(&root_path, "passes", Behavior::Pass, &probe)),
            Arc::new(FixtureTest::leaf(&root_path, "fails", Behavior::Fail, &probe)),
            Arc::new(FixtureTest::leaf(&root_path, "errors", Behavior::Error, &probe)),
            Arc::new(FixtureTest::leaf(&root_path, "panics", Behavior::Panic, &probe)),
            Arc::new(FixtureTest::leaf(&root_path, "blocks", Behavior::Block, &probe)),
            Arc::new(FixtureTest::leaf(&root_path, "logs", Behavior::Log, &probe)),
            Arc::new(parameterized),
        ];

        let root = FixtureTest {
            name: TestName::new(ROOT),
            path: root_path,
            behavior: Behavior::Container,
            children,
            parameters: Vec::new(),
            probe,
        };
        Self {
            root: Arc::new(root),
        }
    }
}

impl TestSuite for FixtureSuite {
    fn name(&self) -> TestName {
        TestName::new(ROOT)
    }

    fn root_test_case(&self) -> Arc<dyn TestCase> {
        self.root.clone()
    }
}

/// Loads a fresh [`FixtureSuite`] on every request.
pub struct FixtureFramework {
    pub probe: Arc<Probe>,
}

impl FixtureFramework {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            probe: Arc::new(Probe::default()),
        })
    }
}

impl TestFramework for FixtureFramework {
    fn load_suite(
        &self,
        _settings: SettingsBag,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Arc<dyn TestSuite>, RpcError>> {
        Box::pin(async move {
            self.probe.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixtureSuite::new(self.probe.clone())) as Arc<dyn TestSuite>)
        })
    }
}

/// Path of a direct child of the fixture root.
pub fn child_path(name: &str) -> TestPath {
    TestPath::root(PathNode::named(PathKind::Suite, ROOT)).child(PathNode::named(PathKind::Test, name))
}

/// Event sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub logs: Mutex<Vec<LogEntry>>,
    pub statistics: Mutex<Vec<StatisticsEvent>>,
    changed: Notify,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until `predicate` holds for the recorded state.
    pub async fn wait_until(&self, predicate: impl Fn(&[LogEntry], &[StatisticsEvent]) -> bool) {
        loop {
            let notified = self.changed.notified();
            if predicate(&self.logs.lock(), &self.statistics.lock()) {
                return;
            }
            notified.await;
        }
    }
}

impl EventSink for RecordingSink {
    fn log(&self, entry: LogEntry) {
        self.logs.lock().push(entry);
        self.changed.notify_waiters();
    }

    fn statistics(&self, event: StatisticsEvent) {
        self.statistics.lock().push(event);
        self.changed.notify_waiters();
    }
}
