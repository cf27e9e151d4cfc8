//! testwire-testkit: shared scenarios for testwire connections.
//!
//! Provides the `StreamFactory` trait and scenarios that every byte stream
//! carrying a connection must pass.
//!
//! # Usage
//!
//! ```ignore
//! use testwire_testkit::{DuplexFactory, TcpFactory};
//!
//! #[tokio::test]
//! async fn duplex_cancel_in_flight_run() {
//!     testwire_testkit::run_cancel_in_flight_run::<DuplexFactory>().await;
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use testwire::wire::FRAMEWORK_OBJECT_ID;
use testwire::{
    ClientConnection, ClientOptions, CommandKind, ObjectId, ProtocolError, RpcError,
    ServerConnection, ServerOptions, SettingsBag, StatisticsKind, Subscription, TestStatus,
    TransportError,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub mod fixture;
pub mod raw;

use fixture::{FixtureFramework, RecordingSink, child_path};
use raw::RawPeer;

/// Upper bound for anything a scenario waits on.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Stream or connection setup failed.
    Setup(String),
    /// A remote call failed.
    Rpc(RpcError),
    /// Transport error.
    Transport(TransportError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Rpc(e) => write!(f, "RPC error: {}", e),
            TestError::Transport(e) => write!(f, "transport error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<RpcError> for TestError {
    fn from(e: RpcError) -> Self {
        TestError::Rpc(e)
    }
}

impl From<ProtocolError> for TestError {
    fn from(e: ProtocolError) -> Self {
        TestError::Rpc(e.into())
    }
}

impl From<TransportError> for TestError {
    fn from(e: TransportError) -> Self {
        TestError::Transport(e)
    }
}

impl From<std::io::Error> for TestError {
    fn from(e: std::io::Error) -> Self {
        TestError::Setup(e.to_string())
    }
}

macro_rules! ensure {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err(TestError::Assertion(format!($($msg)+)));
        }
    };
}

/// Factory trait for creating connected byte-stream pairs.
pub trait StreamFactory: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Returns (client_side, server_side).
    fn connect_pair() -> impl Future<Output = Result<(Self::Stream, Self::Stream), TestError>> + Send;
}

/// In-memory pipe.
pub struct DuplexFactory;

impl StreamFactory for DuplexFactory {
    type Stream = tokio::io::DuplexStream;

    async fn connect_pair() -> Result<(Self::Stream, Self::Stream), TestError> {
        Ok(tokio::io::duplex(64 * 1024))
    }
}

/// Loopback TCP.
pub struct TcpFactory;

impl StreamFactory for TcpFactory {
    type Stream = tokio::net::TcpStream;

    async fn connect_pair() -> Result<(Self::Stream, Self::Stream), TestError> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (client, accepted) =
            tokio::try_join!(tokio::net::TcpStream::connect(addr), listener.accept())?;
        client.set_nodelay(true)?;
        accepted.0.set_nodelay(true)?;
        Ok((client, accepted.0))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A started client/server pair over one stream from `F`.
pub struct Pair {
    pub client: ClientConnection,
    pub server: ServerConnection,
    pub framework: Arc<FixtureFramework>,
    pub subscriptions: Vec<Subscription>,
}

impl Pair {
    pub async fn connect<F: StreamFactory>(
        client_options: ClientOptions,
        server_options: ServerOptions,
    ) -> Result<Self, TestError> {
        let (client_stream, server_stream) = F::connect_pair().await?;
        let framework = FixtureFramework::new();
        let client = ClientConnection::new(client_stream, client_options);
        let server = ServerConnection::new(server_stream, framework.clone(), server_options);

        let cancel = CancellationToken::new();
        let (mut client_subs, server_subs) =
            within("handshake", async {
                tokio::try_join!(client.start(&cancel), server.start(&cancel))
            })
            .await??;
        client_subs.extend(server_subs);

        Ok(Self {
            client,
            server,
            framework,
            subscriptions: client_subs,
        })
    }

    pub async fn close(self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.client.shutdown().await;
        self.server.stop().await;
    }
}

async fn within<T>(what: &str, fut: impl Future<Output = T>) -> Result<T, TestError> {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .map_err(|_| TestError::Assertion(format!("timed out waiting for {what}")))
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) -> Result<(), TestError> {
    within(what, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

// ============================================================================
// Scenario: handshake shares the client's settings
// ============================================================================

pub async fn run_handshake_shares_settings<F: StreamFactory>() {
    let result = run_handshake_shares_settings_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_handshake_shares_settings failed: {}", e);
    }
}

async fn run_handshake_shares_settings_inner<F: StreamFactory>() -> Result<(), TestError> {
    let mut settings = SettingsBag::new();
    settings.set_log_level(3);
    settings.set("Category", "smoke");
    let client_options = ClientOptions {
        settings: Some(settings.clone()),
        ..ClientOptions::default()
    };
    let mut host_settings = SettingsBag::new();
    host_settings.set_log_level(1);
    let server_options = ServerOptions {
        settings: Some(host_settings.clone()),
        ..ServerOptions::default()
    };

    let pair = Pair::connect::<F>(client_options, server_options.clone()).await?;
    ensure!(
        pair.server.settings() == settings,
        "host should adopt the client's settings, got {:?}",
        pair.server.settings()
    );
    ensure!(pair.client.settings() == settings, "client settings changed");
    pair.close().await;

    // Without client settings both sides end up with the host's.
    let pair = Pair::connect::<F>(ClientOptions::default(), server_options).await?;
    ensure!(
        pair.client.settings() == host_settings,
        "client should adopt the host's settings, got {:?}",
        pair.client.settings()
    );
    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: the suite is loaded once and its stub is cached
// ============================================================================

pub async fn run_suite_loaded_once<F: StreamFactory>() {
    let result = run_suite_loaded_once_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_suite_loaded_once failed: {}", e);
    }
}

async fn run_suite_loaded_once_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();

    let first = pair.client.test_suite(&cancel).await?;
    let second = pair.client.test_suite(&cancel).await?;
    ensure!(Arc::ptr_eq(&first, &second), "suite stub should be cached");
    ensure!(first.id() == ObjectId(1), "first servant id should be 1, got {:?}", first.id());

    // Asking the framework again hands back the same suite.
    let again = pair.client.framework()?.load_test_suite(&cancel).await?;
    ensure!(Arc::ptr_eq(&first, &again), "framework should return the cached suite");
    ensure!(
        pair.framework.probe.loads.load(Ordering::SeqCst) == 1,
        "suite loaded {} times",
        pair.framework.probe.loads.load(Ordering::SeqCst)
    );
    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: walking the tree
// ============================================================================

pub async fn run_walk_tree<F: StreamFactory>() {
    let result = run_walk_tree_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_walk_tree failed: {}", e);
    }
}

async fn run_walk_tree_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let root = suite.root_test_case(&cancel).await?;

    ensure!(root.name(&cancel).await?.name == fixture::ROOT, "unexpected root name");
    let info = root.info().ok_or_else(|| TestError::Assertion("root not resolved".into()))?;
    ensure!(info.has_children && !info.has_parameters, "root flags: {:?}", info);

    let children = root.children(&cancel).await?;
    let mut names = Vec::new();
    for child in &children {
        names.push(child.name(&cancel).await?.name);
        ensure!(child.id().get() > 0, "host objects get positive ids, got {:?}", child.id());
    }
    ensure!(
        names == ["passes", "fails", "errors", "panics", "blocks", "logs", "parameterized"],
        "children: {:?}",
        names
    );

    // Children are cached per stub.
    let again = root.children(&cancel).await?;
    ensure!(
        children.iter().zip(&again).all(|(a, b)| Arc::ptr_eq(a, b)),
        "children should be cached"
    );

    // Resolving a path hands back the stub already known for that object.
    let resolved = suite.resolve_from_path(&child_path("logs"), &cancel).await?;
    ensure!(Arc::ptr_eq(&resolved, &children[5]), "resolved stub should be the cached one");

    let parameterized = &children[6];
    let parameters = parameterized.parameters(&cancel).await?;
    ensure!(parameters.len() == 2, "expected two parameter instances");
    let name = parameters[1].name(&cancel).await?;
    ensure!(
        name.parameters.first().map(|p| p.value.as_str()) == Some("b"),
        "parameter name: {:?}",
        name
    );
    let path = parameters[1].path(&cancel).await?;
    ensure!(
        parameterized.path(&cancel).await?.is_prefix_of(&path),
        "parameter path should extend its parent's"
    );

    let missing = suite.resolve_from_path(&child_path("nope"), &cancel).await;
    ensure!(missing.is_err(), "resolving an unknown path should fail");

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: results and handler failures
// ============================================================================

pub async fn run_results_and_failures<F: StreamFactory>() {
    let result = run_results_and_failures_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_results_and_failures failed: {}", e);
    }
}

async fn run_results_and_failures_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let resolve = |name: &'static str| {
        let suite = suite.clone();
        let cancel = cancel.clone();
        async move { suite.resolve_from_path(&child_path(name), &cancel).await }
    };

    let passed = resolve("passes").await?.run(&cancel).await?;
    ensure!(passed.status == TestStatus::Success, "passes: {:?}", passed);

    let failed = resolve("fails").await?.run(&cancel).await?;
    ensure!(failed.status == TestStatus::Error, "fails: {:?}", failed);
    ensure!(failed.error.as_deref() == Some("expected failure"), "fails: {:?}", failed);

    match resolve("errors").await?.run(&cancel).await {
        Err(RpcError::Handler { message }) if message.contains("fixture handler error") => {}
        other => return Err(TestError::Assertion(format!("errors: {:?}", other))),
    }

    match resolve("panics").await?.run(&cancel).await {
        Err(RpcError::Handler { message }) if message.contains("fixture panic") => {}
        other => return Err(TestError::Assertion(format!("panics: {:?}", other))),
    }

    // Neither failure took the connection down.
    ensure!(!pair.client.connection().is_stopped(), "client stopped");
    ensure!(!pair.server.connection().is_stopped(), "server stopped");
    let passed = resolve("passes").await?.run(&cancel).await?;
    ensure!(passed.status == TestStatus::Success, "passes after failures: {:?}", passed);

    let parameterized = resolve("parameterized").await?.run(&cancel).await?;
    ensure!(
        parameterized.count(TestStatus::Success) == 2,
        "parameterized: {:?}",
        parameterized
    );

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: canceling an in-flight run
// ============================================================================

pub async fn run_cancel_in_flight_run<F: StreamFactory>() {
    let result = run_cancel_in_flight_run_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_cancel_in_flight_run failed: {}", e);
    }
}

async fn run_cancel_in_flight_run_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let blocks = suite.resolve_from_path(&child_path("blocks"), &cancel).await?;

    let run_token = CancellationToken::new();
    let run = tokio::spawn({
        let blocks = blocks.clone();
        let run_token = run_token.clone();
        async move { blocks.run(&run_token).await }
    });

    within("blocking test to start", pair.framework.probe.blocking_started.notified()).await?;
    ensure!(
        pair.server.connection().operation_count() == 1,
        "expected one in-flight operation, got {}",
        pair.server.connection().operation_count()
    );
    run_token.cancel();

    let outcome = within("canceled run", run)
        .await?
        .map_err(|e| TestError::Setup(format!("run task failed: {e}")))?;
    ensure!(matches!(outcome, Err(RpcError::Canceled)), "run outcome: {:?}", outcome);
    ensure!(pair.client.connection().pending_count() == 0, "call still pending");
    eventually("operation table to drain", || {
        pair.server.connection().operation_count() == 0
    })
    .await?;

    // The connection keeps working after a cancellation.
    let passes = suite.resolve_from_path(&child_path("passes"), &cancel).await?;
    let passed = passes.run(&cancel).await?;
    ensure!(passed.status == TestStatus::Success, "passes after cancel: {:?}", passed);

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: concurrent calls share the connection
// ============================================================================

pub async fn run_concurrent_calls<F: StreamFactory>() {
    let result = run_concurrent_calls_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_concurrent_calls failed: {}", e);
    }
}

async fn run_concurrent_calls_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let passes = suite.resolve_from_path(&child_path("passes"), &cancel).await?;
    let fails = suite.resolve_from_path(&child_path("fails"), &cancel).await?;

    let calls = (0..32).map(|i| {
        let test = if i % 2 == 0 { passes.clone() } else { fails.clone() };
        let cancel = cancel.clone();
        async move { test.run(&cancel).await }
    });
    let results = within("concurrent runs", futures_util::future::join_all(calls)).await?;

    for (i, result) in results.into_iter().enumerate() {
        let expected = if i % 2 == 0 { TestStatus::Success } else { TestStatus::Error };
        let result = result?;
        ensure!(result.status == expected, "call {}: {:?}", i, result);
    }
    ensure!(pair.client.connection().pending_count() == 0, "calls still pending");
    ensure!(
        pair.framework.probe.runs.load(Ordering::SeqCst) == 32,
        "host ran {} tests",
        pair.framework.probe.runs.load(Ordering::SeqCst)
    );
    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: log forwarding honors the log level
// ============================================================================

pub async fn run_log_forwarding<F: StreamFactory>() {
    let result = run_log_forwarding_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_log_forwarding failed: {}", e);
    }
}

async fn run_log_forwarding_inner<F: StreamFactory>() -> Result<(), TestError> {
    let sink = RecordingSink::new();
    let mut settings = SettingsBag::new();
    settings.set_log_level(1);
    let client_options = ClientOptions {
        settings: Some(settings),
        event_sink: sink.clone(),
        ..ClientOptions::default()
    };
    let pair = Pair::connect::<F>(client_options, ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let logs = suite.resolve_from_path(&child_path("logs"), &cancel).await?;

    // Log notices travel ahead of the response on the same stream.
    logs.run(&cancel).await?;
    let texts: Vec<String> = sink.logs.lock().iter().map(|e| e.text.clone()).collect();
    ensure!(texts == ["hello from the host"], "logs at level 1: {:?}", texts);

    // Raising the level on the driver reaches the host.
    pair.client.connection().set_log_level(2);
    eventually("host to see log level 2", || {
        pair.server.settings().log_level() == 2
    })
    .await?;
    sink.logs.lock().clear();
    logs.run(&cancel).await?;
    let texts: Vec<String> = sink.logs.lock().iter().map(|e| e.text.clone()).collect();
    ensure!(
        texts == ["hello from the host", "verbose detail"],
        "logs at level 2: {:?}",
        texts
    );

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: statistics reach a subscribed client
// ============================================================================

pub async fn run_statistics_forwarding<F: StreamFactory>() {
    let result = run_statistics_forwarding_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_statistics_forwarding failed: {}", e);
    }
}

async fn run_statistics_forwarding_inner<F: StreamFactory>() -> Result<(), TestError> {
    let sink = RecordingSink::new();
    let client_options = ClientOptions {
        event_sink: sink.clone(),
        want_statistics_events: true,
        ..ClientOptions::default()
    };
    let pair = Pair::connect::<F>(client_options, ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let passes = suite.resolve_from_path(&child_path("passes"), &cancel).await?;
    passes.run(&cancel).await?;

    within(
        "finished statistics event",
        sink.wait_until(|_, stats| stats.iter().any(|e| e.kind == StatisticsKind::Finished)),
    )
    .await?;
    let stats = sink.statistics.lock().clone();
    ensure!(stats.len() == 2, "statistics: {:?}", stats);
    ensure!(stats[0].kind == StatisticsKind::Running, "statistics: {:?}", stats);
    ensure!(stats[1].status == TestStatus::Success, "statistics: {:?}", stats);
    ensure!(
        stats[1].name.as_ref().map(|n| n.name.as_str()) == Some("passes"),
        "statistics: {:?}",
        stats
    );

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: without any settings both sides share the defaults
// ============================================================================

pub async fn run_handshake_default_settings<F: StreamFactory>() {
    let result = run_handshake_default_settings_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_handshake_default_settings failed: {}", e);
    }
}

async fn run_handshake_default_settings_inner<F: StreamFactory>() -> Result<(), TestError> {
    let client_options = ClientOptions {
        want_statistics_events: true,
        ..ClientOptions::default()
    };
    let pair = Pair::connect::<F>(client_options, ServerOptions::default()).await?;
    let defaults = SettingsBag::new();
    ensure!(
        pair.client.settings() == defaults,
        "client settings: {:?}",
        pair.client.settings()
    );
    ensure!(
        pair.server.settings() == defaults,
        "host settings: {:?}",
        pair.server.settings()
    );
    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: statistics stay on the host unless asked for
// ============================================================================

pub async fn run_statistics_not_requested<F: StreamFactory>() {
    let result = run_statistics_not_requested_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_statistics_not_requested failed: {}", e);
    }
}

async fn run_statistics_not_requested_inner<F: StreamFactory>() -> Result<(), TestError> {
    let sink = RecordingSink::new();
    let client_options = ClientOptions {
        event_sink: sink.clone(),
        want_statistics_events: false,
        ..ClientOptions::default()
    };
    let pair = Pair::connect::<F>(client_options, ServerOptions::default()).await?;
    ensure!(
        !pair
            .subscriptions
            .iter()
            .any(|s| s.name() == testwire::subscription::STATISTICS_SUBSCRIPTION),
        "host started a statistics subscription"
    );

    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let passes = suite.resolve_from_path(&child_path("passes"), &cancel).await?;
    passes.run(&cancel).await?;
    passes.run(&cancel).await?;

    // Forwarding is asynchronous; give a stray event time to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = sink.statistics.lock().clone();
    ensure!(stats.is_empty(), "unrequested statistics: {:?}", stats);

    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: a cancel notice for a finished operation is ignored
// ============================================================================

pub async fn run_cancel_after_completion<F: StreamFactory>() {
    let result = run_cancel_after_completion_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_cancel_after_completion failed: {}", e);
    }
}

async fn run_cancel_after_completion_inner<F: StreamFactory>() -> Result<(), TestError> {
    let (client_stream, server_stream) = F::connect_pair().await?;
    let framework = FixtureFramework::new();
    let server = ServerConnection::new(server_stream, framework.clone(), ServerOptions::default());
    let mut driver = RawPeer::new(client_stream);
    let cancel = CancellationToken::new();

    let (started, reply) = within("handshake", async {
        tokio::join!(server.start(&cancel), driver.offer_handshake(None))
    })
    .await?;
    let _subscriptions = started?;
    reply?;

    driver.call(CommandKind::LoadTestSuite, FRAMEWORK_OBJECT_ID, -1).await?;
    let first = within("first response", driver.next_response(-1)).await??;
    ensure!(first.clone().into_result().is_ok(), "first load: {:?}", first);
    eventually("operation table to drain", || {
        server.connection().operation_count() == 0
    })
    .await?;

    driver.cancel(-1).await?;
    driver.call(CommandKind::LoadTestSuite, FRAMEWORK_OBJECT_ID, -2).await?;
    let second = within("second response", driver.next_response(-2)).await??;
    ensure!(second.clone().into_result().is_ok(), "second load: {:?}", second);
    ensure!(!server.connection().is_stopped(), "host stopped after a stale cancel");
    ensure!(
        framework.probe.loads.load(Ordering::SeqCst) == 1,
        "suite loaded {} times",
        framework.probe.loads.load(Ordering::SeqCst)
    );

    server.stop().await;
    ensure!(within("close frame", driver.sees_close()).await?, "stream ended uncleanly");
    Ok(())
}

// ============================================================================
// Scenario: shutdown and close frames end the peer cleanly
// ============================================================================

pub async fn run_clean_shutdown<F: StreamFactory>() {
    let result = run_clean_shutdown_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_clean_shutdown failed: {}", e);
    }
}

async fn run_clean_shutdown_inner<F: StreamFactory>() -> Result<(), TestError> {
    let cancel = CancellationToken::new();

    // Shutdown command.
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    pair.client.shutdown().await;
    within("host to finish after shutdown", pair.server.run(&cancel)).await??;
    ensure!(pair.server.connection().is_stopped(), "host still running");

    // Bare close frame.
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    pair.client.stop().await;
    within("host to finish after close", pair.server.run(&cancel)).await??;
    ensure!(pair.server.connection().is_stopped(), "host still running");
    ensure!(pair.client.connection().is_stopped(), "client still running");

    // Stopping twice is harmless.
    pair.client.stop().await;
    Ok(())
}

// ============================================================================
// Scenario: teardown resolves pending calls
// ============================================================================

pub async fn run_teardown_resolves_pending<F: StreamFactory>() {
    let result = run_teardown_resolves_pending_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_teardown_resolves_pending failed: {}", e);
    }
}

async fn run_teardown_resolves_pending_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let suite = pair.client.test_suite(&cancel).await?;
    let blocks = suite.resolve_from_path(&child_path("blocks"), &cancel).await?;

    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { blocks.run(&cancel).await }
    });
    within("blocking test to start", pair.framework.probe.blocking_started.notified()).await?;

    // The host goes away while the call is outstanding.
    pair.server.stop().await;
    let outcome = within("pending call to resolve", run)
        .await?
        .map_err(|e| TestError::Setup(format!("run task failed: {e}")))?;
    ensure!(matches!(outcome, Err(RpcError::Canceled)), "run outcome: {:?}", outcome);

    within("client to finish", pair.client.run(&cancel)).await??;
    ensure!(pair.client.connection().pending_count() == 0, "calls still pending");
    Ok(())
}

// ============================================================================
// Scenario: protocol errors on one call leave the connection up
// ============================================================================

pub async fn run_unknown_object<F: StreamFactory>() {
    let result = run_unknown_object_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_unknown_object failed: {}", e);
    }
}

async fn run_unknown_object_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    let connection = pair.client.connection();

    let outcome = connection
        .call(CommandKind::GetRootTestCase, Some(ObjectId(99)), None, &cancel)
        .await;
    match outcome {
        Err(RpcError::Protocol(ProtocolError::Remote(message))) if message.contains("99") => {}
        other => return Err(TestError::Assertion(format!("unknown object: {:?}", other))),
    }

    // Wrong object type for the command.
    let outcome = connection
        .call(CommandKind::GetRootTestCase, Some(ObjectId(0)), None, &cancel)
        .await;
    ensure!(
        matches!(outcome, Err(RpcError::Protocol(ProtocolError::Remote(_)))),
        "wrong type: {:?}",
        outcome
    );

    // One-way commands cannot be called.
    let outcome = connection
        .call(CommandKind::LogMessage, Some(ObjectId(0)), None, &cancel)
        .await;
    ensure!(outcome.is_err(), "one-way call accepted");

    let suite = pair.client.test_suite(&cancel).await?;
    suite.root_test_case(&cancel).await?;
    ensure!(!connection.is_stopped(), "connection stopped after protocol errors");
    pair.close().await;
    Ok(())
}

// ============================================================================
// Scenario: a canceled run() stops the connection
// ============================================================================

pub async fn run_cancel_stops_connection<F: StreamFactory>() {
    let result = run_cancel_stops_connection_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_cancel_stops_connection failed: {}", e);
    }
}

async fn run_cancel_stops_connection_inner<F: StreamFactory>() -> Result<(), TestError> {
    let pair = Pair::connect::<F>(ClientOptions::default(), ServerOptions::default()).await?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = within("client run", pair.client.run(&cancel)).await?;
    ensure!(matches!(outcome, Err(RpcError::Canceled)), "run outcome: {:?}", outcome);
    ensure!(pair.client.connection().is_stopped(), "client still running");

    within("host to see the close frame", pair.server.run(&CancellationToken::new())).await??;

    let suite = pair.client.test_suite(&CancellationToken::new()).await?;
    let after = suite.root_test_case(&CancellationToken::new()).await;
    ensure!(after.is_err(), "calls after stop should fail");
    Ok(())
}
