use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use testwire::test_server::{ApplicationHandle, LaunchOptions, LaunchedOptions, Launcher};
use testwire::{
    BoxFuture, CancellationToken, ClientOptions, RpcError, ServerOptions, ServerState,
    SettingsBag, StatisticsKind, TestServer, TestStatus,
};
use testwire_testkit::fixture::{FixtureFramework, RecordingSink, child_path};
use tokio::sync::watch;

// ============================================================================
// In-process
// ============================================================================

#[tokio::test]
async fn local_session_runs_without_a_connection() {
    let framework = FixtureFramework::new();
    let sink = RecordingSink::new();
    let options = ClientOptions {
        event_sink: sink.clone(),
        want_statistics_events: true,
        ..ClientOptions::default()
    };
    let server = TestServer::local(framework.clone(), options);
    let cancel = CancellationToken::new();

    let session = server.initialize(&cancel).await.unwrap();
    assert!(session.is_local());
    assert!(session.connection().is_none());
    assert_eq!(server.state(), ServerState::Ready);

    let root = session.root_test_case(&cancel).await.unwrap();
    assert_eq!(root.children(&cancel).await.unwrap().len(), 7);

    let passes = session.resolve(&child_path("passes"), &cancel).await.unwrap();
    let result = passes.run(&cancel).await.unwrap();
    assert_eq!(result.status, TestStatus::Success);

    let stats = sink.statistics.lock().clone();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].kind, StatisticsKind::Running);
    assert_eq!(stats[1].status, TestStatus::Success);

    server.stop().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.session().is_err());
}

#[tokio::test]
async fn local_run_observes_cancellation() {
    let framework = FixtureFramework::new();
    let server = TestServer::local(framework.clone(), ClientOptions::default());
    let cancel = CancellationToken::new();
    let session = server.initialize(&cancel).await.unwrap();

    let blocks = session.resolve(&child_path("blocks"), &cancel).await.unwrap();
    let run_token = CancellationToken::new();
    let (outcome, _) = tokio::join!(blocks.run(&run_token), async {
        framework.probe.blocking_started.notified().await;
        run_token.cancel();
    });
    assert!(matches!(outcome, Err(RpcError::Canceled)));

    let (outcome, _) = tokio::join!(server.run(&cancel), async { cancel.cancel() });
    assert!(matches!(outcome, Err(RpcError::Canceled)));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn local_settings_are_mutable() {
    let mut settings = SettingsBag::new();
    settings.set_log_level(1);
    let options = ClientOptions {
        settings: Some(settings),
        ..ClientOptions::default()
    };
    let server = TestServer::local(FixtureFramework::new(), options);
    let session = server.initialize(&CancellationToken::new()).await.unwrap();
    assert_eq!(session.settings().log_level(), 1);
    session.set_log_level(4);
    assert_eq!(session.settings().log_level(), 4);
}

// ============================================================================
// In-memory pipe
// ============================================================================

#[tokio::test]
async fn pipe_session_goes_over_the_wire() {
    let framework = FixtureFramework::new();
    let server = TestServer::pipe(
        framework.clone(),
        ClientOptions::default(),
        ServerOptions::default(),
    );
    let cancel = CancellationToken::new();
    assert_eq!(server.state(), ServerState::Constructed);

    let session = server.initialize(&cancel).await.unwrap();
    assert!(!session.is_local());
    let connection = session.connection().unwrap().clone();

    let root = session.root_test_case(&cancel).await.unwrap();
    assert!(root.stub().is_some());
    assert_eq!(root.name(&cancel).await.unwrap().name, "Fixture");

    let fails = session.resolve(&child_path("fails"), &cancel).await.unwrap();
    let result = fails.run(&cancel).await.unwrap();
    assert_eq!(result.status, TestStatus::Error);
    assert_eq!(framework.probe.loads.load(Ordering::SeqCst), 1);

    // Initializing twice is refused.
    assert!(server.initialize(&cancel).await.is_err());

    server.stop().await.unwrap();
    assert!(connection.is_stopped());
    assert_eq!(connection.pending_count(), 0);
    assert_eq!(server.state(), ServerState::Stopped);
    // A second stop is a no-op.
    server.stop().await.unwrap();
}

#[tokio::test]
async fn pipe_run_ends_on_cancel() {
    let server = TestServer::pipe(
        FixtureFramework::new(),
        ClientOptions::default(),
        ServerOptions::default(),
    );
    let cancel = CancellationToken::new();
    assert!(server.run(&cancel).await.is_err(), "run before initialize");

    server.initialize(&cancel).await.unwrap();
    let (outcome, _) = tokio::join!(server.run(&cancel), async { cancel.cancel() });
    assert!(matches!(outcome, Err(RpcError::Canceled)));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn pipe_session_forwards_settings_changes() {
    let server = TestServer::pipe(
        FixtureFramework::new(),
        ClientOptions::default(),
        ServerOptions::default(),
    );
    let cancel = CancellationToken::new();
    let session = server.initialize(&cancel).await.unwrap();

    session.update_settings(|bag| bag.set_current_category(Some("nightly")));
    assert_eq!(session.settings().current_category(), Some("nightly"));
    server.stop().await.unwrap();
}

// ============================================================================
// Launched application
// ============================================================================

struct App {
    stop: CancellationToken,
    exited: watch::Receiver<Option<bool>>,
}

/// Hosts the fixture in a background task that dials the driver like an
/// external application would.
struct TaskLauncher {
    framework: Arc<FixtureFramework>,
    /// When false the application exits without connecting.
    connect: bool,
    next_id: AtomicU64,
    apps: Mutex<HashMap<u64, App>>,
}

impl TaskLauncher {
    fn new(connect: bool) -> Arc<Self> {
        Arc::new(Self {
            framework: FixtureFramework::new(),
            connect,
            next_id: AtomicU64::new(1),
            apps: Mutex::new(HashMap::new()),
        })
    }
}

impl Launcher for TaskLauncher {
    fn launch_application(
        &self,
        options: LaunchOptions,
    ) -> BoxFuture<'_, Result<ApplicationHandle, RpcError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stop = CancellationToken::new();
            let (tx, exited) = watch::channel(None);
            let framework = self.framework.clone();
            let connect = self.connect;
            let app_stop = stop.clone();
            tokio::spawn(async move {
                let success = if connect {
                    testwire::serve(options.endpoint, framework, ServerOptions::default(), &app_stop)
                        .await
                        .is_ok()
                } else {
                    false
                };
                let _ = tx.send(Some(success));
            });
            self.apps.lock().insert(id, App { stop, exited });
            Ok(ApplicationHandle {
                id,
                description: format!("fixture host #{id}"),
            })
        })
    }

    fn wait_for_exit(
        &self,
        handle: ApplicationHandle,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<bool, RpcError>> {
        Box::pin(async move {
            let exited = self.apps.lock().get(&handle.id).map(|app| app.exited.clone());
            let Some(mut exited) = exited else {
                return Err(RpcError::handler("unknown application"));
            };
            tokio::select! {
                _ = cancel.cancelled() => Err(RpcError::Canceled),
                status = exited.wait_for(Option::is_some) => {
                    let status = status.map_err(|_| RpcError::handler("application vanished"))?;
                    Ok((*status).unwrap_or(false))
                }
            }
        })
    }

    fn stop_application(&self, handle: ApplicationHandle) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async move {
            if let Some(app) = self.apps.lock().remove(&handle.id) {
                app.stop.cancel();
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn launched_application_dials_back() {
    testwire::tracing_setup::init_tracing();
    let launcher = TaskLauncher::new(true);
    let server = TestServer::launched(
        launcher.clone(),
        LaunchedOptions::default(),
        ClientOptions::default(),
    );
    let cancel = CancellationToken::new();
    let session = server.initialize(&cancel).await.unwrap();

    let passes = session.resolve(&child_path("passes"), &cancel).await.unwrap();
    assert_eq!(passes.run(&cancel).await.unwrap().status, TestStatus::Success);
    assert_eq!(launcher.framework.probe.loads.load(Ordering::SeqCst), 1);

    server.stop().await.unwrap();
    assert!(launcher.apps.lock().is_empty());
}

#[tokio::test]
async fn launched_application_exiting_early_fails_initialize() {
    let launcher = TaskLauncher::new(false);
    let server = TestServer::launched(
        launcher,
        LaunchedOptions::default(),
        ClientOptions::default(),
    );
    let outcome = server.initialize(&CancellationToken::new()).await;
    assert!(matches!(outcome, Err(RpcError::Handler { .. })));
    assert_eq!(server.state(), ServerState::Stopped);
    server.stop().await.unwrap();
}
