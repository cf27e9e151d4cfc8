//! A driver facing a hand-written host that speaks raw frames.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use testwire::test_server::{ApplicationHandle, LaunchOptions, LaunchedOptions, Launcher};
use testwire::wire::{Element, Response};
use testwire::{
    BoxFuture, CancellationToken, ClientConnection, ClientOptions, CommandKind, ProtocolError,
    RpcError, TestServer,
};
use testwire_testkit::raw::RawPeer;
use tokio::sync::oneshot;

const STEP: Duration = Duration::from_secs(5);

fn driver_options() -> ClientOptions {
    ClientOptions {
        load_test_suite: false,
        ..ClientOptions::default()
    }
}

async fn started_pair() -> (ClientConnection, RawPeer<tokio::io::DuplexStream>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let client = ClientConnection::new(near, driver_options());
    let mut peer = RawPeer::new(far);
    let cancel = CancellationToken::new();
    let (started, answered) = tokio::join!(
        client.start(&cancel),
        peer.answer_handshake()
    );
    started.unwrap();
    answered.unwrap();
    (client, peer)
}

#[tokio::test]
async fn malformed_response_fails_only_its_call() {
    let (client, mut peer) = started_pair().await;
    let cancel = CancellationToken::new();
    let framework = client.framework().unwrap();

    // Correlatable, but missing `Success`.
    let (outcome, ()) = tokio::join!(
        tokio::time::timeout(STEP, framework.load_test_suite(&cancel)),
        async {
            let id = peer.next_call(CommandKind::LoadTestSuite).await.unwrap();
            peer.send(&Element::new(Response::ELEMENT).with_attr("ObjectID", id))
                .await
                .unwrap();
        }
    );
    match outcome.expect("call never completed") {
        Err(RpcError::Protocol(ProtocolError::Remote(message))) => {
            assert!(message.contains("Success"), "{message}")
        }
        other => panic!("expected a protocol error, got {other:?}"),
    }
    assert_eq!(client.connection().pending_count(), 0);
    assert!(!client.connection().is_stopped());

    // The connection still carries calls.
    let (outcome, ()) = tokio::join!(
        tokio::time::timeout(STEP, framework.load_test_suite(&cancel)),
        async {
            let id = peer.next_call(CommandKind::LoadTestSuite).await.unwrap();
            let answer = Response::from_error(id, &RpcError::handler("no suite here"));
            peer.send(&answer.encode()).await.unwrap();
        }
    );
    assert!(matches!(
        outcome.expect("second call never completed"),
        Err(RpcError::Handler { .. })
    ));
    client.stop().await;
}

#[tokio::test]
async fn uncorrelatable_response_ends_the_connection() {
    let (client, mut peer) = started_pair().await;
    let cancel = CancellationToken::new();
    let framework = client.framework().unwrap();

    let (outcome, ()) = tokio::join!(
        tokio::time::timeout(STEP, framework.load_test_suite(&cancel)),
        async {
            peer.next_call(CommandKind::LoadTestSuite).await.unwrap();
            peer.send(&Element::new(Response::ELEMENT)).await.unwrap();
        }
    );
    assert!(matches!(
        outcome.expect("pending call was not resolved"),
        Err(RpcError::Canceled)
    ));
    assert!(client.connection().is_stopped());
    assert_eq!(client.connection().pending_count(), 0);
    assert!(matches!(
        client.run(&cancel).await,
        Err(RpcError::Protocol(ProtocolError::MissingAttribute { .. }))
    ));
    let closed = tokio::time::timeout(STEP, peer.sees_close()).await;
    assert_eq!(closed.ok(), Some(true));
}

/// Starts a raw host that refuses to load its suite, then reports whether
/// the driver closed the stream afterwards.
struct RefusingLauncher {
    saw_close: Mutex<Option<oneshot::Sender<bool>>>,
}

impl Launcher for RefusingLauncher {
    fn launch_application(
        &self,
        options: LaunchOptions,
    ) -> BoxFuture<'_, Result<ApplicationHandle, RpcError>> {
        let report = self.saw_close.lock().take();
        Box::pin(async move {
            tokio::spawn(async move {
                let stream = tokio::net::TcpStream::connect(options.endpoint).await.unwrap();
                let mut peer = RawPeer::new(stream);
                peer.answer_handshake().await.unwrap();
                let id = peer.next_call(CommandKind::LoadTestSuite).await.unwrap();
                peer.send(&Response::from_error(id, &RpcError::handler("boom")).encode())
                    .await
                    .unwrap();
                let closed = peer.sees_close().await;
                if let Some(report) = report {
                    let _ = report.send(closed);
                }
            });
            Ok(ApplicationHandle {
                id: 1,
                description: "raw host".into(),
            })
        })
    }

    fn wait_for_exit(
        &self,
        _handle: ApplicationHandle,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<bool, RpcError>> {
        Box::pin(std::future::pending())
    }

    fn stop_application(&self, _handle: ApplicationHandle) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn failed_suite_load_closes_the_launched_connection() {
    let (tx, rx) = oneshot::channel();
    let launcher = Arc::new(RefusingLauncher {
        saw_close: Mutex::new(Some(tx)),
    });
    let server = TestServer::launched(launcher, LaunchedOptions::default(), driver_options());

    let outcome = server.initialize(&CancellationToken::new()).await;
    match outcome {
        Err(RpcError::Handler { message }) => assert!(message.contains("boom"), "{message}"),
        other => panic!("expected the host's error, got {:?}", other.err()),
    }
    let saw_close = tokio::time::timeout(STEP, rx)
        .await
        .expect("host never saw the stream end")
        .unwrap();
    assert!(saw_close);
    server.stop().await.unwrap();
}
