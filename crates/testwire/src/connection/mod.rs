//! The connection engine: one duplex stream, one reader task, one writer
//! task, and the correlation tables shared between them.

mod dispatch;
mod ids;
mod writer;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use testwire_core::{
    CancelNotice, Command, CommandKind, Element, Frame, FrameReader, FrameWriter, Handshake,
    Message, ObjectId, ObjectRef, ProtocolError, Response, RpcError, SettingsBag,
    StatisticsEvent, TransportError, frame,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::context::{TestContext, TestLogger};
use crate::objects::{
    EventSink, EventSinkServant, EventSinkStub, FrameworkServant, ObjectRegistry, RemoteStub,
    Servant, SuiteServant, TestCase, TestCaseServant, TestFramework, TestSuite,
};
use crate::subscription::Subscription;

pub(crate) use dispatch::expect_reference;
pub(crate) use ids::IdAllocator;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

const STATISTICS_CAPACITY: usize = 1024;

/// Which end of the stream this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The test driver. Allocates descending negative ids.
    Client,
    /// The test host. Allocates ascending positive ids.
    Server,
}

impl Role {
    /// Whether `id` lies in the range this role allocates from.
    pub fn allocated(self, id: ObjectId) -> bool {
        match self {
            Role::Client => id.0 < 0,
            Role::Server => id.0 > 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Everything mutated by more than one task, guarded by a single lock.
pub(crate) struct State {
    pub(crate) ids: IdAllocator,
    /// Outbound two-way calls awaiting their response.
    pending: HashMap<i64, oneshot::Sender<Response>>,
    /// Inbound two-way commands currently executing.
    operations: HashMap<i64, CancellationToken>,
    pub(crate) objects: ObjectRegistry,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SettingsState {
    pub(crate) bag: SettingsBag,
    /// Set when the snapshot came from the peer and must not be echoed back.
    pub(crate) remote: bool,
}

#[derive(Default)]
struct PeerState {
    want_statistics_events: bool,
    event_sink: Option<Arc<EventSinkStub>>,
}

struct Io {
    reader: FrameReader<BoxedReader>,
    writer: FrameWriter<BoxedWriter>,
    outbound: mpsc::Receiver<Bytes>,
}

pub(crate) struct Shared {
    role: Role,
    config: ConnectionConfig,
    state: Mutex<State>,
    outbound: mpsc::Sender<Bytes>,
    io: Mutex<Option<Io>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    settings: watch::Sender<SettingsState>,
    statistics: broadcast::Sender<StatisticsEvent>,
    peer: Mutex<PeerState>,
    read_task: Mutex<Option<JoinHandle<Result<(), RpcError>>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
    write_error: Mutex<Option<TransportError>>,
}

/// A handle to one connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

/// A non-owning handle held by stubs so they never keep a connection alive.
#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<Shared>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Result<Connection, RpcError> {
        self.0
            .upgrade()
            .map(|inner| Connection { inner })
            .ok_or(RpcError::Transport(TransportError::Closed))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.inner.role)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a duplex stream. Nothing is read or written until the role
    /// specific `start` runs.
    pub fn new<S>(stream: S, role: Role, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (settings, _) = watch::channel(SettingsState::default());
        let (statistics, _) = broadcast::channel(STATISTICS_CAPACITY);

        let io = Io {
            reader: FrameReader::with_max_frame_len(reader, config.max_frame_len),
            writer: FrameWriter::new(writer),
            outbound: outbound_rx,
        };

        Self {
            inner: Arc::new(Shared {
                role,
                state: Mutex::new(State {
                    ids: IdAllocator::for_role(role),
                    pending: HashMap::new(),
                    operations: HashMap::new(),
                    objects: ObjectRegistry::default(),
                    closed: false,
                }),
                config,
                outbound,
                io: Mutex::new(Some(io)),
                shutdown: CancellationToken::new(),
                stopped: AtomicBool::new(false),
                settings,
                statistics,
                peer: Mutex::new(PeerState::default()),
                read_task: Mutex::new(None),
                write_task: Mutex::new(None),
                write_error: Mutex::new(None),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    /// Number of outbound two-way calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of inbound two-way commands still executing.
    pub fn operation_count(&self) -> usize {
        self.inner.state.lock().operations.len()
    }

    /// Number of servants and stubs known to this connection.
    pub fn object_count(&self) -> usize {
        self.inner.state.lock().objects.len()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Current settings snapshot.
    pub fn settings(&self) -> SettingsBag {
        self.inner.settings.borrow().bag.clone()
    }

    /// Change the settings locally. On a started client the change is
    /// forwarded to the peer by the settings subscription.
    pub fn update_settings(&self, f: impl FnOnce(&mut SettingsBag)) {
        self.inner.settings.send_modify(|state| {
            f(&mut state.bag);
            state.remote = false;
        });
    }

    pub fn set_log_level(&self, level: i32) {
        self.update_settings(|bag| bag.set_log_level(level));
    }

    /// Replace the snapshot with one received from the peer.
    pub(crate) fn apply_remote_settings(&self, bag: SettingsBag) {
        tracing::debug!(role = %self.inner.role, entries = bag.len(), "settings replaced by peer");
        self.inner
            .settings
            .send_replace(SettingsState { bag, remote: true });
    }

    pub(crate) fn watch_settings(&self) -> watch::Receiver<SettingsState> {
        self.inner.settings.subscribe()
    }

    // ========================================================================
    // Peer capabilities
    // ========================================================================

    pub(crate) fn set_peer(&self, want_statistics_events: bool, event_sink: Option<Arc<EventSinkStub>>) {
        let mut peer = self.inner.peer.lock();
        peer.want_statistics_events = want_statistics_events;
        peer.event_sink = event_sink;
    }

    pub(crate) fn peer_event_sink(&self) -> Option<Arc<EventSinkStub>> {
        self.inner.peer.lock().event_sink.clone()
    }

    pub(crate) fn peer_wants_statistics(&self) -> bool {
        self.inner.peer.lock().want_statistics_events
    }

    pub(crate) fn subscribe_statistics(&self) -> broadcast::Receiver<StatisticsEvent> {
        self.inner.statistics.subscribe()
    }

    /// Logger that reports to the peer's event sink.
    pub fn test_logger(&self) -> TestLogger {
        TestLogger::remote(
            self.peer_event_sink(),
            self.inner.statistics.clone(),
            self.settings().log_level(),
        )
    }

    pub(crate) fn test_context(&self, cancel: CancellationToken) -> TestContext {
        TestContext::new(self.test_logger(), self.settings(), cancel)
    }

    // ========================================================================
    // Object registry
    // ========================================================================

    fn register_servant(&self, key: usize, make: impl FnOnce() -> Servant) -> ObjectId {
        let mut state = self.inner.state.lock();
        let State { ids, objects, .. } = &mut *state;
        let (id, created) = objects.register_servant(key, ids, make);
        drop(state);
        if created {
            tracing::debug!(role = %self.inner.role, object_id = id.0, "servant registered");
        }
        id
    }

    /// Expose the framework as the bootstrap object.
    pub(crate) fn register_framework(
        &self,
        framework: Arc<dyn TestFramework>,
    ) -> Arc<FrameworkServant> {
        let key = arc_key(&framework);
        let servant = Arc::new(FrameworkServant::new(framework));
        self.inner
            .state
            .lock()
            .objects
            .insert_bootstrap(key, Servant::Framework(servant.clone()));
        servant
    }

    pub(crate) fn register_suite(&self, suite: Arc<dyn TestSuite>) -> ObjectRef {
        let key = arc_key(&suite);
        let id = self.register_servant(key, || Servant::Suite(Arc::new(SuiteServant::new(suite))));
        ObjectRef::new(testwire_core::ObjectType::TestSuite, id)
    }

    pub(crate) fn register_test_case(&self, test: Arc<dyn TestCase>) -> ObjectRef {
        let key = arc_key(&test);
        let id =
            self.register_servant(key, || Servant::TestCase(Arc::new(TestCaseServant::new(test))));
        ObjectRef::new(testwire_core::ObjectType::TestCase, id)
    }

    pub(crate) fn register_event_sink(&self, sink: Arc<dyn EventSink>) -> ObjectRef {
        let key = arc_key(&sink);
        let id = self.register_servant(key, || {
            Servant::EventSink(Arc::new(EventSinkServant::new(sink)))
        });
        ObjectRef::new(testwire_core::ObjectType::EventSink, id)
    }

    pub(crate) fn servant(&self, id: ObjectId) -> Result<Servant, ProtocolError> {
        self.inner.state.lock().objects.servant(id)
    }

    /// The cached stub for `id`, created on first sight.
    pub(crate) fn resolve_stub<T: RemoteStub>(&self, id: ObjectId) -> Result<Arc<T>, RpcError> {
        let weak = self.downgrade();
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed.into());
        }
        Ok(state.objects.resolve_stub(id, || T::new(id, weak))?)
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    pub(crate) async fn send_message(&self, message: &Message) -> Result<(), RpcError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let frame = frame::encode_document(&message.encode())?;
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    fn register_pending(&self) -> Result<(i64, oneshot::Receiver<Response>), RpcError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed.into());
        }
        let response_id = state.ids.next().0;
        state.pending.insert(response_id, tx);
        Ok((response_id, rx))
    }

    /// Send a two-way command and wait for its response.
    ///
    /// The waiter is registered before the frame is queued. Triggering
    /// `cancel` sends a `Cancel` notice but the call still completes only
    /// when the peer answers, or when the connection is torn down.
    pub async fn call(
        &self,
        kind: CommandKind,
        instance: Option<ObjectId>,
        argument: Option<Element>,
        cancel: &CancellationToken,
    ) -> Result<Option<Element>, RpcError> {
        if kind.is_one_way() {
            return Err(ProtocolError::UnknownCommand(format!("{kind} is one-way")).into());
        }
        let (response_id, mut rx) = self.register_pending()?;
        let command = Command {
            kind,
            response_id: Some(response_id),
            instance,
            argument,
        };
        if let Err(e) = self.send_message(&Message::Command(command)).await {
            self.inner.state.lock().pending.remove(&response_id);
            return Err(e);
        }
        tracing::debug!(role = %self.inner.role, response_id, command = %kind, "call sent");

        let received = tokio::select! {
            biased;
            received = &mut rx => received,
            _ = cancel.cancelled() => {
                tracing::debug!(response_id, command = %kind, "call canceled locally, notifying peer");
                let notice = Message::Cancel(CancelNotice { response_id });
                if let Err(e) = self.send_message(&notice).await {
                    tracing::debug!(response_id, error = %e, "cancel notice not sent");
                }
                rx.await
            }
        };

        match received {
            Ok(response) => response.into_result(),
            // The sender was dropped by teardown.
            Err(_) => Err(RpcError::Canceled),
        }
    }

    /// Send a one-way command.
    pub async fn notify(
        &self,
        kind: CommandKind,
        instance: Option<ObjectId>,
        argument: Option<Element>,
    ) -> Result<(), RpcError> {
        if !kind.is_one_way() {
            return Err(ProtocolError::UnknownCommand(format!("{kind} is two-way")).into());
        }
        let command = Command {
            kind,
            response_id: None,
            instance,
            argument,
        };
        self.send_message(&Message::Command(command)).await
    }

    // ========================================================================
    // Inbound bookkeeping
    // ========================================================================

    fn complete(&self, response: Response) -> Result<(), ProtocolError> {
        let waiter = self.inner.state.lock().pending.remove(&response.response_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
                Ok(())
            }
            None => Err(ProtocolError::UnknownResponse(response.response_id)),
        }
    }

    fn cancel_operation(&self, response_id: i64) {
        let token = self.inner.state.lock().operations.get(&response_id).cloned();
        match token {
            Some(token) => {
                tracing::debug!(response_id, "canceling operation on peer request");
                token.cancel();
            }
            None => tracing::debug!(response_id, "cancel for unknown or finished operation ignored"),
        }
    }

    /// Register an inbound operation. `None` once the connection is closed.
    fn begin_operation(&self, response_id: i64) -> Option<CancellationToken> {
        let token = self.inner.shutdown.child_token();
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.operations.insert(response_id, token.clone());
        Some(token)
    }

    fn end_operation(&self, response_id: i64) {
        self.inner.state.lock().operations.remove(&response_id);
    }

    fn take_write_error(&self) -> Option<TransportError> {
        self.inner.write_error.lock().take()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the writer task and hand back the reader for the handshake.
    pub(crate) fn begin(&self) -> Result<FrameReader<BoxedReader>, RpcError> {
        let io = self
            .inner
            .io
            .lock()
            .take()
            .ok_or_else(|| ProtocolError::Handshake("connection already started".into()))?;
        let handle = tokio::spawn(writer::write_loop(
            self.downgrade(),
            io.writer,
            io.outbound,
            self.inner.shutdown.clone(),
            self.inner.config.close_timeout,
        ));
        *self.inner.write_task.lock() = Some(handle);
        Ok(io.reader)
    }

    /// Read the peer's handshake directly from the stream.
    pub(crate) async fn read_handshake(
        &self,
        reader: &mut FrameReader<BoxedReader>,
        cancel: &CancellationToken,
    ) -> Result<Handshake, RpcError> {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Canceled),
            _ = self.inner.shutdown.cancelled() => return Err(TransportError::Closed.into()),
            frame = reader.read_frame() => frame?,
        };
        let element = match frame {
            Frame::Document(element) => element,
            Frame::Close => return Err(TransportError::Closed.into()),
        };
        match Message::decode(&element)? {
            Message::Handshake(handshake) => Ok(handshake),
            _ => Err(ProtocolError::Handshake(format!(
                "expected a handshake, got <{}>",
                element.name
            ))
            .into()),
        }
    }

    /// Start the read/dispatch loop in the background.
    pub(crate) fn spawn_reader(&self, reader: FrameReader<BoxedReader>) {
        let handle = tokio::spawn(dispatch::read_loop(self.clone(), reader));
        *self.inner.read_task.lock() = Some(handle);
    }

    /// Spawn a forwarding task that lives until unsubscribed or stopped.
    pub(crate) fn subscribe<F, Fut>(&self, name: &'static str, task: F) -> Subscription
    where
        F: FnOnce(Connection, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.inner.shutdown.child_token();
        tokio::spawn(task(self.clone(), token.clone()));
        tracing::debug!(role = %self.inner.role, subscription = name, "subscription started");
        Subscription::new(name, token)
    }

    /// Close the tables and wake every waiter. Idempotent and non-blocking.
    pub(crate) fn teardown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        let (pending, operations, objects) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.operations),
                std::mem::take(&mut state.objects),
            )
        };
        tracing::debug!(
            role = %self.inner.role,
            pending = pending.len(),
            operations = operations.len(),
            "connection torn down"
        );
        // Dropping the senders resolves every waiter as canceled.
        drop(pending);
        for token in operations.into_values() {
            token.cancel();
        }
        self.inner.peer.lock().event_sink = None;
        drop(objects);
    }

    /// Stop the connection: cancel outstanding work, tear down
    /// subscriptions, flush the writer and release the stream.
    /// A second call is a no-op.
    pub async fn stop(&self) {
        self.teardown();
        let writer = self.inner.write_task.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }

    /// Tell the peer to shut down, then stop.
    pub async fn shutdown(&self) {
        if !self.is_stopped() {
            if let Err(e) = self.notify(CommandKind::Shutdown, None, None).await {
                tracing::debug!(error = %e, "shutdown notice not sent");
            }
        }
        self.stop().await;
    }

    /// Wait for the read loop to finish.
    ///
    /// Triggering `cancel` stops the connection and yields
    /// [`RpcError::Canceled`]; a fault in the loop is returned as is.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RpcError> {
        let Some(mut handle) = self.inner.read_task.lock().take() else {
            return Err(ProtocolError::Handshake("connection is not running".into()).into());
        };
        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = cancel.cancelled() => None,
        };
        let result = match joined {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(RpcError::handler(format!("read loop failed: {e}"))),
            None => {
                self.stop().await;
                let _ = handle.await;
                Err(RpcError::Canceled)
            }
        };
        self.stop().await;
        result
    }

    /// Resolves once the connection has been torn down.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }
}

fn arc_key<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}
