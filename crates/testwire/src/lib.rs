#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod client;
pub mod config;
mod connection;
mod context;
pub mod objects;
mod server;
mod session;
pub mod subscription;
pub mod test_server;
pub mod tracing_layer;
pub mod tracing_setup;

// Re-export the wire layer so users need only this crate.
pub use testwire_core as wire;
pub use testwire_core::{
    CommandKind, ErrorKind, LogEntry, LogKind, ObjectId, ObjectRef, ObjectType, PathKind,
    PathNode, ProtocolError, RpcError, SettingsBag, StatisticsEvent, StatisticsKind, TestName,
    TestPath, TestResult, TestStatus, TransportError,
};

pub use client::{ClientConnection, ClientOptions};
pub use config::ConnectionConfig;
pub use connection::{Connection, Role};
pub use context::{TestContext, TestLogger};
pub use objects::{
    EventSink, StubState, TestCase, TestCaseInfo, TestCaseStub, TestFramework, TestFrameworkStub,
    TestSuite, TestSuiteStub, TracingEventSink,
};
pub use server::{ServerConnection, ServerOptions, serve};
pub use session::{Session, TestNode};
pub use subscription::Subscription;
pub use test_server::{ServerState, TestServer};

// Re-exported for implementors of the object traits.
pub use futures_util::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use testwire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BoxFuture, CancellationToken, EventSink, RpcError, SettingsBag, TestCase, TestContext,
        TestFramework, TestName, TestPath, TestResult, TestStatus, TestSuite,
    };
}
