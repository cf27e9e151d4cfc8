//! The remote-object proxy system.
//!
//! Each capability comes as a trait implemented by the side that owns the
//! real object, a servant that adapts it to commands, and a stub used by
//! the other side. Both are addressed by a connection-scoped [`ObjectId`].
//!
//! [`ObjectId`]: testwire_core::ObjectId

mod event_sink;
mod framework;
mod registry;
mod suite;
mod test_case;

pub use event_sink::{EventSink, EventSinkStub, TracingEventSink};
pub use framework::{TestFramework, TestFrameworkStub};
pub use suite::{TestSuite, TestSuiteStub, resolve_path};
pub use test_case::{StubState, TestCase, TestCaseInfo, TestCaseStub};

pub(crate) use event_sink::EventSinkServant;
pub(crate) use framework::FrameworkServant;
pub(crate) use registry::{ObjectRegistry, RemoteStub, Servant};
pub(crate) use suite::SuiteServant;
pub(crate) use test_case::TestCaseServant;
