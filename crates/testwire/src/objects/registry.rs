use std::collections::HashMap;
use std::sync::Arc;

use testwire_core::{
    Command, Element, FRAMEWORK_OBJECT_ID, ObjectId, ObjectType, ProtocolError, RpcError,
};
use tokio_util::sync::CancellationToken;

use super::{
    EventSinkServant, EventSinkStub, FrameworkServant, SuiteServant, TestCaseServant,
    TestCaseStub, TestFrameworkStub, TestSuiteStub,
};
use crate::connection::{Connection, IdAllocator, WeakConnection};

/// A locally owned implementation exposed to the peer.
#[derive(Clone)]
pub(crate) enum Servant {
    Framework(Arc<FrameworkServant>),
    Suite(Arc<SuiteServant>),
    TestCase(Arc<TestCaseServant>),
    EventSink(Arc<EventSinkServant>),
}

impl Servant {
    pub(crate) fn object_type(&self) -> ObjectType {
        match self {
            Servant::Framework(_) => ObjectType::TestFramework,
            Servant::Suite(_) => ObjectType::TestSuite,
            Servant::TestCase(_) => ObjectType::TestCase,
            Servant::EventSink(_) => ObjectType::EventSink,
        }
    }

    pub(crate) async fn invoke(
        &self,
        connection: &Connection,
        command: &Command,
        cancel: CancellationToken,
    ) -> Result<Option<Element>, RpcError> {
        match self {
            Servant::Framework(s) => s.invoke(connection, command, cancel).await,
            Servant::Suite(s) => s.invoke(connection, command, cancel).await,
            Servant::TestCase(s) => s.invoke(connection, command, cancel).await,
            Servant::EventSink(s) => s.invoke(command),
        }
    }
}

/// A cached placeholder for an object living on the peer.
#[derive(Clone)]
pub(crate) enum Stub {
    Framework(Arc<TestFrameworkStub>),
    Suite(Arc<TestSuiteStub>),
    TestCase(Arc<TestCaseStub>),
    EventSink(Arc<EventSinkStub>),
}

impl Stub {
    fn object_type(&self) -> ObjectType {
        match self {
            Stub::Framework(_) => ObjectType::TestFramework,
            Stub::Suite(_) => ObjectType::TestSuite,
            Stub::TestCase(_) => ObjectType::TestCase,
            Stub::EventSink(_) => ObjectType::EventSink,
        }
    }
}

/// Implemented by every stub type so the registry can cache it generically.
pub(crate) trait RemoteStub: Send + Sync + Sized + 'static {
    const TYPE: ObjectType;

    fn new(id: ObjectId, connection: WeakConnection) -> Self;
    fn wrap(this: Arc<Self>) -> Stub;
    fn unwrap(stub: &Stub) -> Option<Arc<Self>>;
}

macro_rules! remote_stub {
    ($ty:ty, $variant:ident, $object_type:expr) => {
        impl RemoteStub for $ty {
            const TYPE: ObjectType = $object_type;

            fn new(id: ObjectId, connection: WeakConnection) -> Self {
                <$ty>::attach(id, connection)
            }

            fn wrap(this: Arc<Self>) -> Stub {
                Stub::$variant(this)
            }

            fn unwrap(stub: &Stub) -> Option<Arc<Self>> {
                match stub {
                    Stub::$variant(s) => Some(s.clone()),
                    _ => None,
                }
            }
        }
    };
}

remote_stub!(TestFrameworkStub, Framework, ObjectType::TestFramework);
remote_stub!(TestSuiteStub, Suite, ObjectType::TestSuite);
remote_stub!(TestCaseStub, TestCase, ObjectType::TestCase);
remote_stub!(EventSinkStub, EventSink, ObjectType::EventSink);

enum Entry {
    Servant(Servant),
    Stub(Stub),
}

/// Object id → servant or stub, for the lifetime of one connection.
#[derive(Default)]
pub(crate) struct ObjectRegistry {
    objects: HashMap<ObjectId, Entry>,
    /// Address of the underlying instance → the id it was exposed under.
    servant_ids: HashMap<usize, ObjectId>,
}

impl ObjectRegistry {
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    /// Register the servant for instance `key` unless it already has an id.
    /// Returns the id and whether a new registration happened.
    pub(crate) fn register_servant(
        &mut self,
        key: usize,
        ids: &mut IdAllocator,
        make: impl FnOnce() -> Servant,
    ) -> (ObjectId, bool) {
        if let Some(id) = self.servant_ids.get(&key) {
            return (*id, false);
        }
        let id = ids.next();
        self.objects.insert(id, Entry::Servant(make()));
        self.servant_ids.insert(key, id);
        (id, true)
    }

    /// Install the framework servant under the reserved id.
    pub(crate) fn insert_bootstrap(&mut self, key: usize, servant: Servant) {
        self.objects
            .insert(FRAMEWORK_OBJECT_ID, Entry::Servant(servant));
        self.servant_ids.insert(key, FRAMEWORK_OBJECT_ID);
    }

    pub(crate) fn servant(&self, id: ObjectId) -> Result<Servant, ProtocolError> {
        match self.objects.get(&id) {
            Some(Entry::Servant(servant)) => Ok(servant.clone()),
            _ => Err(ProtocolError::UnknownObject(id.0)),
        }
    }

    pub(crate) fn resolve_stub<T: RemoteStub>(
        &mut self,
        id: ObjectId,
        make: impl FnOnce() -> T,
    ) -> Result<Arc<T>, ProtocolError> {
        match self.objects.get(&id) {
            Some(Entry::Stub(stub)) => T::unwrap(stub).ok_or(ProtocolError::WrongObjectType {
                id: id.0,
                expected: T::TYPE.as_str(),
                actual: stub.object_type().as_str(),
            }),
            Some(Entry::Servant(servant)) => Err(ProtocolError::WrongObjectType {
                id: id.0,
                expected: "remote object",
                actual: servant.object_type().as_str(),
            }),
            None => {
                let stub = Arc::new(make());
                self.objects.insert(id, Entry::Stub(T::wrap(stub.clone())));
                Ok(stub)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::Role;
    use crate::objects::TracingEventSink;

    fn sink_servant() -> Servant {
        Servant::EventSink(Arc::new(EventSinkServant::new(Arc::new(TracingEventSink))))
    }

    #[test]
    fn servant_registration_is_idempotent() {
        let mut registry = ObjectRegistry::default();
        let mut ids = IdAllocator::for_role(Role::Server);
        let (first, created) = registry.register_servant(0x10, &mut ids, sink_servant);
        assert!(created);
        let (second, created) = registry.register_servant(0x10, &mut ids, sink_servant);
        assert!(!created);
        assert_eq!(first, second);
        let (other, _) = registry.register_servant(0x20, &mut ids, sink_servant);
        assert_eq!((first.0, other.0), (1, 2));
    }

    #[test]
    fn unknown_ids_are_protocol_errors() {
        let registry = ObjectRegistry::default();
        assert!(matches!(
            registry.servant(ObjectId(7)),
            Err(ProtocolError::UnknownObject(7))
        ));
    }

    #[test]
    fn stubs_are_cached_and_type_checked() {
        let (stream, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(stream, Role::Client, ConnectionConfig::default());
        let mut registry = ObjectRegistry::default();

        let a: Arc<TestSuiteStub> = registry
            .resolve_stub(ObjectId(1), || TestSuiteStub::attach(ObjectId(1), connection.downgrade()))
            .unwrap();
        let b: Arc<TestSuiteStub> = registry
            .resolve_stub(ObjectId(1), || TestSuiteStub::attach(ObjectId(1), connection.downgrade()))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let wrong = registry.resolve_stub::<TestCaseStub>(ObjectId(1), || {
            TestCaseStub::attach(ObjectId(1), connection.downgrade())
        });
        assert!(matches!(wrong, Err(ProtocolError::WrongObjectType { .. })));
    }

    #[test]
    fn local_servant_ids_cannot_become_stubs() {
        let (stream, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(stream, Role::Server, ConnectionConfig::default());
        let mut registry = ObjectRegistry::default();
        let mut ids = IdAllocator::for_role(Role::Server);
        let (id, _) = registry.register_servant(1, &mut ids, sink_servant);
        let stub = registry.resolve_stub::<EventSinkStub>(id, || {
            EventSinkStub::attach(id, connection.downgrade())
        });
        assert!(stub.is_err());
    }
}
