use std::sync::Arc;

use testwire_core::{
    Command, CommandKind, Element, LogEntry, LogKind, ObjectId, ProtocolError, RpcError,
    StatisticsEvent, WireValue, require_document,
};

use crate::connection::WeakConnection;

/// Receives log entries and statistics events from the peer.
pub trait EventSink: Send + Sync + 'static {
    fn log(&self, entry: LogEntry);

    fn statistics(&self, event: StatisticsEvent);
}

/// An event sink that re-emits everything through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn log(&self, entry: LogEntry) {
        match entry.kind {
            LogKind::Error => {
                tracing::error!(target: "testwire::remote", error = ?entry.error, "{}", entry.text)
            }
            LogKind::Warning => tracing::warn!(target: "testwire::remote", "{}", entry.text),
            LogKind::Message => tracing::info!(target: "testwire::remote", "{}", entry.text),
            LogKind::Debug => {
                tracing::debug!(target: "testwire::remote", level = entry.log_level, "{}", entry.text)
            }
        }
    }

    fn statistics(&self, event: StatisticsEvent) {
        tracing::debug!(
            target: "testwire::remote",
            kind = event.kind.as_str(),
            name = ?event.name.as_ref().map(|n| n.to_string()),
            status = %event.status,
            "statistics"
        );
    }
}

pub(crate) struct EventSinkServant {
    sink: Arc<dyn EventSink>,
}

impl EventSinkServant {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn invoke(&self, command: &Command) -> Result<Option<Element>, RpcError> {
        match command.kind {
            CommandKind::LogMessage => {
                let entry: LogEntry = require_document(command.argument.as_ref())?;
                self.sink.log(entry);
            }
            CommandKind::StatisticsEvent => {
                let event: StatisticsEvent = require_document(command.argument.as_ref())?;
                self.sink.statistics(event);
            }
            other => return Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        }
        Ok(None)
    }
}

/// The peer's event sink. Every operation is one-way.
pub struct EventSinkStub {
    id: ObjectId,
    connection: WeakConnection,
}

impl EventSinkStub {
    pub(crate) fn attach(id: ObjectId, connection: WeakConnection) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub async fn log(&self, entry: &LogEntry) -> Result<(), RpcError> {
        self.connection
            .upgrade()?
            .notify(CommandKind::LogMessage, Some(self.id), Some(entry.encode()))
            .await
    }

    pub async fn statistics(&self, event: &StatisticsEvent) -> Result<(), RpcError> {
        self.connection
            .upgrade()?
            .notify(CommandKind::StatisticsEvent, Some(self.id), Some(event.encode()))
            .await
    }
}
