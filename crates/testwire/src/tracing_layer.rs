//! Forward `tracing` events on a test host to the driver's event sink.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use testwire_core::{LogEntry, LogKind};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::context::TestLogger;

/// Handle used to point an [`EventSinkLayer`] at a logger once a
/// connection is up, or to detach it again.
#[derive(Clone, Default)]
pub struct SinkSlot {
    logger: Arc<Mutex<Option<TestLogger>>>,
}

impl SinkSlot {
    pub fn attach(&self, logger: TestLogger) {
        *self.logger.lock() = Some(logger);
    }

    pub fn detach(&self) {
        self.logger.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.logger.lock().is_some()
    }

    fn current(&self) -> Option<TestLogger> {
        self.logger.lock().clone()
    }
}

/// A [`Layer`] turning `tracing` events into [`LogEntry`] values.
///
/// Delivery is spawned on the given runtime so emitting an event never
/// blocks. Events from this crate are skipped so forwarding failures cannot
/// feed back into the layer.
pub struct EventSinkLayer {
    slot: SinkSlot,
    rt: tokio::runtime::Handle,
}

impl EventSinkLayer {
    pub fn new(rt: tokio::runtime::Handle) -> (Self, SinkSlot) {
        let slot = SinkSlot::default();
        (
            Self {
                slot: slot.clone(),
                rt,
            },
            slot,
        )
    }
}

/// ERROR→Error, WARN→Warning, INFO→Message, DEBUG→Debug(1), TRACE→Debug(2).
pub fn entry_for(level: &Level, text: String) -> LogEntry {
    match *level {
        Level::ERROR => LogEntry {
            kind: LogKind::Error,
            log_level: 0,
            text,
            error: None,
        },
        Level::WARN => LogEntry::warning(text),
        Level::INFO => LogEntry::message(text),
        Level::DEBUG => LogEntry::debug(1, text),
        _ => LogEntry::debug(2, text),
    }
}

impl<S> Layer<S> for EventSinkLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with("testwire") {
            return;
        }
        let Some(logger) = self.slot.current() else {
            return;
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let entry = entry_for(meta.level(), visitor.finish());
        if !logger.wants(&entry) {
            return;
        }
        self.rt.spawn(async move {
            logger.log(entry).await;
        });
    }
}

/// Collects the `message` field followed by the remaining fields as
/// `name=value` pairs.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if name == "message" {
            let _ = self.message.write_fmt(value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}=");
        let _ = self.fields.write_fmt(value);
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field.name(), format_args!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field.name(), format_args!("{value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::EventSink;
    use testwire_core::StatisticsEvent;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogEntry>>);

    impl EventSink for Collect {
        fn log(&self, entry: LogEntry) {
            self.0.lock().push(entry);
        }

        fn statistics(&self, _event: StatisticsEvent) {}
    }

    #[test]
    fn levels_map_to_entry_kinds() {
        assert_eq!(entry_for(&Level::ERROR, "e".into()).kind, LogKind::Error);
        assert_eq!(entry_for(&Level::WARN, "w".into()).kind, LogKind::Warning);
        assert_eq!(entry_for(&Level::INFO, "i".into()).kind, LogKind::Message);
        assert_eq!(entry_for(&Level::TRACE, "t".into()).log_level, 2);
    }

    #[tokio::test]
    async fn events_reach_attached_logger() {
        let (layer, slot) = EventSinkLayer::new(tokio::runtime::Handle::current());
        let sink = Arc::new(Collect::default());
        slot.attach(TestLogger::local(sink.clone(), false, 0));

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "host", attempt = 3, "disk almost full");
            tracing::debug!(target: "host", "filtered by log level");
        });
        // Delivery is spawned; let it run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let logs = sink.0.lock().clone();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, LogKind::Warning);
        assert_eq!(logs[0].text, "disk almost full attempt=3");
    }

    #[test]
    fn detached_slot_drops_events() {
        let slot = SinkSlot::default();
        slot.attach(TestLogger::null());
        assert!(slot.is_attached());
        slot.detach();
        assert!(!slot.is_attached());
    }
}
