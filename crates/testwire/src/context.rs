//! What a running test sees: a logger, the settings and a cancel token.

use std::sync::Arc;

use testwire_core::{LogEntry, LogKind, SettingsBag, StatisticsEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::objects::{EventSink, EventSinkStub};

#[derive(Clone)]
enum Backend {
    /// Forward to the peer's event sink; statistics go to the connection's
    /// hub and reach the peer through the statistics subscription.
    Remote {
        sink: Option<Arc<EventSinkStub>>,
        statistics: broadcast::Sender<StatisticsEvent>,
    },
    Local {
        sink: Arc<dyn EventSink>,
        want_statistics: bool,
    },
    Null,
}

/// Reports log entries and statistics for a running test.
///
/// Debug entries above the configured log level are dropped before they
/// leave the process.
#[derive(Clone)]
pub struct TestLogger {
    backend: Backend,
    log_level: i32,
}

impl std::fmt::Debug for TestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Remote { .. } => "remote",
            Backend::Local { .. } => "local",
            Backend::Null => "null",
        };
        f.debug_struct("TestLogger")
            .field("backend", &backend)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl TestLogger {
    pub fn null() -> Self {
        Self {
            backend: Backend::Null,
            log_level: 0,
        }
    }

    /// Logger delivering straight to an in-process sink.
    pub fn local(sink: Arc<dyn EventSink>, want_statistics: bool, log_level: i32) -> Self {
        Self {
            backend: Backend::Local {
                sink,
                want_statistics,
            },
            log_level,
        }
    }

    pub(crate) fn remote(
        sink: Option<Arc<EventSinkStub>>,
        statistics: broadcast::Sender<StatisticsEvent>,
        log_level: i32,
    ) -> Self {
        Self {
            backend: Backend::Remote { sink, statistics },
            log_level,
        }
    }

    pub fn log_level(&self) -> i32 {
        self.log_level
    }

    pub fn wants(&self, entry: &LogEntry) -> bool {
        entry.kind != LogKind::Debug || entry.log_level <= self.log_level
    }

    /// Deliver one entry. Delivery failures are not the test's problem and
    /// are only traced.
    pub async fn log(&self, entry: LogEntry) {
        if !self.wants(&entry) {
            return;
        }
        match &self.backend {
            Backend::Remote {
                sink: Some(sink), ..
            } => {
                if let Err(e) = sink.log(&entry).await {
                    tracing::debug!(error = %e, "log entry not delivered");
                }
            }
            Backend::Remote { sink: None, .. } | Backend::Null => {}
            Backend::Local { sink, .. } => sink.log(entry),
        }
    }

    pub async fn message(&self, text: impl Into<String>) {
        self.log(LogEntry::message(text)).await
    }

    pub async fn warning(&self, text: impl Into<String>) {
        self.log(LogEntry::warning(text)).await
    }

    pub async fn debug(&self, level: i32, text: impl Into<String>) {
        self.log(LogEntry::debug(level, text)).await
    }

    pub async fn error(&self, text: impl Into<String>, error: impl Into<String>) {
        self.log(LogEntry::error(text, error)).await
    }

    /// Publish a statistics event without waiting.
    pub fn statistics(&self, event: StatisticsEvent) {
        match &self.backend {
            // No receiver just means nobody subscribed.
            Backend::Remote { statistics, .. } => {
                let _ = statistics.send(event);
            }
            Backend::Local {
                sink,
                want_statistics: true,
            } => sink.statistics(event),
            Backend::Local { .. } | Backend::Null => {}
        }
    }
}

/// Handed to [`TestCase::run`](crate::TestCase::run).
#[derive(Debug, Clone)]
pub struct TestContext {
    pub logger: TestLogger,
    pub settings: SettingsBag,
    pub cancel: CancellationToken,
}

impl TestContext {
    pub fn new(logger: TestLogger, settings: SettingsBag, cancel: CancellationToken) -> Self {
        Self {
            logger,
            settings,
            cancel,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is canceled.
    pub async fn canceled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use testwire_core::{TestName, TestStatus};

    #[derive(Default)]
    struct Collect {
        logs: Mutex<Vec<LogEntry>>,
        stats: Mutex<Vec<StatisticsEvent>>,
    }

    impl EventSink for Collect {
        fn log(&self, entry: LogEntry) {
            self.logs.lock().push(entry);
        }

        fn statistics(&self, event: StatisticsEvent) {
            self.stats.lock().push(event);
        }
    }

    #[tokio::test]
    async fn debug_entries_above_level_are_dropped() {
        let sink = Arc::new(Collect::default());
        let logger = TestLogger::local(sink.clone(), false, 1);
        logger.debug(1, "kept").await;
        logger.debug(2, "dropped").await;
        logger.warning("always kept").await;
        let texts: Vec<String> = sink.logs.lock().iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["kept", "always kept"]);
    }

    #[tokio::test]
    async fn local_statistics_respect_subscription_flag() {
        let sink = Arc::new(Collect::default());
        TestLogger::local(sink.clone(), false, 0).statistics(StatisticsEvent::reset());
        assert!(sink.stats.lock().is_empty());

        TestLogger::local(sink.clone(), true, 0)
            .statistics(StatisticsEvent::finished(TestName::new("t"), TestStatus::Success));
        assert_eq!(sink.stats.lock().len(), 1);
    }

    #[tokio::test]
    async fn remote_statistics_reach_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let logger = TestLogger::remote(None, tx, 0);
        logger.statistics(StatisticsEvent::running(TestName::new("t")));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, Some(TestName::new("t")));
    }
}
