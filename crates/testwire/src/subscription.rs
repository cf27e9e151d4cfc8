//! Forwarding subscriptions started with a connection.

use testwire_core::{CommandKind, StatisticsEvent, WireValue};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;

pub const SETTINGS_SUBSCRIPTION: &str = "settings";
pub const STATISTICS_SUBSCRIPTION: &str = "statistics";

/// A running forwarding task. Torn down by [`Subscription::unsubscribe`]
/// or when the connection stops.
#[derive(Debug, Clone)]
pub struct Subscription {
    name: &'static str,
    token: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(name: &'static str, token: CancellationToken) -> Self {
        Self { name, token }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(subscription = self.name, "unsubscribed");
            self.token.cancel();
        }
    }
}

/// Send local settings changes to the peer as `UpdateSettings`.
pub(crate) fn forward_settings(connection: &Connection) -> Subscription {
    // A fresh receiver has already seen the current snapshot.
    let mut changes = connection.watch_settings();
    connection.subscribe(SETTINGS_SUBSCRIPTION, move |connection, token| async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let state = changes.borrow_and_update().clone();
            if state.remote {
                continue;
            }
            if let Err(e) = connection
                .notify(CommandKind::UpdateSettings, None, Some(state.bag.encode()))
                .await
            {
                tracing::debug!(error = %e, "settings update not forwarded");
                break;
            }
        }
    })
}

/// Send statistics published on this side to the peer's event sink.
pub(crate) fn forward_statistics(connection: &Connection) -> Option<Subscription> {
    let sink = connection.peer_event_sink()?;
    let receiver = connection.subscribe_statistics();
    Some(connection.subscribe(STATISTICS_SUBSCRIPTION, move |_connection, token| async move {
        let mut events = BroadcastStream::new(receiver);
        loop {
            let next: Option<Result<StatisticsEvent, BroadcastStreamRecvError>> = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if let Err(e) = sink.statistics(&event).await {
                        tracing::debug!(error = %e, "statistics event not forwarded");
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "statistics subscriber lagged");
                }
                None => break,
            }
        }
    }))
}
