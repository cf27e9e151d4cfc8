use std::time::Duration;

use bytes::Bytes;
use testwire_core::{FrameWriter, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BoxedWriter, WeakConnection};

/// Owns the write half. Frames go out in the order they were queued and
/// are never interleaved.
///
/// On shutdown the queue is closed, whatever was already admitted is
/// flushed, and a close frame ends the stream.
pub(super) async fn write_loop(
    connection: WeakConnection,
    mut writer: FrameWriter<BoxedWriter>,
    mut outbound: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
    close_timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.write_frame(&frame).await {
                    fail(&connection, e);
                    return;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    outbound.close();
    let flush = async {
        let mut flushed = 0usize;
        while let Some(frame) = outbound.recv().await {
            writer.write_frame(&frame).await?;
            flushed += 1;
        }
        writer.close().await?;
        Ok::<_, TransportError>(flushed)
    };
    match tokio::time::timeout(close_timeout, flush).await {
        Ok(Ok(flushed)) => tracing::debug!(flushed, "writer closed"),
        // The peer may already be gone; nothing left to report to.
        Ok(Err(e)) => tracing::debug!(error = %e, "writer close failed"),
        Err(_) => tracing::warn!(?close_timeout, "writer close timed out"),
    }
}

fn fail(connection: &WeakConnection, error: TransportError) {
    tracing::debug!(error = %error, "write failed, tearing down");
    if let Ok(connection) = connection.upgrade() {
        *connection.inner.write_error.lock() = Some(error);
        connection.teardown();
    }
}
