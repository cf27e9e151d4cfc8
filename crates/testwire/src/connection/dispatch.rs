use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use testwire_core::{
    Command, CommandKind, Element, Frame, FrameReader, Message, ObjectRef, ProtocolError,
    Response, RpcError, SettingsBag, TransportError, WireValue,
};
use tokio_util::sync::CancellationToken;

use super::{BoxedReader, Connection};

/// Why the read loop stopped without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    CloseFrame,
    ShutdownCommand,
    LocalStop,
}

/// The single reader of the stream.
///
/// Responses complete pending calls, cancel notices trip operation tokens,
/// one-way commands run inline and two-way commands are spawned so reading
/// never waits on a handler.
pub(super) async fn read_loop(
    connection: Connection,
    mut reader: FrameReader<BoxedReader>,
) -> Result<(), RpcError> {
    let role = connection.role();
    let shutdown = connection.inner.shutdown.clone();
    tracing::debug!(%role, "read loop started");

    let result = loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                break match connection.take_write_error() {
                    Some(e) => Err(e.into()),
                    None => Ok(Exit::LocalStop),
                };
            }
            frame = reader.read_frame() => frame,
        };
        let element = match frame {
            Ok(Frame::Document(element)) => element,
            Ok(Frame::Close) => break Ok(Exit::CloseFrame),
            Err(e) => break Err(RpcError::from(e)),
        };

        match Message::decode(&element) {
            Ok(Message::Response(response)) => {
                if let Err(e) = connection.complete(response) {
                    break Err(e.into());
                }
            }
            Ok(Message::Cancel(notice)) => connection.cancel_operation(notice.response_id),
            Ok(Message::Handshake(_)) => {
                tracing::warn!(%role, "unexpected handshake after start, dropped");
            }
            Ok(Message::Command(command)) if command.kind == CommandKind::Shutdown => {
                tracing::debug!(%role, "peer requested shutdown");
                break Ok(Exit::ShutdownCommand);
            }
            Ok(Message::Command(command)) => match command.response_id {
                None => run_one_way(&connection, command).await,
                Some(response_id) => spawn_two_way(&connection, command, response_id),
            },
            Err(e) if element.name == Response::ELEMENT => {
                if let Err(e) = fail_response(&connection, &element, e) {
                    break Err(e.into());
                }
            }
            Err(e) => reject(&connection, &element, e).await,
        }
    };

    let result = match result {
        Ok(exit) => {
            tracing::debug!(%role, ?exit, "read loop finished");
            Ok(())
        }
        Err(e) => {
            // A stop that raced a failing read is not a fault.
            if connection.is_stopped() && matches!(e, RpcError::Transport(TransportError::Closed)) {
                Ok(())
            } else {
                tracing::error!(%role, error = %e, "connection failed");
                Err(e)
            }
        }
    };
    connection.teardown();
    result
}

async fn run_one_way(connection: &Connection, command: Command) {
    let kind = command.kind;
    let result = AssertUnwindSafe(execute(connection, &command, CancellationToken::new()))
        .catch_unwind()
        .await;
    match result {
        Ok(Ok(_)) => tracing::trace!(command = %kind, "one-way command handled"),
        Ok(Err(e)) => tracing::warn!(command = %kind, error = %e, "one-way command failed"),
        Err(panic) => {
            tracing::warn!(command = %kind, panic = %panic_message(&*panic), "one-way command panicked")
        }
    }
}

fn spawn_two_way(connection: &Connection, command: Command, response_id: i64) {
    // Registered here, before the next frame is read, so a Cancel that
    // follows immediately always finds the operation.
    let Some(token) = connection.begin_operation(response_id) else {
        return;
    };
    let connection = connection.clone();
    tokio::spawn(async move {
        let kind = command.kind;
        tracing::debug!(response_id, command = %kind, "dispatching");
        let handler = AssertUnwindSafe(execute(&connection, &command, token.clone())).catch_unwind();
        let result = tokio::select! {
            biased;
            result = handler => match result {
                Ok(result) => result,
                Err(panic) => Err(RpcError::handler(format!(
                    "panic in handler: {}",
                    panic_message(&*panic)
                ))),
            },
            _ = token.cancelled() => Err(RpcError::Canceled),
        };
        // A handler that observed the token may report its own error.
        let result = match result {
            Err(e) if token.is_cancelled() && !e.is_canceled() => {
                tracing::debug!(response_id, error = %e, "handler failed after cancellation");
                Err(RpcError::Canceled)
            }
            other => other,
        };

        let response = match &result {
            Ok(value) => Response::success(response_id, value.clone()),
            Err(e) => {
                tracing::debug!(response_id, command = %kind, error = %e, "command failed");
                Response::from_error(response_id, e)
            }
        };
        if let Err(e) = connection.send_message(&Message::Response(response)).await {
            tracing::debug!(response_id, error = %e, "response not sent");
        }
        connection.end_operation(response_id);
    });
}

/// Hand a malformed response's decode error to the call waiting on it.
///
/// Without a usable `ObjectID` nothing can be correlated and the error is
/// returned to end the connection.
fn fail_response(
    connection: &Connection,
    element: &Element,
    error: ProtocolError,
) -> Result<(), ProtocolError> {
    let Some(response_id) = element.parse_attr::<i64>("ObjectID").ok().flatten() else {
        return Err(error);
    };
    tracing::warn!(response_id, error = %error, "malformed response");
    connection.complete(Response::from_error(response_id, &error.into()))
}

/// Answer a command that could not be decoded, if it expects an answer.
async fn reject(connection: &Connection, element: &Element, error: ProtocolError) {
    let response_id = if element.name == Command::ELEMENT {
        element.parse_attr::<i64>("ResponseID").ok().flatten()
    } else {
        None
    };
    match response_id {
        Some(response_id) => {
            tracing::warn!(response_id, error = %error, "rejecting malformed command");
            let response = Response::from_error(response_id, &error.into());
            if let Err(e) = connection.send_message(&Message::Response(response)).await {
                tracing::debug!(response_id, error = %e, "rejection not sent");
            }
        }
        None => tracing::warn!(element = %element.name, error = %error, "malformed message dropped"),
    }
}

/// Run one inbound command against this connection.
pub(super) async fn execute(
    connection: &Connection,
    command: &Command,
    cancel: CancellationToken,
) -> Result<Option<Element>, RpcError> {
    let Some(expected) = command.kind.target() else {
        return match command.kind {
            CommandKind::UpdateSettings => {
                let bag = match &command.argument {
                    Some(argument) => SettingsBag::decode(argument)?,
                    None => SettingsBag::new(),
                };
                connection.apply_remote_settings(bag);
                Ok(None)
            }
            CommandKind::Shutdown => Ok(None),
            other => Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        };
    };

    let id = command
        .instance
        .ok_or_else(|| ProtocolError::MissingAttribute {
            element: Command::ELEMENT.into(),
            attribute: "InstanceID".into(),
        })?;
    let servant = connection.servant(id)?;
    if servant.object_type() != expected {
        return Err(ProtocolError::WrongObjectType {
            id: id.0,
            expected: expected.as_str(),
            actual: servant.object_type().as_str(),
        }
        .into());
    }
    tracing::trace!(object_id = id.0, command = %command.kind, "invoking servant");
    servant.invoke(connection, command, cancel).await
}

/// Turn the value of a two-way object command into a typed reference.
pub(crate) fn expect_reference(
    value: Option<Element>,
    expected: testwire_core::ObjectType,
) -> Result<ObjectRef, RpcError> {
    let value = value.ok_or_else(|| ProtocolError::MissingChild {
        element: Response::ELEMENT.into(),
        child: ObjectRef::ELEMENT.into(),
    })?;
    Ok(ObjectRef::decode_typed(&value, expected)?)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
