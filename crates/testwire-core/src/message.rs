//! Message model: commands, responses, cancel notices.
//!
//! Every top-level document on the wire decodes into exactly one [`Message`].

use core::fmt;

use crate::{Element, ErrorKind, Handshake, ObjectId, ObjectType, ProtocolError, RpcError, WireValue};

/// Every command the protocol knows. One-way-ness is fixed per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    // Connection-level
    Shutdown,
    UpdateSettings,

    // TestFramework
    LoadTestSuite,

    // TestSuite
    GetRootTestCase,
    ResolveFromPath,

    // TestCase
    Initialize,
    GetChildren,
    GetParameters,
    Run,

    // EventSink
    LogMessage,
    StatisticsEvent,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        Self::Shutdown,
        Self::UpdateSettings,
        Self::LoadTestSuite,
        Self::GetRootTestCase,
        Self::ResolveFromPath,
        Self::Initialize,
        Self::GetChildren,
        Self::GetParameters,
        Self::Run,
        Self::LogMessage,
        Self::StatisticsEvent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "Shutdown",
            Self::UpdateSettings => "UpdateSettings",
            Self::LoadTestSuite => "LoadTestSuite",
            Self::GetRootTestCase => "GetRootTestCase",
            Self::ResolveFromPath => "ResolveFromPath",
            Self::Initialize => "Initialize",
            Self::GetChildren => "GetChildren",
            Self::GetParameters => "GetParameters",
            Self::Run => "Run",
            Self::LogMessage => "LogMessage",
            Self::StatisticsEvent => "StatisticsEvent",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn is_one_way(self) -> bool {
        matches!(
            self,
            Self::Shutdown | Self::UpdateSettings | Self::LogMessage | Self::StatisticsEvent
        )
    }

    /// The kind of object this command must be addressed to, if any.
    pub fn target(self) -> Option<ObjectType> {
        match self {
            Self::Shutdown | Self::UpdateSettings => None,
            Self::LoadTestSuite => Some(ObjectType::TestFramework),
            Self::GetRootTestCase | Self::ResolveFromPath => Some(ObjectType::TestSuite),
            Self::Initialize | Self::GetChildren | Self::GetParameters | Self::Run => {
                Some(ObjectType::TestCase)
            }
            Self::LogMessage | Self::StatisticsEvent => Some(ObjectType::EventSink),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    /// Correlation id; present exactly when the command is two-way.
    pub response_id: Option<i64>,
    /// Target object for object commands.
    pub instance: Option<ObjectId>,
    pub argument: Option<Element>,
}

impl Command {
    pub const ELEMENT: &'static str = "Command";

    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            response_id: None,
            instance: None,
            argument: None,
        }
    }

    pub fn with_instance(mut self, instance: ObjectId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_argument(mut self, argument: Element) -> Self {
        self.argument = Some(argument);
        self
    }

    pub fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT).with_attr("Type", self.kind.as_str());
        if let Some(id) = self.response_id {
            el.set_attr("ResponseID", id);
        }
        if let Some(instance) = self.instance {
            el.set_attr("InstanceID", instance.0);
        }
        if let Some(argument) = &self.argument {
            el.push_child(Element::new("Argument").with_child(argument.clone()));
        }
        el
    }

    pub fn decode(element: &Element) -> Result<Self, ProtocolError> {
        element.expect_name(Self::ELEMENT)?;
        let raw_kind = element.required_attr("Type")?;
        let kind = CommandKind::from_wire(raw_kind)
            .ok_or_else(|| ProtocolError::UnknownCommand(raw_kind.to_string()))?;
        let response_id: Option<i64> = element.parse_attr("ResponseID")?;
        let instance = element.parse_attr::<i64>("InstanceID")?.map(ObjectId);

        match (kind.is_one_way(), response_id) {
            (true, Some(_)) => {
                return Err(ProtocolError::InvalidAttribute {
                    element: element.name.clone(),
                    attribute: "ResponseID".into(),
                    value: format!("one-way command {kind} cannot carry a response id"),
                });
            }
            (false, None) => {
                return Err(ProtocolError::MissingAttribute {
                    element: element.name.clone(),
                    attribute: "ResponseID".into(),
                });
            }
            _ => {}
        }
        if kind.target().is_some() && instance.is_none() {
            return Err(ProtocolError::MissingAttribute {
                element: element.name.clone(),
                attribute: "InstanceID".into(),
            });
        }

        let argument = element
            .child("Argument")
            .and_then(|arg| arg.first_child())
            .cloned();
        Ok(Self {
            kind,
            response_id,
            instance,
            argument,
        })
    }
}

/// What a [`Response`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Option<Element>),
    Error {
        kind: ErrorKind,
        /// `None` for a response marked unsuccessful without an error string.
        message: Option<String>,
    },
    Canceled,
}

/// The answer to one two-way command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub response_id: i64,
    pub outcome: Outcome,
}

impl Response {
    pub const ELEMENT: &'static str = "Response";

    pub fn success(response_id: i64, value: Option<Element>) -> Self {
        Self {
            response_id,
            outcome: Outcome::Success(value),
        }
    }

    pub fn canceled(response_id: i64) -> Self {
        Self {
            response_id,
            outcome: Outcome::Canceled,
        }
    }

    /// Build the response for a failed handler or a rejected command.
    pub fn from_error(response_id: i64, error: &RpcError) -> Self {
        let outcome = match error {
            RpcError::Canceled => Outcome::Canceled,
            RpcError::Handler { message } => Outcome::Error {
                kind: ErrorKind::Handler,
                message: Some(message.clone()),
            },
            RpcError::Protocol(e) => Outcome::Error {
                kind: ErrorKind::Protocol,
                message: Some(e.to_string()),
            },
            RpcError::Transport(e) => Outcome::Error {
                kind: ErrorKind::Transport,
                message: Some(e.to_string()),
            },
        };
        Self {
            response_id,
            outcome,
        }
    }

    pub fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT).with_attr("ObjectID", self.response_id);
        match &self.outcome {
            Outcome::Success(value) => {
                el.set_attr("Success", true);
                if let Some(value) = value {
                    el.push_child(Element::new("Response").with_child(value.clone()));
                }
            }
            Outcome::Error { kind, message } => {
                el.set_attr("Success", false);
                el.set_attr("ErrorKind", kind.as_str());
                if let Some(message) = message {
                    el.set_attr("Error", message);
                }
            }
            Outcome::Canceled => {
                el.set_attr("Success", false);
                el.set_attr("Canceled", true);
            }
        }
        el
    }

    pub fn decode(element: &Element) -> Result<Self, ProtocolError> {
        element.expect_name(Self::ELEMENT)?;
        let response_id = element.required_parsed_attr("ObjectID")?;
        let success = element
            .bool_attr("Success")?
            .ok_or_else(|| ProtocolError::MissingAttribute {
                element: element.name.clone(),
                attribute: "Success".into(),
            })?;
        let error = element.attr("Error").map(str::to_string);

        let outcome = if success {
            if let Some(error) = error {
                return Err(ProtocolError::InvalidAttribute {
                    element: element.name.clone(),
                    attribute: "Error".into(),
                    value: error,
                });
            }
            let value = element
                .child("Response")
                .and_then(|r| r.first_child())
                .cloned();
            Outcome::Success(value)
        } else if element.bool_attr("Canceled")?.unwrap_or(false) {
            Outcome::Canceled
        } else {
            let kind = element
                .attr("ErrorKind")
                .and_then(ErrorKind::from_wire)
                .unwrap_or(ErrorKind::Handler);
            Outcome::Error {
                kind,
                message: error,
            }
        };
        Ok(Self {
            response_id,
            outcome,
        })
    }

    /// Convert into what the original caller observes.
    pub fn into_result(self) -> Result<Option<Element>, RpcError> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Canceled => Err(RpcError::Canceled),
            Outcome::Error { message: None, .. } => {
                Err(ProtocolError::UnsuccessfulResponse.into())
            }
            Outcome::Error {
                kind: ErrorKind::Protocol | ErrorKind::Transport,
                message: Some(message),
            } => Err(ProtocolError::Remote(message).into()),
            Outcome::Error {
                kind: ErrorKind::Handler | ErrorKind::Canceled,
                message: Some(message),
            } => Err(RpcError::Handler { message }),
        }
    }
}

/// Request to cancel the peer's in-flight handling of `response_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelNotice {
    pub response_id: i64,
}

impl CancelNotice {
    pub const ELEMENT: &'static str = "Cancel";

    pub fn encode(&self) -> Element {
        Element::new(Self::ELEMENT).with_attr("ObjectID", self.response_id)
    }

    pub fn decode(element: &Element) -> Result<Self, ProtocolError> {
        element.expect_name(Self::ELEMENT)?;
        Ok(Self {
            response_id: element.required_parsed_attr("ObjectID")?,
        })
    }
}

/// Any top-level document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Response(Response),
    Cancel(CancelNotice),
    Handshake(Handshake),
}

impl Message {
    pub fn encode(&self) -> Element {
        match self {
            Self::Command(c) => c.encode(),
            Self::Response(r) => r.encode(),
            Self::Cancel(c) => c.encode(),
            Self::Handshake(h) => h.encode(),
        }
    }

    pub fn decode(element: &Element) -> Result<Self, ProtocolError> {
        match element.name.as_str() {
            "Command" => Command::decode(element).map(Self::Command),
            "Response" => Response::decode(element).map(Self::Response),
            "Cancel" => CancelNotice::decode(element).map(Self::Cancel),
            "Handshake" => Handshake::decode(element).map(Self::Handshake),
            other => Err(ProtocolError::UnexpectedElement {
                expected: "Command, Response, Cancel or Handshake".into(),
                found: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_way_commands_cannot_carry_response_ids() {
        let el = Element::new("Command")
            .with_attr("Type", "Shutdown")
            .with_attr("ResponseID", 3);
        assert!(Command::decode(&el).is_err());
    }

    #[test]
    fn two_way_commands_need_response_ids() {
        let el = Element::new("Command")
            .with_attr("Type", "Run")
            .with_attr("InstanceID", 5);
        assert!(matches!(
            Command::decode(&el),
            Err(ProtocolError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn object_commands_need_instance() {
        let el = Element::new("Command")
            .with_attr("Type", "GetChildren")
            .with_attr("ResponseID", -1);
        assert!(Command::decode(&el).is_err());
    }

    #[test]
    fn unknown_command_kind() {
        let el = Element::new("Command").with_attr("Type", "Explode");
        assert_eq!(
            Command::decode(&el),
            Err(ProtocolError::UnknownCommand("Explode".into()))
        );
    }

    #[test]
    fn argument_is_unwrapped() {
        let mut cmd = Command::new(CommandKind::ResolveFromPath)
            .with_instance(ObjectId(1))
            .with_argument(Element::new("TestPath"));
        cmd.response_id = Some(-4);
        let decoded = Command::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded.argument, Some(Element::new("TestPath")));
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn success_and_error_are_exclusive() {
        let el = Element::new("Response")
            .with_attr("ObjectID", 1)
            .with_attr("Success", true)
            .with_attr("Error", "nope");
        assert!(Response::decode(&el).is_err());
    }

    #[test]
    fn unsuccessful_without_error_is_protocol_error() {
        let el = Element::new("Response")
            .with_attr("ObjectID", 1)
            .with_attr("Success", false);
        let response = Response::decode(&el).unwrap();
        assert!(matches!(
            response.into_result(),
            Err(RpcError::Protocol(ProtocolError::UnsuccessfulResponse))
        ));
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let handler = Response::from_error(2, &RpcError::handler("boom"));
        assert!(matches!(
            Response::decode(&handler.encode()).unwrap().into_result(),
            Err(RpcError::Handler { message }) if message == "boom"
        ));

        let protocol = Response::from_error(3, &ProtocolError::UnknownObject(9).into());
        assert!(matches!(
            Response::decode(&protocol.encode()).unwrap().into_result(),
            Err(RpcError::Protocol(ProtocolError::Remote(_)))
        ));

        let canceled = Response::canceled(4);
        assert!(
            Response::decode(&canceled.encode())
                .unwrap()
                .into_result()
                .unwrap_err()
                .is_canceled()
        );
    }

    #[test]
    fn unknown_top_level_element() {
        assert!(Message::decode(&Element::new("Hello")).is_err());
    }
}
