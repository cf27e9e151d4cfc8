#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod document;
mod error;
pub mod frame;
mod ids;
mod message;
pub mod model;
mod serializer;

pub use document::Element;
pub use error::{ErrorKind, ProtocolError, RpcError, TransportError};
pub use frame::{Frame, FrameReader, FrameWriter};
pub use ids::{FRAMEWORK_OBJECT_ID, ObjectId, ObjectRef, ObjectType};
pub use message::{CancelNotice, Command, CommandKind, Message, Outcome, Response};
pub use model::{
    Handshake, LogEntry, LogKind, PathKind, PathNode, SettingsBag, StatisticsEvent,
    StatisticsKind, TestName, TestParameter, TestPath, TestResult, TestStatus,
};
pub use serializer::{
    WireValue, decode_list, encode_list, from_document, require_document, to_document,
};
