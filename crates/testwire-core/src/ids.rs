//! Object ids and object references.

use core::fmt;

use crate::{Element, ProtocolError};

/// Connection-scoped object id.
///
/// Server-role connections allocate `1, 2, 3, ...`; client-role connections
/// allocate `-1, -2, -3, ...`. Zero is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub i64);

/// Id of the bootstrap test framework object hosted by every server.
pub const FRAMEWORK_OBJECT_ID: ObjectId = ObjectId(0);

impl ObjectId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The proxied capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    TestFramework,
    TestSuite,
    TestCase,
    EventSink,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestFramework => "TestFramework",
            Self::TestSuite => "TestSuite",
            Self::TestCase => "TestCase",
            Self::EventSink => "EventSink",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "TestFramework" => Some(Self::TestFramework),
            "TestSuite" => Some(Self::TestSuite),
            "TestCase" => Some(Self::TestCase),
            "EventSink" => Some(Self::EventSink),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a remote object as it appears on the wire:
/// `ObjectID Type="TestCase" ID="3"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub object_type: ObjectType,
    pub id: ObjectId,
}

impl ObjectRef {
    pub const ELEMENT: &'static str = "ObjectID";

    pub fn new(object_type: ObjectType, id: ObjectId) -> Self {
        Self { object_type, id }
    }

    pub fn encode(&self) -> Element {
        Element::new(Self::ELEMENT)
            .with_attr("Type", self.object_type.as_str())
            .with_attr("ID", self.id.0)
    }

    pub fn decode(element: &Element) -> Result<Self, ProtocolError> {
        element.expect_name(Self::ELEMENT)?;
        let raw_type = element.required_attr("Type")?;
        let object_type =
            ObjectType::from_wire(raw_type).ok_or_else(|| ProtocolError::InvalidAttribute {
                element: element.name.clone(),
                attribute: "Type".into(),
                value: raw_type.to_string(),
            })?;
        let id = ObjectId(element.required_parsed_attr("ID")?);
        Ok(Self { object_type, id })
    }

    /// Decode and check that the reference points at the expected kind.
    pub fn decode_typed(element: &Element, expected: ObjectType) -> Result<Self, ProtocolError> {
        let reference = Self::decode(element)?;
        if reference.object_type != expected {
            return Err(ProtocolError::WrongObjectType {
                id: reference.id.0,
                expected: expected.as_str(),
                actual: reference.object_type.as_str(),
            });
        }
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_decode_rejects_other_kinds() {
        let el = ObjectRef::new(ObjectType::TestSuite, ObjectId(1)).encode();
        assert!(ObjectRef::decode_typed(&el, ObjectType::TestSuite).is_ok());
        assert_eq!(
            ObjectRef::decode_typed(&el, ObjectType::TestCase),
            Err(ProtocolError::WrongObjectType {
                id: 1,
                expected: "TestCase",
                actual: "TestSuite",
            })
        );
    }

    #[test]
    fn unknown_type_is_invalid_attribute() {
        let el = Element::new("ObjectID")
            .with_attr("Type", "Widget")
            .with_attr("ID", 4);
        assert!(matches!(
            ObjectRef::decode(&el),
            Err(ProtocolError::InvalidAttribute { .. })
        ));
    }
}
