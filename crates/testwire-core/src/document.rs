//! Structured documents.
//!
//! Every frame carries exactly one [`Element`]: a named node with string
//! attributes, child elements and optional text. On the wire an element is
//! UTF-8 JSON.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl ToString) {
        self.attributes.insert(name.into(), value.to_string());
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn required_attr(&self, name: &str) -> Result<&str, ProtocolError> {
        self.attr(name)
            .ok_or_else(|| ProtocolError::MissingAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    /// Parse an optional attribute. Present-but-unparsable is an error.
    pub fn parse_attr<T: FromStr>(&self, name: &str) -> Result<Option<T>, ProtocolError> {
        match self.attr(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ProtocolError::InvalidAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    pub fn required_parsed_attr<T: FromStr>(&self, name: &str) -> Result<T, ProtocolError> {
        self.parse_attr(name)?
            .ok_or_else(|| ProtocolError::MissingAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    /// Boolean attributes accept `true`/`false` in any case.
    pub fn bool_attr(&self, name: &str) -> Result<Option<bool>, ProtocolError> {
        match self.attr(name) {
            None => Ok(None),
            Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(raw) => Err(ProtocolError::InvalidAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn required_child(&self, name: &str) -> Result<&Element, ProtocolError> {
        self.child(name).ok_or_else(|| ProtocolError::MissingChild {
            element: self.name.clone(),
            child: name.to_string(),
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// The single child of a wrapper element such as `Argument`.
    pub fn first_child(&self) -> Option<&Element> {
        self.children.first()
    }

    pub fn expect_name(&self, expected: &str) -> Result<(), ProtocolError> {
        if self.name == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedElement {
                expected: expected.to_string(),
                found: self.name.clone(),
            })
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(TransportError::Encode)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(TransportError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_attribute_names_element() {
        let el = Element::new("Command");
        let err = el.required_attr("Type").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MissingAttribute {
                element: "Command".into(),
                attribute: "Type".into(),
            }
        );
    }

    #[test]
    fn parse_attr_rejects_garbage() {
        let el = Element::new("Response").with_attr("ObjectID", "abc");
        assert!(matches!(
            el.parse_attr::<i64>("ObjectID"),
            Err(ProtocolError::InvalidAttribute { .. })
        ));
        assert_eq!(el.parse_attr::<i64>("Missing").unwrap(), None);
    }

    #[test]
    fn bool_attr_is_case_insensitive() {
        let el = Element::new("Handshake")
            .with_attr("A", "True")
            .with_attr("B", "false")
            .with_attr("C", "yes");
        assert_eq!(el.bool_attr("A").unwrap(), Some(true));
        assert_eq!(el.bool_attr("B").unwrap(), Some(false));
        assert!(el.bool_attr("C").is_err());
    }

    #[test]
    fn json_omits_empty_parts() {
        let el = Element::new("Cancel").with_attr("ObjectID", 5);
        let json = String::from_utf8(el.to_vec().unwrap()).unwrap();
        assert_eq!(json, r#"{"name":"Cancel","attributes":{"ObjectID":"5"}}"#);
        assert_eq!(Element::from_slice(json.as_bytes()).unwrap(), el);
    }
}
