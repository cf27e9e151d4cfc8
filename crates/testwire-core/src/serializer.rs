//! Serializer registry.
//!
//! Every domain value that travels inside a command argument or a response
//! implements [`WireValue`]. Encoding is infallible; decoding rejects a
//! structurally invalid document with a [`ProtocolError`].

use crate::{Element, ProtocolError};

pub trait WireValue: Sized {
    /// Name of the root element this value is encoded as.
    const ELEMENT: &'static str;

    fn encode(&self) -> Element;

    /// Decode from an element whose name has already been checked.
    fn decode_body(element: &Element) -> Result<Self, ProtocolError>;

    fn decode(element: &Element) -> Result<Self, ProtocolError> {
        element.expect_name(Self::ELEMENT)?;
        Self::decode_body(element)
    }
}

pub fn to_document<T: WireValue>(value: &T) -> Element {
    value.encode()
}

pub fn from_document<T: WireValue>(element: &Element) -> Result<T, ProtocolError> {
    T::decode(element)
}

/// Decode an optional payload that is required to be present.
pub fn require_document<T: WireValue>(element: Option<&Element>) -> Result<T, ProtocolError> {
    match element {
        Some(element) => T::decode(element),
        None => Err(ProtocolError::MissingChild {
            element: "Argument".into(),
            child: T::ELEMENT.into(),
        }),
    }
}

/// Encode a list of values under a wrapper element.
pub fn encode_list<'a, T, I>(wrapper: &str, items: I) -> Element
where
    T: WireValue + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut root = Element::new(wrapper);
    for item in items {
        root.push_child(item.encode());
    }
    root
}

pub fn decode_list<T: WireValue>(wrapper: &str, element: &Element) -> Result<Vec<T>, ProtocolError> {
    element.expect_name(wrapper)?;
    element.children.iter().map(T::decode).collect()
}
