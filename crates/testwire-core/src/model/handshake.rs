use crate::{Element, ObjectRef, ObjectType, ProtocolError, SettingsBag, WireValue};

/// The single exchange performed when a connection starts.
///
/// The client sends one of these first; the server answers with the
/// canonical settings and, when asked to, a freshly loaded suite.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handshake {
    pub want_statistics_events: bool,
    pub load_test_suite: bool,
    pub settings: Option<SettingsBag>,
    pub event_sink: Option<ObjectRef>,
    pub test_suite: Option<ObjectRef>,
}

fn wrap(name: &str, reference: &ObjectRef) -> Element {
    Element::new(name).with_child(reference.encode())
}

fn unwrap_ref(
    element: &Element,
    name: &str,
    expected: ObjectType,
) -> Result<Option<ObjectRef>, ProtocolError> {
    let Some(wrapper) = element.child(name) else {
        return Ok(None);
    };
    let inner = wrapper.first_child().ok_or_else(|| ProtocolError::MissingChild {
        element: name.to_string(),
        child: ObjectRef::ELEMENT.into(),
    })?;
    ObjectRef::decode_typed(inner, expected).map(Some)
}

impl WireValue for Handshake {
    const ELEMENT: &'static str = "Handshake";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT)
            .with_attr("WantStatisticsEvents", self.want_statistics_events);
        if self.load_test_suite {
            el.set_attr("LoadTestSuite", true);
        }
        if let Some(settings) = &self.settings {
            el.push_child(settings.encode());
        }
        if let Some(sink) = &self.event_sink {
            el.push_child(wrap("EventSink", sink));
        }
        if let Some(suite) = &self.test_suite {
            el.push_child(wrap("TestSuite", suite));
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let want_statistics_events = element
            .bool_attr("WantStatisticsEvents")?
            .ok_or_else(|| ProtocolError::MissingAttribute {
                element: element.name.clone(),
                attribute: "WantStatisticsEvents".into(),
            })?;
        Ok(Self {
            want_statistics_events,
            load_test_suite: element.bool_attr("LoadTestSuite")?.unwrap_or(false),
            settings: element
                .child(SettingsBag::ELEMENT)
                .map(SettingsBag::decode)
                .transpose()?,
            event_sink: unwrap_ref(element, "EventSink", ObjectType::EventSink)?,
            test_suite: unwrap_ref(element, "TestSuite", ObjectType::TestSuite)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectId;

    #[test]
    fn references_are_type_checked() {
        let bad = Element::new("Handshake")
            .with_attr("WantStatisticsEvents", false)
            .with_child(wrap(
                "EventSink",
                &ObjectRef::new(ObjectType::TestCase, ObjectId(-1)),
            ));
        assert!(matches!(
            Handshake::decode(&bad),
            Err(ProtocolError::WrongObjectType { .. })
        ));
    }

    #[test]
    fn full_handshake_decodes() {
        let mut settings = SettingsBag::new();
        settings.set_log_level(2);
        let handshake = Handshake {
            want_statistics_events: true,
            load_test_suite: true,
            settings: Some(settings),
            event_sink: Some(ObjectRef::new(ObjectType::EventSink, ObjectId(-1))),
            test_suite: None,
        };
        assert_eq!(Handshake::decode(&handshake.encode()).unwrap(), handshake);
    }

    #[test]
    fn statistics_flag_is_mandatory() {
        assert!(Handshake::decode(&Element::new("Handshake")).is_err());
    }
}
