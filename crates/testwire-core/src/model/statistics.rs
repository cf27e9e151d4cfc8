use crate::{Element, ProtocolError, TestName, TestStatus, WireValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsKind {
    Reset,
    Running,
    Finished,
}

impl StatisticsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::Running => "Running",
            Self::Finished => "Finished",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Reset" => Some(Self::Reset),
            "Running" => Some(Self::Running),
            "Finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Progress notification about a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsEvent {
    pub kind: StatisticsKind,
    pub name: Option<TestName>,
    pub status: TestStatus,
}

impl StatisticsEvent {
    pub fn reset() -> Self {
        Self {
            kind: StatisticsKind::Reset,
            name: None,
            status: TestStatus::None,
        }
    }

    pub fn running(name: TestName) -> Self {
        Self {
            kind: StatisticsKind::Running,
            name: Some(name),
            status: TestStatus::None,
        }
    }

    pub fn finished(name: TestName, status: TestStatus) -> Self {
        Self {
            kind: StatisticsKind::Finished,
            name: Some(name),
            status,
        }
    }
}

impl WireValue for StatisticsEvent {
    const ELEMENT: &'static str = "TestStatisticsEventArgs";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT)
            .with_attr("Type", self.kind.as_str())
            .with_attr("Status", self.status.as_str());
        if let Some(name) = &self.name {
            el.push_child(name.encode());
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let raw_kind = element.required_attr("Type")?;
        let kind =
            StatisticsKind::from_wire(raw_kind).ok_or_else(|| ProtocolError::InvalidAttribute {
                element: element.name.clone(),
                attribute: "Type".into(),
                value: raw_kind.to_string(),
            })?;
        let name = element
            .child(TestName::ELEMENT)
            .map(TestName::decode)
            .transpose()?;
        if kind != StatisticsKind::Reset && name.is_none() {
            return Err(ProtocolError::MissingChild {
                element: element.name.clone(),
                child: TestName::ELEMENT.into(),
            });
        }
        Ok(Self {
            kind,
            name,
            status: TestStatus::decode_attr(element, "Status")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_needs_no_name() {
        let decoded = StatisticsEvent::decode(&StatisticsEvent::reset().encode()).unwrap();
        assert_eq!(decoded, StatisticsEvent::reset());
    }

    #[test]
    fn finished_without_name_is_rejected() {
        let el = Element::new("TestStatisticsEventArgs")
            .with_attr("Type", "Finished")
            .with_attr("Status", "Success");
        assert!(matches!(
            StatisticsEvent::decode(&el),
            Err(ProtocolError::MissingChild { .. })
        ));
    }
}
