use core::fmt;

use crate::{Element, ProtocolError, TestName, WireValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TestStatus {
    #[default]
    None,
    Success,
    Warning,
    Error,
    Ignored,
    Canceled,
    Unstable,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Success => "Success",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Ignored => "Ignored",
            Self::Canceled => "Canceled",
            Self::Unstable => "Unstable",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "None" => Some(Self::None),
            "Success" => Some(Self::Success),
            "Warning" => Some(Self::Warning),
            "Error" => Some(Self::Error),
            "Ignored" => Some(Self::Ignored),
            "Canceled" => Some(Self::Canceled),
            "Unstable" => Some(Self::Unstable),
            _ => None,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Canceled | Self::Unstable)
    }

    /// Status of a parent given the status of one more child.
    pub fn merge(self, child: TestStatus) -> TestStatus {
        fn rank(status: TestStatus) -> u8 {
            match status {
                TestStatus::None => 0,
                TestStatus::Ignored => 1,
                TestStatus::Success => 2,
                TestStatus::Warning => 3,
                TestStatus::Unstable => 4,
                TestStatus::Canceled => 5,
                TestStatus::Error => 6,
            }
        }
        if rank(child) > rank(self) { child } else { self }
    }

    pub(crate) fn decode_attr(element: &Element, attribute: &str) -> Result<Self, ProtocolError> {
        let raw = element.required_attr(attribute)?;
        Self::from_wire(raw).ok_or_else(|| ProtocolError::InvalidAttribute {
            element: element.name.clone(),
            attribute: attribute.into(),
            value: raw.to_string(),
        })
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running a test case, possibly with nested results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestResult {
    pub name: TestName,
    pub status: TestStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    pub children: Vec<TestResult>,
}

impl TestResult {
    pub fn new(name: TestName, status: TestStatus) -> Self {
        Self {
            name,
            status,
            ..Self::default()
        }
    }

    pub fn success(name: TestName) -> Self {
        Self::new(name, TestStatus::Success)
    }

    pub fn error(name: TestName, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(name, TestStatus::Error)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Append a child result and fold its status into ours.
    pub fn add_child(&mut self, child: TestResult) {
        self.status = self.status.merge(child.status);
        self.children.push(child);
    }

    /// Total number of results in this tree with the given status.
    pub fn count(&self, status: TestStatus) -> usize {
        let own = usize::from(self.status == status && self.children.is_empty());
        own + self.children.iter().map(|c| c.count(status)).sum::<usize>()
    }
}

impl WireValue for TestResult {
    const ELEMENT: &'static str = "TestResult";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT).with_attr("Status", self.status.as_str());
        if let Some(message) = &self.message {
            el.set_attr("Message", message);
        }
        if let Some(error) = &self.error {
            el.set_attr("Error", error);
        }
        el.push_child(self.name.encode());
        for child in &self.children {
            el.push_child(child.encode());
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let name = TestName::decode(element.required_child(TestName::ELEMENT)?)?;
        let status = TestStatus::decode_attr(element, "Status")?;
        let children = element
            .children_named(Self::ELEMENT)
            .map(TestResult::decode)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name,
            status,
            message: element.attr("Message").map(str::to_string),
            error: element.attr("Error").map(str::to_string),
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_worst_status() {
        let mut root = TestResult::new(TestName::new("root"), TestStatus::None);
        root.add_child(TestResult::success(TestName::new("a")));
        assert_eq!(root.status, TestStatus::Success);
        root.add_child(TestResult::error(TestName::new("b"), "boom"));
        root.add_child(TestResult::success(TestName::new("c")));
        assert_eq!(root.status, TestStatus::Error);
        assert_eq!(root.count(TestStatus::Success), 2);
        assert_eq!(root.count(TestStatus::Error), 1);
    }

    #[test]
    fn nested_results_decode() {
        let mut root = TestResult::new(TestName::new("root"), TestStatus::None);
        root.add_child(TestResult::error(TestName::new("b"), "boom").with_message("bad"));
        let decoded = TestResult::decode(&root.encode()).unwrap();
        assert_eq!(decoded, root);
        assert_eq!(decoded.children[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let el = Element::new("TestResult")
            .with_attr("Status", "Exploded")
            .with_child(TestName::new("x").encode());
        assert!(matches!(
            TestResult::decode(&el),
            Err(ProtocolError::InvalidAttribute { .. })
        ));
    }
}
