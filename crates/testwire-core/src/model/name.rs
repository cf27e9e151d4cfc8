use core::fmt;

use crate::{Element, ProtocolError, WireValue};

/// A named parameter attached to a test name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParameter {
    pub name: String,
    pub value: String,
    pub hidden: bool,
}

/// Display name of a test, with its parameter bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestName {
    pub name: String,
    pub parameters: Vec<TestParameter>,
}

impl TestName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(TestParameter {
            name: name.into(),
            value: value.into(),
            hidden: false,
        });
        self
    }

    pub fn with_hidden_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.parameters.push(TestParameter {
            name: name.into(),
            value: value.into(),
            hidden: true,
        });
        self
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let mut visible = self.parameters.iter().filter(|p| !p.hidden).peekable();
        if visible.peek().is_some() {
            f.write_str("(")?;
            for (i, p) in visible.enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", p.name, p.value)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl WireValue for TestName {
    const ELEMENT: &'static str = "TestName";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT).with_attr("Name", &self.name);
        for p in &self.parameters {
            el.push_child(
                Element::new("Parameter")
                    .with_attr("Name", &p.name)
                    .with_attr("Value", &p.value)
                    .with_attr("IsHidden", p.hidden),
            );
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let name = element.required_attr("Name")?.to_string();
        let parameters = element
            .children_named("Parameter")
            .map(|p| -> Result<TestParameter, ProtocolError> {
                Ok(TestParameter {
                    name: p.required_attr("Name")?.to_string(),
                    value: p.required_attr("Value")?.to_string(),
                    hidden: p.bool_attr("IsHidden")?.unwrap_or(false),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { name, parameters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_skips_hidden_parameters() {
        let name = TestName::new("Http.Get")
            .with_parameter("size", "10")
            .with_hidden_parameter("seed", "42");
        assert_eq!(name.to_string(), "Http.Get(size=10)");
        assert_eq!(TestName::new("Plain").to_string(), "Plain");
    }

    #[test]
    fn missing_parameter_value_is_rejected() {
        let el = Element::new("TestName")
            .with_attr("Name", "x")
            .with_child(Element::new("Parameter").with_attr("Name", "a"));
        assert!(matches!(
            TestName::decode(&el),
            Err(ProtocolError::MissingAttribute { .. })
        ));
    }
}
