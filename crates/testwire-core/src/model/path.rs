use crate::{Element, ProtocolError, WireValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    Assembly,
    Suite,
    Fixture,
    Test,
    Parameter,
    Instance,
}

impl PathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assembly => "Assembly",
            Self::Suite => "Suite",
            Self::Fixture => "Fixture",
            Self::Test => "Test",
            Self::Parameter => "Parameter",
            Self::Instance => "Instance",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Assembly" => Some(Self::Assembly),
            "Suite" => Some(Self::Suite),
            "Fixture" => Some(Self::Fixture),
            "Test" => Some(Self::Test),
            "Parameter" => Some(Self::Parameter),
            "Instance" => Some(Self::Instance),
            _ => None,
        }
    }
}

/// One step of a [`TestPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub kind: PathKind,
    pub identifier: Option<String>,
    pub name: Option<String>,
    pub parameter_type: Option<String>,
    pub parameter_value: Option<String>,
    pub hidden: bool,
}

impl PathNode {
    pub fn named(kind: PathKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind,
            identifier: Some(name.clone()),
            name: Some(name),
            parameter_type: None,
            parameter_value: None,
            hidden: false,
        }
    }

    pub fn parameter(
        identifier: impl Into<String>,
        parameter_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            kind: PathKind::Parameter,
            identifier: Some(identifier.into()),
            name: None,
            parameter_type: Some(parameter_type.into()),
            parameter_value: Some(value.into()),
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Whether both nodes address the same position in a test tree,
    /// irrespective of the bound parameter value.
    pub fn matches(&self, other: &PathNode) -> bool {
        self.kind == other.kind
            && self.identifier == other.identifier
            && self.parameter_type == other.parameter_type
    }

    fn encode(&self) -> Element {
        let mut el = Element::new("TestParameter").with_attr("Type", self.kind.as_str());
        if let Some(identifier) = &self.identifier {
            el.set_attr("Identifier", identifier);
        }
        if let Some(name) = &self.name {
            el.set_attr("Name", name);
        }
        if let Some(parameter_type) = &self.parameter_type {
            el.set_attr("ParameterType", parameter_type);
        }
        if let Some(value) = &self.parameter_value {
            el.set_attr("Parameter", value);
        }
        if self.hidden {
            el.set_attr("Flags", "Hidden");
        }
        el
    }

    fn decode(element: &Element) -> Result<Self, ProtocolError> {
        let raw_kind = element.required_attr("Type")?;
        let kind = PathKind::from_wire(raw_kind).ok_or_else(|| ProtocolError::InvalidAttribute {
            element: element.name.clone(),
            attribute: "Type".into(),
            value: raw_kind.to_string(),
        })?;
        let owned = |name: &str| element.attr(name).map(str::to_string);
        Ok(Self {
            kind,
            identifier: owned("Identifier"),
            name: owned("Name"),
            parameter_type: owned("ParameterType"),
            parameter_value: owned("Parameter"),
            hidden: element
                .attr("Flags")
                .is_some_and(|flags| flags.split(',').any(|f| f.trim() == "Hidden")),
        })
    }
}

/// Identifying path of a test case, root first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestPath {
    pub nodes: Vec<PathNode>,
}

impl TestPath {
    pub fn root(node: PathNode) -> Self {
        Self { nodes: vec![node] }
    }

    pub fn child(&self, node: PathNode) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Self { nodes }
    }

    pub fn leaf(&self) -> Option<&PathNode> {
        self.nodes.last()
    }

    pub fn depth(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &TestPath) -> bool {
        self.nodes.len() <= other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|(a, b)| a == b)
    }

    /// Dotted name of the visible named nodes.
    pub fn name(&self) -> String {
        self.nodes
            .iter()
            .filter(|n| n.kind != PathKind::Parameter && !n.hidden)
            .filter_map(|n| n.name.as_deref())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `name()` followed by the values of visible parameter nodes, e.g.
    /// `Suite.Fixture.Test(10,true)`.
    pub fn full_name(&self) -> String {
        let arguments: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| n.kind == PathKind::Parameter && !n.hidden)
            .map(|n| n.parameter_value.as_deref().unwrap_or(""))
            .collect();
        if arguments.is_empty() {
            self.name()
        } else {
            format!("{}({})", self.name(), arguments.join(","))
        }
    }
}

impl WireValue for TestPath {
    const ELEMENT: &'static str = "TestPath";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT);
        for node in &self.nodes {
            el.push_child(node.encode());
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let nodes = element
            .children_named("TestParameter")
            .map(PathNode::decode)
            .collect::<Result<Vec<_>, _>>()?;
        if nodes.is_empty() {
            return Err(ProtocolError::MissingChild {
                element: Self::ELEMENT.into(),
                child: "TestParameter".into(),
            });
        }
        Ok(Self { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestPath {
        TestPath::root(PathNode::named(PathKind::Suite, "Net"))
            .child(PathNode::named(PathKind::Fixture, "Http"))
            .child(PathNode::named(PathKind::Test, "Get"))
            .child(PathNode::parameter("size", "int", "10"))
            .child(PathNode::parameter("seed", "int", "7").hidden())
    }

    #[test]
    fn full_name_includes_visible_arguments() {
        let path = sample();
        assert_eq!(path.name(), "Net.Http.Get");
        assert_eq!(path.full_name(), "Net.Http.Get(10)");
    }

    #[test]
    fn decode_preserves_nodes() {
        let path = sample();
        assert_eq!(TestPath::decode(&path.encode()).unwrap(), path);
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(TestPath::decode(&Element::new("TestPath")).is_err());
    }

    #[test]
    fn prefix_relation() {
        let path = sample();
        let parent = TestPath::root(PathNode::named(PathKind::Suite, "Net"));
        assert!(parent.is_prefix_of(&path));
        assert!(!path.is_prefix_of(&parent));
    }
}
