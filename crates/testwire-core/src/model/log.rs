use crate::{Element, ProtocolError, WireValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Debug,
    Message,
    Warning,
    Error,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Message => "Message",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Debug" => Some(Self::Debug),
            "Message" => Some(Self::Message),
            "Warning" => Some(Self::Warning),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One log message forwarded to an event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub log_level: i32,
    pub text: String,
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(kind: LogKind, log_level: i32, text: impl Into<String>) -> Self {
        Self {
            kind,
            log_level,
            text: text.into(),
            error: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(LogKind::Message, 0, text)
    }

    pub fn debug(log_level: i32, text: impl Into<String>) -> Self {
        Self::new(LogKind::Debug, log_level, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(LogKind::Warning, 0, text)
    }

    pub fn error(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(LogKind::Error, 0, text)
        }
    }
}

impl WireValue for LogEntry {
    const ELEMENT: &'static str = "LogEntry";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT)
            .with_attr("Kind", self.kind.as_str())
            .with_attr("LogLevel", self.log_level)
            .with_attr("Text", &self.text);
        if let Some(error) = &self.error {
            el.push_child(Element::new("Error").with_text(error.clone()));
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        let raw_kind = element.required_attr("Kind")?;
        let kind = LogKind::from_wire(raw_kind).ok_or_else(|| ProtocolError::InvalidAttribute {
            element: element.name.clone(),
            attribute: "Kind".into(),
            value: raw_kind.to_string(),
        })?;
        Ok(Self {
            kind,
            log_level: element.required_parsed_attr("LogLevel")?,
            text: element.required_attr("Text")?.to_string(),
            error: element
                .child("Error")
                .map(|e| e.text.clone().unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_travels_as_child() {
        let entry = LogEntry::error("request failed", "connection reset");
        let el = entry.encode();
        assert_eq!(
            el.child("Error").and_then(|e| e.text.as_deref()),
            Some("connection reset")
        );
        assert_eq!(LogEntry::decode(&el).unwrap(), entry);
    }

    #[test]
    fn log_level_is_required() {
        let el = Element::new("LogEntry")
            .with_attr("Kind", "Debug")
            .with_attr("Text", "x");
        assert!(matches!(
            LogEntry::decode(&el),
            Err(ProtocolError::MissingAttribute { .. })
        ));
    }
}
