use std::collections::BTreeMap;

use crate::{Element, ProtocolError, WireValue};

const REPEAT: &str = "Repeat";
const REPEAT_COUNT: &str = "RepeatCount";
const LOG_LEVEL: &str = "LogLevel";
const HIDE_IGNORED: &str = "HideIgnoredTests";
const HIDE_SUCCESSFUL: &str = "HideSuccessfulTests";
const CURRENT_CATEGORY: &str = "CurrentCategory";
const FEATURE_PREFIX: &str = "/Feature/";

/// String key/value settings shared by both ends of a connection.
///
/// Typed accessors treat a missing or unparsable value as the default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsBag {
    values: BTreeMap<String, String>,
}

impl SettingsBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn parsed<T: std::str::FromStr + Default>(&self, key: &str) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn repeat(&self) -> bool {
        self.flag(REPEAT)
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.set(REPEAT, repeat.to_string());
    }

    pub fn repeat_count(&self) -> u32 {
        self.parsed(REPEAT_COUNT)
    }

    pub fn set_repeat_count(&mut self, count: u32) {
        self.set(REPEAT_COUNT, count.to_string());
    }

    pub fn log_level(&self) -> i32 {
        self.parsed(LOG_LEVEL)
    }

    pub fn set_log_level(&mut self, level: i32) {
        self.set(LOG_LEVEL, level.to_string());
    }

    pub fn hide_ignored_tests(&self) -> bool {
        self.flag(HIDE_IGNORED)
    }

    pub fn set_hide_ignored_tests(&mut self, hide: bool) {
        self.set(HIDE_IGNORED, hide.to_string());
    }

    pub fn hide_successful_tests(&self) -> bool {
        self.flag(HIDE_SUCCESSFUL)
    }

    pub fn set_hide_successful_tests(&mut self, hide: bool) {
        self.set(HIDE_SUCCESSFUL, hide.to_string());
    }

    pub fn current_category(&self) -> Option<&str> {
        self.get(CURRENT_CATEGORY)
    }

    pub fn set_current_category(&mut self, category: Option<&str>) {
        match category {
            Some(category) => self.set(CURRENT_CATEGORY, category),
            None => {
                self.remove(CURRENT_CATEGORY);
            }
        }
    }

    /// `None` when the feature was never configured.
    pub fn is_feature_enabled(&self, feature: &str) -> Option<bool> {
        let key = format!("{FEATURE_PREFIX}{feature}");
        self.get(&key).map(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn set_feature_enabled(&mut self, feature: &str, enabled: Option<bool>) {
        let key = format!("{FEATURE_PREFIX}{feature}");
        match enabled {
            Some(enabled) => self.set(key, enabled.to_string()),
            None => {
                self.remove(&key);
            }
        }
    }
}

impl FromIterator<(String, String)> for SettingsBag {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl WireValue for SettingsBag {
    const ELEMENT: &'static str = "Settings";

    fn encode(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT);
        for (key, value) in &self.values {
            el.push_child(
                Element::new("Setting")
                    .with_attr("Key", key)
                    .with_attr("Value", value),
            );
        }
        el
    }

    fn decode_body(element: &Element) -> Result<Self, ProtocolError> {
        element
            .children_named("Setting")
            .map(|s| -> Result<(String, String), ProtocolError> {
                Ok((
                    s.required_attr("Key")?.to_string(),
                    s.required_attr("Value")?.to_string(),
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_default_when_missing_or_invalid() {
        let mut bag = SettingsBag::new();
        assert_eq!(bag.log_level(), 0);
        assert!(!bag.repeat());
        bag.set("LogLevel", "loud");
        assert_eq!(bag.log_level(), 0);
        bag.set_log_level(3);
        bag.set_repeat(true);
        bag.set_repeat_count(5);
        assert_eq!(bag.log_level(), 3);
        assert!(bag.repeat());
        assert_eq!(bag.repeat_count(), 5);
    }

    #[test]
    fn features_are_tristate() {
        let mut bag = SettingsBag::new();
        assert_eq!(bag.is_feature_enabled("IPv6"), None);
        bag.set_feature_enabled("IPv6", Some(false));
        assert_eq!(bag.is_feature_enabled("IPv6"), Some(false));
        assert_eq!(bag.get("/Feature/IPv6"), Some("false"));
        bag.set_feature_enabled("IPv6", None);
        assert!(bag.is_empty());
    }

    #[test]
    fn setting_without_value_is_rejected() {
        let el = Element::new("Settings").with_child(Element::new("Setting").with_attr("Key", "A"));
        assert!(SettingsBag::decode(&el).is_err());
    }
}
