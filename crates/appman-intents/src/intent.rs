//! Intents advertised by installed packages.

use std::collections::{BTreeMap, BTreeSet};

use appman_core::{ApplicationId, ParameterMap, Value};
use serde::{Deserialize, Serialize};

/// Who may request an intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Any application.
    #[default]
    Public,
    /// Only the handling application itself and the system UI.
    Private,
}

/// How well a request's parameters satisfy an intent's filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    /// Every filter entry names a concrete value and the request has it.
    Exact,
    /// No filter, or at least one entry only requires the key to be present.
    Wildcard,
}

/// An intent as declared in a package manifest.
///
/// `handled_by` may be omitted when the package has a single application;
/// [`IntentCatalog::add_package`](crate::IntentCatalog::add_package) fills it
/// in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentDefinition {
    /// Intent id, e.g. `"share"`.
    pub id: String,
    /// Handling application.
    pub handled_by: Option<ApplicationId>,
    /// Who may request the intent.
    pub visibility: Visibility,
    /// Capabilities the handler must hold.
    pub required_capabilities: BTreeSet<String>,
    /// Parameter filter.
    pub parameter_match: ParameterMap,
    /// Only consider the intent while its handler is running.
    pub handle_only_when_running: bool,
    /// Localized names, keyed by language.
    pub names: BTreeMap<String, String>,
    /// Localized descriptions, keyed by language.
    pub descriptions: BTreeMap<String, String>,
    /// Icon file name.
    pub icon: Option<String>,
    /// Free-form categories.
    pub categories: Vec<String>,
}

impl IntentDefinition {
    /// Definition for `id` handled by `handler`.
    #[must_use]
    pub fn new(id: impl Into<String>, handler: ApplicationId) -> Self {
        Self {
            id: id.into(),
            handled_by: Some(handler),
            ..Self::default()
        }
    }

    /// Restrict the intent to its own application.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Require capabilities from the handler.
    #[must_use]
    pub fn requires<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Add a parameter filter entry. An empty value only requires presence.
    #[must_use]
    pub fn matching(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameter_match.insert(key.into(), value.into());
        self
    }

    /// Only route to the handler while it is running.
    #[must_use]
    pub fn only_when_running(mut self) -> Self {
        self.handle_only_when_running = true;
        self
    }
}

/// A registered intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent id.
    pub id: String,
    /// Package that registered it.
    pub package_id: String,
    /// Handling application.
    pub handling_application_id: ApplicationId,
    /// Who may request it.
    pub visibility: Visibility,
    /// Capabilities the handler must hold.
    pub required_capabilities: BTreeSet<String>,
    /// Parameter filter.
    pub parameter_match: ParameterMap,
    /// Only consider while the handler is running.
    pub handle_only_when_running: bool,
    /// Localized names.
    pub names: BTreeMap<String, String>,
    /// Localized descriptions.
    pub descriptions: BTreeMap<String, String>,
    /// Icon file name.
    pub icon: Option<String>,
    /// Categories.
    pub categories: Vec<String>,
    seq: u64,
}

impl Intent {
    pub(crate) fn from_definition(
        package_id: String,
        handler: ApplicationId,
        definition: IntentDefinition,
        seq: u64,
    ) -> Self {
        Self {
            id: definition.id,
            package_id,
            handling_application_id: handler,
            visibility: definition.visibility,
            required_capabilities: definition.required_capabilities,
            parameter_match: definition.parameter_match,
            handle_only_when_running: definition.handle_only_when_running,
            names: definition.names,
            descriptions: definition.descriptions,
            icon: definition.icon,
            categories: definition.categories,
            seq,
        }
    }

    /// Position in registration order.
    #[must_use]
    pub fn registration_order(&self) -> u64 {
        self.seq
    }

    /// Whether `requester` may see this intent.
    #[must_use]
    pub fn visible_to(&self, requester: &ApplicationId) -> bool {
        match self.visibility {
            Visibility::Public => true,
            Visibility::Private => {
                requester == &self.handling_application_id || requester.is_system_ui()
            },
        }
    }

    /// Match `parameters` against the filter.
    ///
    /// A filter entry is satisfied when the request carries the key and its
    /// value equals the filter value, equals any element of a list filter,
    /// or the filter value is empty.
    #[must_use]
    pub fn match_parameters(&self, parameters: &ParameterMap) -> Option<MatchKind> {
        let mut kind = if self.parameter_match.is_empty() {
            MatchKind::Wildcard
        } else {
            MatchKind::Exact
        };
        for (key, filter) in &self.parameter_match {
            let actual = parameters.get(key)?;
            if filter.is_empty() {
                kind = MatchKind::Wildcard;
                continue;
            }
            let satisfied = match filter {
                Value::List(options) => options.contains(actual),
                _ => filter == actual,
            };
            if !satisfied {
                return None;
            }
        }
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(definition: IntentDefinition) -> Intent {
        let handler = definition.handled_by.clone().unwrap();
        Intent::from_definition("pkg".to_owned(), handler, definition, 0)
    }

    fn params(entries: &[(&str, Value)]) -> ParameterMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn viewer() -> ApplicationId {
        ApplicationId::new("com.example.viewer").unwrap()
    }

    #[test]
    fn test_exact_and_wildcard() {
        let exact = intent(IntentDefinition::new("share", viewer()).matching("type", "image"));
        let presence = intent(IntentDefinition::new("share", viewer()).matching("type", ""));
        let open = intent(IntentDefinition::new("share", viewer()));

        let request = params(&[("type", "image".into())]);
        assert_eq!(exact.match_parameters(&request), Some(MatchKind::Exact));
        assert_eq!(presence.match_parameters(&request), Some(MatchKind::Wildcard));
        assert_eq!(open.match_parameters(&request), Some(MatchKind::Wildcard));

        let text = params(&[("type", "text".into())]);
        assert_eq!(exact.match_parameters(&text), None);
        assert_eq!(presence.match_parameters(&ParameterMap::new()), None);
    }

    #[test]
    fn test_list_filter_matches_any_element() {
        let i = intent(
            IntentDefinition::new("open", viewer())
                .matching("mime", vec!["image/png", "image/jpeg"]),
        );
        assert!(
            i.match_parameters(&params(&[("mime", "image/jpeg".into())]))
                .is_some()
        );
        assert!(
            i.match_parameters(&params(&[("mime", "text/plain".into())]))
                .is_none()
        );
    }

    #[test]
    fn test_private_visibility() {
        let i = intent(IntentDefinition::new("secret", viewer()).private());
        assert!(i.visible_to(&viewer()));
        assert!(i.visible_to(&ApplicationId::system_ui()));
        assert!(!i.visible_to(&ApplicationId::new("com.example.other").unwrap()));
    }

    #[test]
    fn test_manifest_shape() {
        let definition: IntentDefinition = serde_json::from_str(
            r#"{
                "id": "play",
                "handledBy": "com.example.music",
                "visibility": "private",
                "requiredCapabilities": ["media"],
                "parameterMatch": {"kind": "audio"},
                "handleOnlyWhenRunning": true
            }"#,
        )
        .unwrap();
        assert_eq!(definition.visibility, Visibility::Private);
        assert!(definition.handle_only_when_running);
        assert!(definition.required_capabilities.contains("media"));
        assert_eq!(
            definition.handled_by.unwrap().as_str(),
            "com.example.music"
        );
    }
}
