//! Registry of intents advertised by installed packages.

use appman_core::{ApplicationId, ParameterMap};
use tracing::debug;

use crate::error::{IntentError, IntentResult};
use crate::intent::{Intent, IntentDefinition, MatchKind};

/// Registered intents in registration order.
#[derive(Debug, Default)]
pub struct IntentCatalog {
    intents: Vec<Intent>,
    next_seq: u64,
}

impl IntentCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one intent for `package_id`.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::InvalidIntent`] for an empty id or a missing
    /// handler, and [`IntentError::DuplicateIntent`] if the package already
    /// registered the same id with an equal parameter filter.
    pub fn add(
        &mut self,
        package_id: impl Into<String>,
        definition: IntentDefinition,
    ) -> IntentResult<Intent> {
        let package_id = package_id.into();
        if definition.id.is_empty() {
            return Err(IntentError::InvalidIntent("empty intent id".to_owned()));
        }
        let Some(handler) = definition.handled_by.clone() else {
            return Err(IntentError::InvalidIntent(format!(
                "intent '{}' has no handling application",
                definition.id
            )));
        };
        if self.intents.iter().any(|i| {
            i.id == definition.id
                && i.package_id == package_id
                && i.parameter_match == definition.parameter_match
        }) {
            return Err(IntentError::DuplicateIntent {
                intent_id: definition.id,
                package_id,
            });
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let intent = Intent::from_definition(package_id, handler, definition, seq);
        debug!(
            intent_id = %intent.id,
            package_id = %intent.package_id,
            app_id = %intent.handling_application_id,
            "Intent registered"
        );
        self.intents.push(intent.clone());
        Ok(intent)
    }

    /// Register every intent of a package. Definitions without a handler
    /// are handled by `default_handler`. Nothing is registered if any
    /// definition is rejected.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by [`add`](Self::add).
    pub fn add_package(
        &mut self,
        package_id: &str,
        default_handler: &ApplicationId,
        definitions: Vec<IntentDefinition>,
    ) -> IntentResult<Vec<Intent>> {
        let mut added = Vec::with_capacity(definitions.len());
        for mut definition in definitions {
            if definition.handled_by.is_none() {
                definition.handled_by = Some(default_handler.clone());
            }
            match self.add(package_id, definition) {
                Ok(intent) => added.push(intent),
                Err(e) => {
                    for intent in &added {
                        self.remove(intent);
                    }
                    return Err(e);
                },
            }
        }
        Ok(added)
    }

    /// Remove one intent. Returns whether it was registered.
    pub fn remove(&mut self, intent: &Intent) -> bool {
        let before = self.intents.len();
        self.intents
            .retain(|i| i.registration_order() != intent.registration_order());
        before != self.intents.len()
    }

    /// Remove every intent of a package. Returns how many were removed.
    pub fn remove_package(&mut self, package_id: &str) -> usize {
        let before = self.intents.len();
        self.intents.retain(|i| i.package_id != package_id);
        let removed = before.saturating_sub(self.intents.len());
        if removed > 0 {
            debug!(package_id, removed, "Package intents removed");
        }
        removed
    }

    /// Every intent with `intent_id` whose filter accepts `parameters`.
    /// Exact matches come before wildcard matches, each group in
    /// registration order.
    #[must_use]
    pub fn lookup(&self, intent_id: &str, parameters: &ParameterMap) -> Vec<Intent> {
        let mut exact = Vec::new();
        let mut wildcard = Vec::new();
        for intent in self.intents.iter().filter(|i| i.id == intent_id) {
            match intent.match_parameters(parameters) {
                Some(MatchKind::Exact) => exact.push(intent.clone()),
                Some(MatchKind::Wildcard) => wildcard.push(intent.clone()),
                None => {},
            }
        }
        exact.extend(wildcard);
        exact
    }

    /// First intent with `intent_id` handled by `application_id` whose
    /// filter accepts `parameters`.
    #[must_use]
    pub fn find(
        &self,
        intent_id: &str,
        application_id: &ApplicationId,
        parameters: &ParameterMap,
    ) -> Option<Intent> {
        self.intents
            .iter()
            .find(|i| {
                i.id == intent_id
                    && &i.handling_application_id == application_id
                    && i.match_parameters(parameters).is_some()
            })
            .cloned()
    }

    /// All intents in registration order.
    #[must_use]
    pub fn all(&self) -> &[Intent] {
        &self.intents
    }

    /// Intents registered by a package.
    #[must_use]
    pub fn intents_for_package(&self, package_id: &str) -> Vec<&Intent> {
        self.intents
            .iter()
            .filter(|i| i.package_id == package_id)
            .collect()
    }

    /// Number of registered intents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> ApplicationId {
        ApplicationId::new(id).unwrap()
    }

    fn params(key: &str, value: &str) -> ParameterMap {
        ParameterMap::from([(key.to_owned(), value.into())])
    }

    #[test]
    fn test_duplicate_rejected_without_mutation() {
        let mut catalog = IntentCatalog::new();
        let def = IntentDefinition::new("share", app("com.example.a")).matching("type", "image");
        catalog.add("pkg.a", def.clone()).unwrap();

        let err = catalog.add("pkg.a", def.clone()).unwrap_err();
        assert!(matches!(err, IntentError::DuplicateIntent { .. }));
        assert_eq!(catalog.len(), 1);

        // Same id, other package or other filter is fine.
        catalog.add("pkg.b", def).unwrap();
        catalog
            .add(
                "pkg.a",
                IntentDefinition::new("share", app("com.example.a")).matching("type", "text"),
            )
            .unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_invalid_definitions() {
        let mut catalog = IntentCatalog::new();
        assert!(matches!(
            catalog.add("pkg", IntentDefinition::new("", app("com.example.a"))),
            Err(IntentError::InvalidIntent(_))
        ));
        assert!(matches!(
            catalog.add("pkg", IntentDefinition::default()),
            Err(IntentError::InvalidIntent(_))
        ));
    }

    #[test]
    fn test_lookup_order() {
        let mut catalog = IntentCatalog::new();
        let wildcard = catalog
            .add(
                "pkg.any",
                IntentDefinition::new("share", app("com.example.any")).matching("type", ""),
            )
            .unwrap();
        let image = catalog
            .add(
                "pkg.image",
                IntentDefinition::new("share", app("com.example.image"))
                    .matching("type", "image"),
            )
            .unwrap();
        let open = catalog
            .add("pkg.open", IntentDefinition::new("share", app("com.example.open")))
            .unwrap();

        let found = catalog.lookup("share", &params("type", "image"));
        assert_eq!(found, vec![image, wildcard, open]);
        assert!(catalog.lookup("play", &params("type", "image")).is_empty());
    }

    #[test]
    fn test_disjoint_filters() {
        let mut catalog = IntentCatalog::new();
        catalog
            .add(
                "pkg.gallery",
                IntentDefinition::new("share", app("com.example.gallery"))
                    .matching("type", "image"),
            )
            .unwrap();
        catalog
            .add(
                "pkg.notes",
                IntentDefinition::new("share", app("com.example.notes")).matching("type", "text"),
            )
            .unwrap();

        let found = catalog.lookup("share", &params("type", "image"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handling_application_id, app("com.example.gallery"));
        assert!(
            catalog
                .find("share", &app("com.example.notes"), &params("type", "image"))
                .is_none()
        );
    }

    #[test]
    fn test_remove_package() {
        let mut catalog = IntentCatalog::new();
        let handler = app("com.example.a");
        catalog
            .add_package(
                "pkg.a",
                &handler,
                vec![
                    IntentDefinition {
                        id: "one".to_owned(),
                        ..IntentDefinition::default()
                    },
                    IntentDefinition {
                        id: "two".to_owned(),
                        ..IntentDefinition::default()
                    },
                ],
            )
            .unwrap();
        assert_eq!(catalog.intents_for_package("pkg.a").len(), 2);
        assert_eq!(catalog.all()[0].handling_application_id, handler);

        assert_eq!(catalog.remove_package("pkg.a"), 2);
        assert_eq!(catalog.remove_package("pkg.a"), 0);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_add_package_is_atomic() {
        let mut catalog = IntentCatalog::new();
        let handler = app("com.example.a");
        let def = IntentDefinition::new("one", handler.clone());
        let err = catalog
            .add_package("pkg.a", &handler, vec![def.clone(), def])
            .unwrap_err();
        assert!(matches!(err, IntentError::DuplicateIntent { .. }));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_remove_single() {
        let mut catalog = IntentCatalog::new();
        let a = catalog
            .add("pkg", IntentDefinition::new("one", app("com.example.a")))
            .unwrap();
        let b = catalog
            .add("pkg", IntentDefinition::new("two", app("com.example.a")))
            .unwrap();
        assert!(catalog.remove(&a));
        assert!(!catalog.remove(&a));
        assert_eq!(catalog.all(), &[b]);
    }
}
