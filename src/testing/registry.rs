//! Test registry and compositor matching

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::common::{Error, Result};

use super::config::TestDefinitionConfig;
use super::CapabilityTest;

/// A validated definition bound to its implementation
#[derive(Clone)]
pub struct TestDefinition {
    pub id: String,
    /// Compositor tags in declaration order, without duplicates
    pub compositors: Vec<String>,
    pub description: Option<String>,
    pub feature: Option<String>,
    pub failing_compositors: Vec<String>,
    pub test: Arc<dyn CapabilityTest>,
}

impl TestDefinition {
    pub fn applies_to(&self, tag: &str) -> bool {
        self.compositors.iter().any(|c| c == tag)
    }

    /// Whether the definitions file marks the test as failing on `tag`
    pub fn known_failing(&self, tag: &str) -> bool {
        self.failing_compositors.iter().any(|c| c == tag)
    }
}

impl std::fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDefinition")
            .field("id", &self.id)
            .field("compositors", &self.compositors)
            .finish_non_exhaustive()
    }
}

/// Which tests to run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Only tests that apply to this compositor
    pub compositor: Option<String>,
    /// Also drop tests known to fail on `compositor`
    pub skip_failing: bool,
    /// Only these ids; empty means all
    pub ids: Vec<String>,
}

/// The parsed capability matrix, cross-checked against the implementations
#[derive(Debug, Default)]
pub struct TestRegistry {
    definitions: Vec<TestDefinition>,
}

impl TestRegistry {
    /// Validate `definitions` against the `discovered` implementations
    ///
    /// Every definition needs at least one compositor and exactly one
    /// implementation with its id; ids are unique.
    pub fn load(
        definitions: Vec<TestDefinitionConfig>,
        discovered: &[Arc<dyn CapabilityTest>],
    ) -> Result<Self> {
        let mut implementations: HashMap<&str, &Arc<dyn CapabilityTest>> = HashMap::new();
        for test in discovered {
            let id = test.info().id;
            if implementations.insert(id, test).is_some() {
                return Err(Error::DuplicateTest(id.to_string()));
            }
        }

        let mut seen = HashSet::new();
        let mut loaded = Vec::with_capacity(definitions.len());
        for def in definitions {
            if !seen.insert(def.id.clone()) {
                return Err(Error::DuplicateTest(def.id));
            }

            let mut compositors: Vec<String> = Vec::with_capacity(def.compositors.len());
            for tag in def.compositors {
                if !compositors.contains(&tag) {
                    compositors.push(tag);
                }
            }
            if compositors.is_empty() {
                return Err(Error::EmptyCompositors(def.id));
            }

            if let Some(stray) = def
                .failing_compositors
                .iter()
                .find(|tag| !compositors.contains(tag))
            {
                return Err(Error::Config(format!(
                    "Test '{}' lists '{}' as failing but not as a compositor",
                    def.id, stray
                )));
            }

            let test = implementations
                .get(def.id.as_str())
                .map(|t| Arc::clone(t))
                .ok_or_else(|| Error::UnregisteredTest(def.id.clone()))?;

            loaded.push(TestDefinition {
                id: def.id,
                compositors,
                description: def.description,
                feature: def.feature,
                failing_compositors: def.failing_compositors,
                test,
            });
        }

        Ok(Self {
            definitions: loaded,
        })
    }

    /// All definitions in file order
    pub fn definitions(&self) -> &[TestDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Every compositor tag mentioned, in first-seen order
    pub fn compositors(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = Vec::new();
        for tag in self.definitions.iter().flat_map(|d| &d.compositors) {
            if !tags.contains(&tag.as_str()) {
                tags.push(tag);
            }
        }
        tags
    }

    /// Definitions that apply to `tag`, in registry order
    ///
    /// An unknown tag selects nothing.
    pub fn for_compositor(&self, tag: &str) -> Vec<&TestDefinition> {
        self.for_compositor_filtered(tag, false)
    }

    /// Like [`for_compositor`](Self::for_compositor), optionally dropping
    /// tests known to fail on `tag`
    pub fn for_compositor_filtered(&self, tag: &str, skip_failing: bool) -> Vec<&TestDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.applies_to(tag))
            .filter(|d| !(skip_failing && d.known_failing(tag)))
            .collect()
    }

    /// Apply a full selection, keeping registry order
    ///
    /// Requested ids that are not in the registry are a configuration error.
    pub fn select(&self, selection: &Selection) -> Result<Vec<&TestDefinition>> {
        if let Some(unknown) = selection
            .ids
            .iter()
            .find(|id| !self.definitions.iter().any(|d| &d.id == *id))
        {
            return Err(Error::Config(format!("No test with id '{}'", unknown)));
        }

        let candidates = match &selection.compositor {
            Some(tag) => self.for_compositor_filtered(tag, selection.skip_failing),
            None => self.definitions.iter().collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|d| selection.ids.is_empty() || selection.ids.contains(&d.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureScope;
    use crate::testing::TestInfo;
    use async_trait::async_trait;

    struct Named(TestInfo);

    #[async_trait]
    impl CapabilityTest for Named {
        fn info(&self) -> &TestInfo {
            &self.0
        }

        async fn run(&self, _fixtures: &mut FixtureScope) -> Result<()> {
            Ok(())
        }
    }

    fn discovered(ids: &[&'static str]) -> Vec<Arc<dyn CapabilityTest>> {
        ids.iter()
            .map(|id| {
                Arc::new(Named(TestInfo {
                    id,
                    fixtures: &[],
                })) as Arc<dyn CapabilityTest>
            })
            .collect()
    }

    fn def(id: &str, compositors: &[&str]) -> TestDefinitionConfig {
        TestDefinitionConfig {
            id: id.to_string(),
            compositors: compositors.iter().map(|s| s.to_string()).collect(),
            description: None,
            feature: None,
            failing_compositors: Vec::new(),
        }
    }

    fn ids(defs: &[&TestDefinition]) -> Vec<String> {
        defs.iter().map(|d| d.id.clone()).collect()
    }

    #[test]
    fn test_for_compositor_keeps_registry_order() {
        let registry = TestRegistry::load(
            vec![def("a", &["sway"]), def("b", &["sway", "gnome"])],
            &discovered(&["b", "a"]),
        )
        .unwrap();

        assert_eq!(ids(&registry.for_compositor("gnome")), vec!["b"]);
        assert_eq!(ids(&registry.for_compositor("sway")), vec!["a", "b"]);
        assert!(registry.for_compositor("kde").is_empty());
        assert_eq!(registry.compositors(), vec!["sway", "gnome"]);
    }

    #[test]
    fn test_empty_compositors_rejected() {
        let err = TestRegistry::load(vec![def("a", &[])], &discovered(&["a"])).unwrap_err();
        assert!(matches!(err, Error::EmptyCompositors(_)));
        assert_eq!(err.class(), crate::common::ErrorClass::Config);
    }

    #[test]
    fn test_unregistered_test_rejected() {
        let err = TestRegistry::load(vec![def("missing", &["sway"])], &discovered(&["a"]))
            .unwrap_err();
        assert!(matches!(err, Error::UnregisteredTest(id) if id == "missing"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = TestRegistry::load(
            vec![def("a", &["sway"]), def("a", &["kde"])],
            &discovered(&["a"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateTest(_)));

        let err = TestRegistry::load(vec![def("a", &["sway"])], &discovered(&["a", "a"]))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTest(_)));
    }

    #[test]
    fn test_failing_must_be_a_listed_compositor() {
        let mut d = def("a", &["sway"]);
        d.failing_compositors = vec!["kde".into()];
        let err = TestRegistry::load(vec![d], &discovered(&["a"])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_selection() {
        let mut flaky = def("b", &["sway", "hyprland"]);
        flaky.failing_compositors = vec!["hyprland".into()];
        let registry = TestRegistry::load(
            vec![def("a", &["hyprland"]), flaky, def("c", &["hyprland", "sway"])],
            &discovered(&["a", "b", "c"]),
        )
        .unwrap();

        let all = registry.for_compositor_filtered("hyprland", false);
        assert_eq!(ids(&all), vec!["a", "b", "c"]);
        let healthy = registry.for_compositor_filtered("hyprland", true);
        assert_eq!(ids(&healthy), vec!["a", "c"]);

        let selection = Selection {
            compositor: Some("sway".into()),
            skip_failing: true,
            ids: vec!["c".into(), "b".into()],
        };
        // Registry order, not request order; b only fails on hyprland
        assert_eq!(ids(&registry.select(&selection).unwrap()), vec!["b", "c"]);

        let selection = Selection {
            ids: vec!["zzz".into()],
            ..Selection::default()
        };
        assert!(registry.select(&selection).is_err());
    }
}
