//! Test registry definition files
//!
//! Definitions are an ordered `[[tests]]` list, in TOML or YAML:
//!
//! ```toml
//! [[tests]]
//! id = "wlroots.mouse_click"
//! feature = "Click the mouse"
//! compositors = ["sway", "hyprland"]
//! failing_compositors = ["hyprland"]
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::common::{Error, Result};

/// The whole definitions file
#[derive(Deserialize, Debug, Default)]
pub struct DefinitionsFile {
    #[serde(default)]
    pub tests: Vec<TestDefinitionConfig>,
}

/// One test entry
#[derive(Deserialize, Debug, Clone)]
pub struct TestDefinitionConfig {
    /// Identifier of the test implementation
    #[serde(alias = "implementation")]
    pub id: String,
    /// Compositor tags the test applies to
    pub compositors: Vec<String>,
    /// What the test checks
    pub description: Option<String>,
    /// Capability name shown by `tests-list`
    pub feature: Option<String>,
    /// Compositors where the test is known to fail (advisory only)
    #[serde(default)]
    pub failing_compositors: Vec<String>,
}

impl DefinitionsFile {
    /// Load definitions, choosing the format by file extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("test definitions: {}", e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("test definitions: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_with_implementation_alias() {
        let file = DefinitionsFile::from_toml(
            r#"
            [[tests]]
            implementation = "wlroots.mouse_move_absolute"
            feature = "Move the mouse to an absolute position"
            compositors = ["sway", "hyprland"]
            failing_compositors = ["hyprland"]

            [[tests]]
            id = "monitor.keyboard_typing"
            compositors = ["gnome"]
            "#,
        )
        .unwrap();

        assert_eq!(file.tests.len(), 2);
        assert_eq!(file.tests[0].id, "wlroots.mouse_move_absolute");
        assert_eq!(file.tests[0].failing_compositors, vec!["hyprland"]);
        assert!(file.tests[1].feature.is_none());
        assert!(file.tests[1].failing_compositors.is_empty());
    }

    #[test]
    fn test_yaml() {
        let file = DefinitionsFile::from_yaml(
            r#"
tests:
  - id: wlroots.mouse_click
    compositors: [sway]
    description: Click every button
"#,
        )
        .unwrap();
        assert_eq!(file.tests[0].compositors, vec!["sway"]);
        assert_eq!(file.tests[0].description.as_deref(), Some("Click every button"));
    }

    #[test]
    fn test_missing_compositors_is_a_parse_error() {
        let err = DefinitionsFile::from_toml("[[tests]]\nid = \"a\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tests.yml");
        std::fs::write(&path, "tests:\n  - id: a\n    compositors: [kde]\n").unwrap();
        assert_eq!(DefinitionsFile::load(&path).unwrap().tests[0].id, "a");
    }
}
