//! Project identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{ModelError, ModelResult};

/// Name of a unit of work. Derived from the script file stem and used as
/// the key in the watch registry, the local output directory name, and the
/// remote archive folder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(pub String);

impl ProjectName {
    /// Create a project name, rejecting values that cannot serve as a
    /// directory or object-key segment.
    pub fn new(s: impl Into<String>) -> ModelResult<Self> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ModelError::invalid_project_name("empty name"));
        }
        if trimmed.contains('/') || trimmed.contains('\\') {
            return Err(ModelError::invalid_project_name(format!(
                "path separator in '{}'",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derive the project name from a script file path (`story.txt` -> `story`).
    pub fn from_script_path(path: &Path) -> ModelResult<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ModelError::invalid_project_name(path.display().to_string()))?;
        Self::new(stem)
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_script_path() {
        let name = ProjectName::from_script_path(&PathBuf::from("input/midnight_garden.txt"))
            .expect("valid stem");
        assert_eq!(name.as_str(), "midnight_garden");
    }

    #[test]
    fn test_rejects_empty_and_separators() {
        assert!(ProjectName::new("  ").is_err());
        assert!(ProjectName::new("a/b").is_err());
        assert!(ProjectName::new("a\\b").is_err());
    }

    #[test]
    fn test_trims_whitespace() {
        let name = ProjectName::new(" story ").expect("valid");
        assert_eq!(name.as_str(), "story");
    }
}
