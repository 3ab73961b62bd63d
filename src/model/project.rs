//! Saved analysis projects: a JSON bundle of calibration geometry plus
//! optional pattern data and an optional image reference.
//!
//! The image path, when present, is resolved relative to the project file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::calibration::Geometry;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project file not readable: {0}")]
    Io(#[from] std::io::Error),
    #[error("project file is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPattern {
    #[serde(default)]
    pub filename: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub calibration: Option<Geometry>,
    /// Image file path, relative to the project file.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub pattern: Option<ProjectPattern>,
}

impl ProjectFile {
    /// Read and parse a project file.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError`] for unreadable or malformed files.
    pub fn read(path: &Path) -> Result<Self, ProjectError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve the project's image reference against the project location.
    #[must_use]
    pub fn image_path(&self, project_path: &Path) -> Option<PathBuf> {
        let image = self.image.as_ref()?;
        let base = project_path.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(image))
    }
}

#[cfg(test)]
#[path = "project_test.rs"]
mod tests;
