//! Test cases and their golden artifacts

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::NamingConfig;
use crate::error::{HarnessError, Result};

/// One scene description exercised through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Base name of the description file, without extension
    pub id: String,
    /// Canonical location of the description file
    pub path: PathBuf,
}

impl TestCase {
    pub fn new(id: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: id.into(),
            path,
        }
    }

    /// File name of the description, used for the copy inside a run directory
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Directory the description lives in; golden artifacts are kept here too
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Persisted reference outputs for one case, stored beside its description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenArtifact {
    /// `<id>_ref.<image_ext>`
    pub image: PathBuf,
    /// `<id>.<scene_ext>`
    pub scene: PathBuf,
}

impl GoldenArtifact {
    /// Golden artifact locations for `case`; the files may not exist yet
    pub fn for_case(case: &TestCase, naming: &NamingConfig) -> Self {
        let dir = case.dir();
        Self {
            image: dir.join(naming.reference_image_file(case)),
            scene: dir.join(naming.scene_file(case)),
        }
    }

    /// Whether a reference image has been generated
    pub fn exists(&self) -> bool {
        self.image.is_file()
    }
}

/// Find case descriptions directly inside `dir`, sorted by identifier.
///
/// Subdirectories are not searched.
pub fn discover_cases(dir: &Path, extension: &str) -> Result<Vec<TestCase>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| HarnessError::io(format!("failed to read {}", dir.display()), e))?;

    let mut cases = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| HarnessError::io(format!("failed to read {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Exact match: `scene.cfg` and `scene.CFG` would otherwise share an id
        let matches_extension = path
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false);
        if !matches_extension {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            cases.push(TestCase::new(stem.to_string_lossy(), path.clone()));
        }
    }

    cases.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(cases)
}
