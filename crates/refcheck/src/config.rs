//! Harness configuration
//!
//! All collaborator paths and directories live in one [`HarnessConfig`] that is
//! handed to the orchestrator at construction. It is read from `refcheck.toml`
//! (or an explicit file) and falls back to defaults when no file exists:
//!
//! ```toml
//! primary_renderer = "bin/cl3d"
//! reference_renderer = "/opt/pbrt-v4/build/pbrt"
//! converter = "/opt/pbrt-v4/build/imgtool"
//! case_dir = "test"
//! run_root = "_temp"
//!
//! [timeouts]
//! default_secs = 300
//! render_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::case::TestCase;

/// Default configuration file name looked up in the working directory
pub const CONFIG_FILE: &str = "refcheck.toml";

/// Paths and limits for one harness environment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Renderer under test; also acts as the scene exporter
    #[serde(default = "default_primary_renderer")]
    pub primary_renderer: PathBuf,
    /// Independent renderer that produces golden images
    #[serde(default = "default_reference_renderer")]
    pub reference_renderer: PathBuf,
    /// Converts reference renders (HDR) to viewable images
    #[serde(default = "default_converter")]
    pub converter: PathBuf,
    /// Directory holding case descriptions and their golden artifacts
    #[serde(default = "default_case_dir")]
    pub case_dir: PathBuf,
    /// Directory under which per-run working directories are created
    #[serde(default = "default_run_root")]
    pub run_root: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub naming: NamingConfig,
}

fn default_primary_renderer() -> PathBuf {
    PathBuf::from("bin/cl3d")
}

fn default_reference_renderer() -> PathBuf {
    PathBuf::from("tools/pbrt")
}

fn default_converter() -> PathBuf {
    PathBuf::from("tools/imgtool")
}

fn default_case_dir() -> PathBuf {
    PathBuf::from("test")
}

fn default_run_root() -> PathBuf {
    PathBuf::from("_temp")
}

/// Per-invocation time limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Bound for export, capture and conversion
    #[serde(default = "default_timeout_secs")]
    pub default_secs: u64,
    /// Bound for full reference renders
    #[serde(default = "default_render_secs")]
    pub render_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_render_secs() -> u64 {
    600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: default_timeout_secs(),
            render_secs: default_render_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_secs)
    }
}

/// File naming shared with the collaborators
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    /// Extension of case description files
    #[serde(default = "default_case_extension")]
    pub case_extension: String,
    /// Extension of exported reference scenes
    #[serde(default = "default_scene_extension")]
    pub scene_extension: String,
    /// Extension of reference renderer output
    #[serde(default = "default_hdr_extension")]
    pub hdr_extension: String,
    /// Extension of viewable images used for comparison
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    /// Suffix the primary renderer appends to its screenshot name
    #[serde(default = "default_capture_suffix")]
    pub capture_suffix: String,
    /// Extension of the primary renderer's screenshot
    #[serde(default = "default_capture_extension")]
    pub capture_extension: String,
}

fn default_case_extension() -> String {
    "cfg".to_string()
}

fn default_scene_extension() -> String {
    "pbrt".to_string()
}

fn default_hdr_extension() -> String {
    "exr".to_string()
}

fn default_image_extension() -> String {
    "png".to_string()
}

fn default_capture_suffix() -> String {
    "_test_out".to_string()
}

fn default_capture_extension() -> String {
    "tga".to_string()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            case_extension: default_case_extension(),
            scene_extension: default_scene_extension(),
            hdr_extension: default_hdr_extension(),
            image_extension: default_image_extension(),
            capture_suffix: default_capture_suffix(),
            capture_extension: default_capture_extension(),
        }
    }
}

impl NamingConfig {
    /// `<id>.<scene_ext>`
    pub fn scene_file(&self, case: &TestCase) -> String {
        format!("{}.{}", case.id, self.scene_extension)
    }

    /// `<id>_ref.<image_ext>`
    pub fn reference_image_file(&self, case: &TestCase) -> String {
        format!("{}_ref.{}", case.id, self.image_extension)
    }

    /// `<id>_ref.<hdr_ext>`
    pub fn reference_hdr_file(&self, case: &TestCase) -> String {
        format!("{}_ref.{}", case.id, self.hdr_extension)
    }

    /// `<id><capture_suffix>.<capture_ext>`
    pub fn capture_file(&self, case: &TestCase) -> String {
        format!(
            "{}{}.{}",
            case.id, self.capture_suffix, self.capture_extension
        )
    }

    /// `<id>_render.<image_ext>`
    pub fn normalized_capture_file(&self, case: &TestCase) -> String {
        format!("{}_render.{}", case.id, self.image_extension)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            primary_renderer: default_primary_renderer(),
            reference_renderer: default_reference_renderer(),
            converter: default_converter(),
            case_dir: default_case_dir(),
            run_root: default_run_root(),
            timeouts: TimeoutConfig::default(),
            naming: NamingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from an explicit file, or `refcheck.toml` in `dir` if present.
    ///
    /// Relative paths are resolved against the directory the file lives in
    /// (or `dir` when defaults are used).
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} does not exist", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Some(dir.join(CONFIG_FILE)).filter(|p| p.exists()),
        };

        let Some(config_path) = config_path else {
            tracing::debug!("no {} in {}, using defaults", CONFIG_FILE, dir.display());
            return Ok(Self::default().resolved_against(dir));
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let base = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());
        tracing::debug!("loaded config from {}", config_path.display());
        Ok(config.resolved_against(&base))
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HarnessConfig = toml::from_str(content)?;
        if config.timeouts.default_secs == 0 || config.timeouts.render_secs == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        Ok(config)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize harness config")
    }

    /// Make every relative path absolute with respect to `base`
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for path in [
            &mut self.primary_renderer,
            &mut self.reference_renderer,
            &mut self.converter,
            &mut self.case_dir,
            &mut self.run_root,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}
