//! Reference generation
//!
//! Drives one case through `export → reference render → convert → publish`.
//! Each step is gated on the previous one: the golden artifact is only
//! replaced after all three external stages succeeded and left their outputs,
//! so a failing run never disturbs the previous reference.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::case::{GoldenArtifact, TestCase};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::process::{CommandSpec, Invoke};
use crate::run_context::RunContext;
use crate::stage::{self, Stage};

/// Directive that makes the primary renderer export a reference scene
pub const GENERATE_REFERENCE_DIRECTIVE: &str = "-generate-ref";

/// Position in the generate pipeline, carrying the artifacts produced so far
#[derive(Debug, Clone, PartialEq, Eq)]
enum GenerateState {
    Export,
    ReferenceRender { scene: PathBuf },
    Convert { scene: PathBuf, hdr: PathBuf },
    Publish { scene: PathBuf, image: PathBuf },
    Done(GoldenArtifact),
}

impl GenerateState {
    fn stage(&self) -> Option<Stage> {
        match self {
            GenerateState::Export => Some(Stage::Export),
            GenerateState::ReferenceRender { .. } => Some(Stage::ReferenceRender),
            GenerateState::Convert { .. } => Some(Stage::Convert),
            GenerateState::Publish { .. } => Some(Stage::Publish),
            GenerateState::Done(_) => None,
        }
    }
}

/// Generate-mode case runner
pub struct ReferenceGenerator<'a, I> {
    config: &'a HarnessConfig,
    invoker: &'a I,
    run: &'a RunContext,
}

impl<'a, I: Invoke> ReferenceGenerator<'a, I> {
    pub fn new(config: &'a HarnessConfig, invoker: &'a I, run: &'a RunContext) -> Self {
        Self {
            config,
            invoker,
            run,
        }
    }

    /// Run every stage for `case` and publish its golden artifact
    pub fn generate(&self, case: &TestCase) -> Result<GoldenArtifact> {
        let mut state = GenerateState::Export;
        loop {
            state = match state {
                GenerateState::Done(golden) => return Ok(golden),
                state => self.step(case, state)?,
            };
        }
    }

    fn step(&self, case: &TestCase, state: GenerateState) -> Result<GenerateState> {
        if let Some(stage) = state.stage() {
            info!("    {} {}", stage.progress(), describe(stage));
        }

        Ok(match state {
            GenerateState::Export => GenerateState::ReferenceRender {
                scene: self.export(case)?,
            },
            GenerateState::ReferenceRender { scene } => {
                let hdr = self.reference_render(case, &scene)?;
                GenerateState::Convert { scene, hdr }
            }
            GenerateState::Convert { scene, hdr } => GenerateState::Publish {
                image: self.convert(case, &hdr)?,
                scene,
            },
            GenerateState::Publish { scene, image } => {
                GenerateState::Done(self.publish(case, &image, &scene)?)
            }
            done @ GenerateState::Done(_) => done,
        })
    }

    /// Export the case as a reference scene inside the run directory
    pub fn export(&self, case: &TestCase) -> Result<PathBuf> {
        let copy = self
            .run
            .stage_case(case)
            .map_err(|e| HarnessError::stage(Stage::Export, e.to_string()))?;
        let scene = self.run.path(&self.config.naming.scene_file(case));

        let spec = CommandSpec::new(
            &self.config.primary_renderer,
            self.run.dir(),
            self.config.timeouts.default_timeout(),
        )
        .arg(GENERATE_REFERENCE_DIRECTIVE)
        .path_arg(&copy);

        stage::run_external(self.invoker, Stage::Export, &spec, &scene)?;
        Ok(scene)
    }

    /// Render the exported scene with the reference renderer
    pub fn reference_render(&self, case: &TestCase, scene: &Path) -> Result<PathBuf> {
        let hdr = self.run.path(&self.config.naming.reference_hdr_file(case));

        let spec = CommandSpec::new(
            &self.config.reference_renderer,
            self.run.dir(),
            self.config.timeouts.render_timeout(),
        )
        .path_arg(scene)
        .arg("--outfile")
        .path_arg(&hdr);

        stage::run_external(self.invoker, Stage::ReferenceRender, &spec, &hdr)?;
        Ok(hdr)
    }

    /// Convert the reference render into the comparison image format
    pub fn convert(&self, case: &TestCase, hdr: &Path) -> Result<PathBuf> {
        let image = self.run.path(&self.config.naming.reference_image_file(case));

        let spec = CommandSpec::new(
            &self.config.converter,
            self.run.dir(),
            self.config.timeouts.default_timeout(),
        )
        .arg("convert")
        .arg("--outfile")
        .path_arg(&image)
        .path_arg(hdr);

        stage::run_external(self.invoker, Stage::Convert, &spec, &image)?;
        Ok(image)
    }

    /// Replace the golden artifact with the freshly produced image and scene.
    ///
    /// Both files are staged next to their destination first so a failed copy
    /// leaves the previous artifact intact. The scene is moved into place
    /// before the image: test mode keys on the image, so a golden image never
    /// appears next to a scene from an older generation.
    pub fn publish(&self, case: &TestCase, image: &Path, scene: &Path) -> Result<GoldenArtifact> {
        let golden = GoldenArtifact::for_case(case, &self.config.naming);
        let staged_image = staging_path(&golden.image);
        let staged_scene = staging_path(&golden.scene);

        let published = copy_file(image, &staged_image)
            .and_then(|_| copy_file(scene, &staged_scene))
            .and_then(|_| rename_file(&staged_scene, &golden.scene))
            .and_then(|_| rename_file(&staged_image, &golden.image));
        if let Err(e) = published {
            let _ = fs::remove_file(&staged_image);
            let _ = fs::remove_file(&staged_scene);
            return Err(e);
        }

        info!("    reference saved to {}", golden.image.display());
        Ok(golden)
    }
}

fn describe(stage: Stage) -> &'static str {
    match stage {
        Stage::Export => "Exporting reference scene...",
        Stage::ReferenceRender => "Rendering reference...",
        Stage::Convert => "Converting reference image...",
        Stage::Publish => "Publishing golden artifact...",
        _ => "",
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map(|_| ()).map_err(|e| {
        HarnessError::stage(
            Stage::Publish,
            format!("failed to copy {} to {}: {}", from.display(), to.display(), e),
        )
    })
}

fn rename_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        HarnessError::stage(
            Stage::Publish,
            format!("failed to move {} to {}: {}", from.display(), to.display(), e),
        )
    })
}
