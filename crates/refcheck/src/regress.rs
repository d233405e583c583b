//! Regression testing
//!
//! Re-renders a case with the primary renderer and scores the capture against
//! the case's golden image. The capture is the authoritative side of the
//! comparison: the golden image is resampled to the capture's resolution.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::case::{GoldenArtifact, TestCase};
use crate::compare;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::process::{CommandSpec, Invoke};
use crate::run_context::RunContext;
use crate::stage::{self, Stage};

/// Directive that makes the primary renderer capture a test screenshot
pub const TEST_CAPTURE_DIRECTIVE: &str = "-test";

#[derive(Debug, Clone, PartialEq)]
enum TestState {
    Render,
    Normalize { capture: PathBuf },
    Compare { image: PathBuf },
    Done(f64),
}

impl TestState {
    fn stage(&self) -> Option<Stage> {
        match self {
            TestState::Render => Some(Stage::Render),
            TestState::Normalize { .. } => Some(Stage::Normalize),
            TestState::Compare { .. } => Some(Stage::Compare),
            TestState::Done(_) => None,
        }
    }
}

/// Test-mode case runner
pub struct RegressionTester<'a, I> {
    config: &'a HarnessConfig,
    invoker: &'a I,
    run: &'a RunContext,
}

impl<'a, I: Invoke> RegressionTester<'a, I> {
    pub fn new(config: &'a HarnessConfig, invoker: &'a I, run: &'a RunContext) -> Self {
        Self {
            config,
            invoker,
            run,
        }
    }

    /// Score `case` against its golden image.
    ///
    /// Fails with [`HarnessError::MissingReference`] before invoking anything
    /// when no golden image exists.
    pub fn test(&self, case: &TestCase) -> Result<f64> {
        let golden = GoldenArtifact::for_case(case, &self.config.naming);
        if !golden.exists() {
            return Err(HarnessError::MissingReference {
                case: case.id.clone(),
                path: golden.image,
            });
        }

        let mut state = TestState::Render;
        loop {
            if let Some(stage) = state.stage() {
                info!("    {} {}", stage.progress(), describe(stage));
            }
            state = match state {
                TestState::Render => TestState::Normalize {
                    capture: self.render(case)?,
                },
                TestState::Normalize { capture } => TestState::Compare {
                    image: self.normalize(case, &capture)?,
                },
                TestState::Compare { image } => {
                    TestState::Done(self.compare(case, &image, &golden)?)
                }
                TestState::Done(score) => return Ok(score),
            };
        }
    }

    /// Capture the case with the primary renderer
    pub fn render(&self, case: &TestCase) -> Result<PathBuf> {
        let copy = self
            .run
            .stage_case(case)
            .map_err(|e| HarnessError::stage(Stage::Render, e.to_string()))?;
        let capture = self.run.path(&self.config.naming.capture_file(case));

        let spec = CommandSpec::new(
            &self.config.primary_renderer,
            self.run.dir(),
            self.config.timeouts.default_timeout(),
        )
        .arg(TEST_CAPTURE_DIRECTIVE)
        .path_arg(&copy);

        stage::run_external(self.invoker, Stage::Render, &spec, &capture)?;
        Ok(capture)
    }

    /// Re-encode the renderer's native screenshot in the comparison format
    pub fn normalize(&self, case: &TestCase, capture: &Path) -> Result<PathBuf> {
        let normalized = self
            .run
            .path(&self.config.naming.normalized_capture_file(case));

        let decoded = image::open(capture).map_err(|e| {
            HarnessError::stage(
                Stage::Normalize,
                format!("failed to decode {}: {}", capture.display(), e),
            )
        })?;
        decoded.save(&normalized).map_err(|e| {
            HarnessError::stage(
                Stage::Normalize,
                format!("failed to write {}: {}", normalized.display(), e),
            )
        })?;
        stage::require_artifact(Stage::Normalize, &normalized)?;
        Ok(normalized)
    }

    /// Score the normalized capture against the golden image.
    ///
    /// A copy of the golden image is left in the run directory for side-by-side
    /// inspection; failing to make it does not affect the score.
    pub fn compare(&self, case: &TestCase, image: &Path, golden: &GoldenArtifact) -> Result<f64> {
        let side_by_side = self.run.path(&self.config.naming.reference_image_file(case));
        if let Err(e) = fs::copy(&golden.image, &side_by_side) {
            warn!(
                "    could not copy {} for inspection: {}",
                golden.image.display(),
                e
            );
        }

        let score = compare::compare(image, &golden.image)?;
        info!("    SSIM: {:.4}", score);
        Ok(score)
    }
}

fn describe(stage: Stage) -> &'static str {
    match stage {
        Stage::Render => "Capturing render...",
        Stage::Normalize => "Normalizing capture...",
        Stage::Compare => "Calculating SSIM...",
        _ => "",
    }
}
