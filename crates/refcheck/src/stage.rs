//! Pipeline stages
//!
//! A stage is one step of a case pipeline. Stages that drive an external
//! collaborator share one success criterion: the invocation reported success
//! *and* the artifact the stage promises exists afterwards. A collaborator that
//! exits cleanly without writing its output is still a failure.

use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::process::{CommandSpec, Invoke};

/// Named stages of both case pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Generate mode: export the case as a reference scene
    Export,
    /// Generate mode: render the exported scene with the reference renderer
    ReferenceRender,
    /// Generate mode: convert the reference render to a viewable image
    Convert,
    /// Generate mode: copy the converted image and scene to the golden location
    Publish,
    /// Test mode: capture the case with the primary renderer
    Render,
    /// Test mode: convert the native screenshot to the comparison format
    Normalize,
    /// Test mode: score the capture against the golden image
    Compare,
}

impl Stage {
    /// Stages of reference generation, in order
    pub const GENERATE: [Stage; 4] = [
        Stage::Export,
        Stage::ReferenceRender,
        Stage::Convert,
        Stage::Publish,
    ];

    /// Stages of regression testing, in order
    pub const TEST: [Stage; 3] = [Stage::Render, Stage::Normalize, Stage::Compare];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Export => "export",
            Stage::ReferenceRender => "reference render",
            Stage::Convert => "convert",
            Stage::Publish => "publish",
            Stage::Render => "render",
            Stage::Normalize => "normalize",
            Stage::Compare => "compare",
        }
    }

    /// Progress label such as `[2/4]`
    pub fn progress(&self) -> String {
        let stages: &[Stage] = if Self::GENERATE.contains(self) {
            &Self::GENERATE
        } else {
            &Self::TEST
        };
        let index = stages.iter().position(|s| s == self).unwrap_or(0);
        format!("[{}/{}]", index + 1, stages.len())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run one external invocation and check the artifact it must leave behind
pub fn run_external<I: Invoke>(
    invoker: &I,
    stage: Stage,
    spec: &CommandSpec,
    required: &Path,
) -> Result<()> {
    let invocation = invoker.run(spec);
    if invocation.timed_out() {
        tracing::warn!("    {} timed out after {}s", spec.display(), spec.timeout.as_secs());
    }
    if !invocation.succeeded {
        return Err(HarnessError::stage(
            stage,
            format!(
                "{} failed: {}",
                program_name(&spec.program),
                invocation.failure_reason()
            ),
        ));
    }
    require_artifact(stage, required)
}

/// Fail the stage unless `path` exists
pub fn require_artifact(stage: Stage, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HarnessError::stage(
            stage,
            format!("expected output not found: {}", path.display()),
        ))
    }
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}
