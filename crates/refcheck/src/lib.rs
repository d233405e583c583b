//! refcheck - visual regression harness for a scene renderer
//!
//! Validates a renderer's scene export by re-rendering each exported scene
//! with an independent reference renderer and keeping the result as a golden
//! image. Later runs capture the renderer's own output and score it against
//! that golden image with SSIM.
//!
//! # Modes
//!
//! - **Generate**: `export → reference render → convert → publish`
//! - **Test**: `render → normalize → compare`
//!
//! Every batch works inside a fresh run directory; golden artifacts live next
//! to the case files they belong to.

pub mod case;
pub mod compare;
pub mod config;
pub mod error;
pub mod generate;
pub mod orchestrator;
pub mod prereq;
pub mod process;
pub mod regress;
pub mod report;
pub mod run_context;
pub mod stage;

#[cfg(test)]
mod testing;

pub use case::{GoldenArtifact, TestCase};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use orchestrator::Orchestrator;
pub use process::{CommandSpec, Invocation, Invoke, ProcessInvoker};
pub use report::{BatchReport, CaseResult, Mode};
pub use stage::Stage;
