//! Per-invocation working directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::case::TestCase;
use crate::error::{HarnessError, Result};

/// Attempts at finding a free directory name for one timestamp
const MAX_SUFFIX: u32 = 1000;

/// Isolated working directory holding every artifact of one batch.
///
/// Never reused and never cleaned up, so a run can be inspected afterwards.
#[derive(Debug, Clone)]
pub struct RunContext {
    dir: PathBuf,
}

impl RunContext {
    /// Create `run_<timestamp>` under `run_root`.
    ///
    /// The directory is created exclusively; if another invocation already
    /// claimed the name, a numeric suffix is appended.
    pub fn create(run_root: &Path) -> Result<Self> {
        fs::create_dir_all(run_root).map_err(|e| {
            HarnessError::io(format!("failed to create {}", run_root.display()), e)
        })?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let base = format!("run_{}", stamp);

        for attempt in 0..MAX_SUFFIX {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let dir = run_root.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(Self { dir }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(HarnessError::io(
                        format!("failed to create {}", dir.display()),
                        e,
                    ))
                }
            }
        }

        Err(HarnessError::io(
            format!("failed to create a run directory under {}", run_root.display()),
            io::Error::new(io::ErrorKind::AlreadyExists, "all candidate names taken"),
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a file inside the run directory
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Copy a case description into the run directory so collaborators never
    /// touch the canonical file
    pub fn stage_case(&self, case: &TestCase) -> Result<PathBuf> {
        let copy = self.path(&case.file_name());
        fs::copy(&case.path, &copy).map_err(|e| {
            HarnessError::io(
                format!(
                    "failed to copy {} to {}",
                    case.path.display(),
                    copy.display()
                ),
                e,
            )
        })?;
        Ok(copy)
    }
}
