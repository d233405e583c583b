//! Collaborator availability checks
//!
//! Run before a batch does any work. Every required executable and the case
//! directory is checked, so the operator sees all problems at once rather than
//! the first one.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::report::Mode;

// ANSI color codes
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Error,
}

/// Result of a single check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub path: PathBuf,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

impl CheckResult {
    fn ok(name: &str, path: &Path, message: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn error(name: &str, path: &Path, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }

    pub fn colored_icon(&self) -> String {
        match self.status {
            CheckStatus::Ok => format!("{}✓{}", colors::GREEN, colors::RESET),
            CheckStatus::Error => format!("{}✗{}", colors::RED, colors::RESET),
        }
    }

    /// Convert a failed check into the batch-aborting error
    pub fn to_error(&self) -> Option<HarnessError> {
        match self.status {
            CheckStatus::Ok => None,
            CheckStatus::Error => Some(HarnessError::PrerequisiteMissing {
                what: self.name.clone(),
                path: self.path.clone(),
                reason: self.message.clone(),
            }),
        }
    }
}

/// Check everything `mode` needs from the environment
pub fn check_collaborators(config: &HarnessConfig, mode: Mode) -> Vec<CheckResult> {
    let mut checks = vec![check_directory("Case directory", &config.case_dir)];

    checks.push(check_executable("Renderer", &config.primary_renderer));
    if mode == Mode::Generate {
        checks.push(check_executable(
            "Reference renderer",
            &config.reference_renderer,
        ));
        checks.push(check_executable("Converter", &config.converter));
    }

    checks
}

/// First failed check as an error, if any
pub fn first_failure(checks: &[CheckResult]) -> Option<HarnessError> {
    checks.iter().find_map(CheckResult::to_error)
}

fn check_directory(name: &str, path: &Path) -> CheckResult {
    if path.is_dir() {
        CheckResult::ok(name, path, &path.display().to_string())
    } else if path.exists() {
        CheckResult::error(
            name,
            path,
            "is not a directory",
            "Point case_dir at the directory holding the case files",
        )
    } else {
        CheckResult::error(
            name,
            path,
            "not found",
            "Create it or set case_dir in refcheck.toml",
        )
    }
}

fn check_executable(name: &str, path: &Path) -> CheckResult {
    if !path.is_file() {
        return CheckResult::error(
            name,
            path,
            "not found",
            "Build it or set its path in refcheck.toml",
        );
    }
    if !is_executable(path) {
        return CheckResult::error(
            name,
            path,
            "is not executable",
            &format!("Run: chmod +x {}", path.display()),
        );
    }
    CheckResult::ok(name, path, &path.display().to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

/// Print the check list
pub fn print_checks(checks: &[CheckResult]) {
    for check in checks {
        println!("  [{}] {}: {}", check.colored_icon(), check.name, check.message);
        if !check.is_ok() {
            println!("        {}", check.path.display());
        }
        if let Some(hint) = &check.hint {
            println!("        {}→ {}{}", colors::CYAN, hint, colors::RESET);
        }
    }
}
