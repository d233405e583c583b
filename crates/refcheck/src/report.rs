//! Batch results and the summary table

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::case::GoldenArtifact;
use crate::error::{HarnessError, Result};
use crate::stage::Stage;

const NAME_WIDTH: usize = 30;
const VALUE_WIDTH: usize = 10;
const RULE_WIDTH: usize = NAME_WIDTH + VALUE_WIDTH + 2;

/// Which pipeline a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Produce golden artifacts
    Generate,
    /// Score renders against golden artifacts
    Test,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Generate => "generate",
            Mode::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one case
#[derive(Debug, Clone, PartialEq)]
pub enum CaseResult {
    /// Test mode: similarity against the golden image
    Scored(f64),
    /// Generate mode: golden artifact published
    Generated(GoldenArtifact),
    /// Any stage failed; the case has no result
    Failed {
        stage: Option<Stage>,
        reason: String,
    },
}

impl CaseResult {
    pub fn failed(err: &HarnessError) -> Self {
        CaseResult::Failed {
            stage: err.failed_stage(),
            reason: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, CaseResult::Failed { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            CaseResult::Scored(score) => Some(*score),
            _ => None,
        }
    }

    fn value(&self) -> String {
        match self {
            CaseResult::Scored(score) => format!("{:.4}", score),
            CaseResult::Generated(_) => "OK".to_string(),
            CaseResult::Failed { .. } => "FAILED".to_string(),
        }
    }
}

/// Results of one batch, keyed and ordered by case identifier
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub mode: Mode,
    /// Run directory holding this batch's artifacts
    pub run_dir: PathBuf,
    pub results: BTreeMap<String, CaseResult>,
    pub duration: Duration,
}

impl BatchReport {
    pub fn new(mode: Mode, run_dir: PathBuf) -> Self {
        Self {
            mode,
            run_dir,
            results: BTreeMap::new(),
            duration: Duration::ZERO,
        }
    }

    /// Record the result of one case.
    ///
    /// Each identifier is recorded at most once; a second result for the same
    /// case is rejected so it can never hide the first.
    pub fn record(&mut self, case: impl Into<String>, result: CaseResult) -> Result<()> {
        match self.results.entry(case.into()) {
            Entry::Vacant(slot) => {
                slot.insert(result);
                Ok(())
            }
            Entry::Occupied(slot) => Err(HarnessError::DuplicateCase {
                case: slot.key().clone(),
            }),
        }
    }

    /// Count of successful cases
    pub fn passed(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Count of failed cases
    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Mean score over the cases that produced one
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.results.values().filter_map(CaseResult::score).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// True only when at least one case ran and none failed
    pub fn all_passed(&self) -> bool {
        self.total() > 0 && self.failed() == 0
    }

    /// Failed cases with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().filter_map(|(name, result)| match result {
            CaseResult::Failed { reason, .. } => Some((name.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = match self.mode {
            Mode::Generate => "Reference",
            Mode::Test => "SSIM",
        };
        writeln!(f, "{:<NAME_WIDTH$} {:>VALUE_WIDTH$}", "Test", header)?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;

        for (name, result) in &self.results {
            write!(f, "{:<NAME_WIDTH$} {:>VALUE_WIDTH$}", name, result.value())?;
            if let CaseResult::Failed { reason, .. } = result {
                write!(f, "  {}", reason)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        if let Some(mean) = self.mean_score() {
            writeln!(f, "{:<NAME_WIDTH$} {:>VALUE_WIDTH$.4}", "Average", mean)?;
        }
        write!(
            f,
            "{:<NAME_WIDTH$} {:>VALUE_WIDTH$}/{}",
            "Tests passed",
            self.passed(),
            self.total()
        )
    }
}
