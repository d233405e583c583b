//! Batch orchestration
//!
//! Validates the environment, discovers cases, creates one run directory and
//! drives every case through the selected pipeline, strictly one after the
//! other. A failing case is recorded and the batch moves on; only a missing
//! prerequisite stops the batch, and it does so before any case runs.

use std::time::Instant;

use tracing::{error, info};

use crate::case::{discover_cases, TestCase};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::generate::ReferenceGenerator;
use crate::prereq::{self, CheckResult};
use crate::process::{Invoke, ProcessInvoker};
use crate::regress::RegressionTester;
use crate::report::{BatchReport, CaseResult, Mode};
use crate::run_context::RunContext;

/// Runs batches of cases against one configured environment
pub struct Orchestrator<I = ProcessInvoker> {
    config: HarnessConfig,
    invoker: I,
    /// Substring filter on case identifiers (None = run all)
    filter: Option<String>,
}

impl Orchestrator<ProcessInvoker> {
    /// Create an orchestrator that launches real processes
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_invoker(config, ProcessInvoker::new())
    }
}

impl<I: Invoke> Orchestrator<I> {
    /// Create with a custom invoker
    pub fn with_invoker(config: HarnessConfig, invoker: I) -> Self {
        Self {
            config,
            invoker,
            filter: None,
        }
    }

    /// Only run cases whose identifier contains `pattern`
    pub fn filter(&mut self, pattern: &str) -> &mut Self {
        self.filter = Some(pattern.to_string());
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Check every collaborator `mode` needs
    pub fn prerequisites(&self, mode: Mode) -> Vec<CheckResult> {
        prereq::check_collaborators(&self.config, mode)
    }

    /// Discover the cases this orchestrator would run, in run order
    pub fn cases(&self) -> Result<Vec<TestCase>> {
        let mut cases = discover_cases(&self.config.case_dir, &self.config.naming.case_extension)?;
        if let Some(ref pattern) = self.filter {
            cases.retain(|case| case.id.contains(pattern.as_str()));
        }
        Ok(cases)
    }

    /// Run every selected case in `mode`.
    ///
    /// Returns `Err` only for batch-level problems (missing prerequisites, no
    /// cases, unusable run root); case failures end up in the report.
    pub fn run(&self, mode: Mode) -> Result<BatchReport> {
        let start = Instant::now();

        if let Some(err) = prereq::first_failure(&self.prerequisites(mode)) {
            return Err(err);
        }

        let cases = self.cases()?;
        if cases.is_empty() {
            return Err(HarnessError::NoCases {
                dir: self.config.case_dir.clone(),
                extension: self.config.naming.case_extension.clone(),
                filter: self.filter.clone(),
            });
        }
        info!("Found {} test(s)", cases.len());

        let run = RunContext::create(&self.config.run_root)?;
        info!("Output directory: {}", run.dir().display());

        let mut report = BatchReport::new(mode, run.dir().to_path_buf());
        for case in &cases {
            let result = self.run_case(mode, case, &run);
            report.record(case.id.clone(), result)?;
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    /// Run one case, converting any failure into [`CaseResult::Failed`]
    pub fn run_case(&self, mode: Mode, case: &TestCase, run: &RunContext) -> CaseResult {
        info!("  {}: {}", mode_verb(mode), case.id);

        let outcome = match mode {
            Mode::Generate => ReferenceGenerator::new(&self.config, &self.invoker, run)
                .generate(case)
                .map(CaseResult::Generated),
            Mode::Test => RegressionTester::new(&self.config, &self.invoker, run)
                .test(case)
                .map(CaseResult::Scored),
        };

        match outcome {
            Ok(result) => result,
            Err(err) => {
                error!("    ERROR: {}", err);
                CaseResult::failed(&err)
            }
        }
    }
}

fn mode_verb(mode: Mode) -> &'static str {
    match mode {
        Mode::Generate => "Generating",
        Mode::Test => "Testing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::GoldenArtifact;
    use crate::process::Invocation;
    use crate::stage::Stage;
    use crate::testing::{self, ScriptedInvoker};
    use std::fs;
    use std::path::Path;

    fn make_executable(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn environment(root: &Path) -> HarnessConfig {
        let config = testing::config_in(root);
        make_executable(&config.primary_renderer);
        make_executable(&config.reference_renderer);
        make_executable(&config.converter);
        config
    }

    #[test]
    fn test_missing_prerequisite_aborts_before_work() {
        let root = tempfile::tempdir().unwrap();
        let config = testing::config_in(root.path());
        testing::write_case(&config.case_dir, "cornell", 1);
        let invoker = ScriptedInvoker::collaborators(&config);
        let orchestrator = Orchestrator::with_invoker(config.clone(), &invoker);

        let err = orchestrator.run(Mode::Generate).unwrap_err();
        assert!(matches!(err, HarnessError::PrerequisiteMissing { .. }));
        assert!(invoker.calls().is_empty());
        assert!(!config.run_root.exists());
    }

    #[test]
    fn test_empty_case_directory_aborts() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        let orchestrator =
            Orchestrator::with_invoker(config.clone(), ScriptedInvoker::collaborators(&config));

        let err = orchestrator.run(Mode::Test).unwrap_err();
        assert!(matches!(err, HarnessError::NoCases { .. }));
    }

    #[test]
    fn test_generate_then_test_round() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        for (id, seed) in [("a_cornell", 1), ("b_sponza", 2), ("c_bunny", 3)] {
            testing::write_case(&config.case_dir, id, seed);
        }
        let orchestrator =
            Orchestrator::with_invoker(config.clone(), ScriptedInvoker::collaborators(&config));

        let generated = orchestrator.run(Mode::Generate).unwrap();
        assert!(generated.all_passed());
        assert_eq!(generated.total(), 3);

        let tested = orchestrator.run(Mode::Test).unwrap();
        assert!(tested.all_passed());
        assert_ne!(generated.run_dir, tested.run_dir);
        for result in tested.results.values() {
            assert!((result.score().unwrap() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_timeout_in_middle_case_does_not_abort_batch() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        for (id, seed) in [("case1", 1), ("case2", 2), ("case3", 3)] {
            let path = testing::write_case(&config.case_dir, id, seed);
            let golden = GoldenArtifact::for_case(&TestCase::new(id, path), &config.naming);
            testing::pattern(seed).save(&golden.image).unwrap();
        }

        let fake = config.clone();
        let invoker = ScriptedInvoker::new(move |spec| {
            let target = spec.args[1].to_string_lossy().into_owned();
            if target.ends_with("case2.cfg") {
                Invocation::failure("Timeout after 300s")
            } else {
                testing::fake_collaborator(&fake, spec)
            }
        });
        let orchestrator = Orchestrator::with_invoker(config.clone(), invoker);

        let report = orchestrator.run(Mode::Test).unwrap();
        let ids: Vec<&str> = report.results.keys().map(String::as_str).collect();
        assert_eq!(ids, ["case1", "case2", "case3"]);
        assert!(report.results["case1"].score().is_some());
        assert!(report.results["case3"].score().is_some());
        assert!(matches!(
            report.results["case2"],
            CaseResult::Failed {
                stage: Some(Stage::Render),
                ..
            }
        ));
        assert_eq!(report.passed(), 2);
        assert!((report.mean_score().unwrap() - 1.0).abs() < 1e-9);
        assert!(!report.all_passed());
        assert!(report.to_string().contains("FAILED"));
    }

    #[test]
    fn test_missing_reference_is_recorded_per_case() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        testing::write_case(&config.case_dir, "cornell", 1);
        let invoker = ScriptedInvoker::collaborators(&config);
        let orchestrator = Orchestrator::with_invoker(config.clone(), &invoker);

        let report = orchestrator.run(Mode::Test).unwrap();
        match &report.results["cornell"] {
            CaseResult::Failed { reason, .. } => assert!(reason.contains("refcheck generate")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(invoker.calls().is_empty());
    }

    #[test]
    fn test_differently_cased_extension_is_not_a_second_case() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        testing::write_case(&config.case_dir, "scene", 1);
        fs::write(config.case_dir.join("scene.CFG"), "2").unwrap();

        let fake = config.clone();
        let invoker = ScriptedInvoker::new(move |spec| {
            let target = spec.args[1].to_string_lossy().into_owned();
            if target.ends_with("scene.CFG") {
                Invocation::failure("export crashed")
            } else {
                testing::fake_collaborator(&fake, spec)
            }
        });
        let orchestrator = Orchestrator::with_invoker(config.clone(), &invoker);

        assert_eq!(orchestrator.cases().unwrap().len(), 1);
        let report = orchestrator.run(Mode::Generate).unwrap();
        assert_eq!(report.total(), 1);
        assert!(report.all_passed());
        assert!(invoker
            .calls()
            .iter()
            .all(|c| !c.display().contains("scene.CFG")));
    }

    #[test]
    fn test_filter_selects_cases() {
        let root = tempfile::tempdir().unwrap();
        let config = environment(root.path());
        for id in ["glass_sphere", "glass_cube", "metal_sphere"] {
            testing::write_case(&config.case_dir, id, 1);
        }
        let mut orchestrator =
            Orchestrator::with_invoker(config.clone(), ScriptedInvoker::collaborators(&config));
        orchestrator.filter("glass");

        let ids: Vec<String> = orchestrator.cases().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["glass_cube", "glass_sphere"]);

        orchestrator.filter("wood");
        let err = orchestrator.run(Mode::Generate).unwrap_err();
        assert!(err.to_string().contains("matching 'wood'"));
    }
}
