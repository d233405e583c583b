//! refcheck CLI
//!
//! Usage:
//!   refcheck generate               # Build golden artifacts for every case
//!   refcheck test                   # Score renders against golden artifacts
//!   refcheck test --filter cornell  # Only cases matching "cornell"
//!   refcheck list                   # Show cases and golden status
//!   refcheck compare a.png b.png    # SSIM of two images
//!   refcheck config                 # Print the effective configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refcheck::{compare, prereq, GoldenArtifact, HarnessConfig, Mode, Orchestrator};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "refcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Visual regression harness for renderer scene export", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./refcheck.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the case descriptions
    #[arg(long, global = true)]
    case_dir: Option<PathBuf>,

    /// Directory run directories are created under
    #[arg(long, global = true)]
    run_root: Option<PathBuf>,

    /// Primary renderer executable
    #[arg(long, global = true)]
    renderer: Option<PathBuf>,

    /// Reference renderer executable
    #[arg(long, global = true)]
    reference_renderer: Option<PathBuf>,

    /// Image converter executable
    #[arg(long, global = true)]
    converter: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build golden artifacts with the reference renderer
    Generate {
        /// Only run cases whose name contains this
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Render every case and score it against its golden image
    Test {
        /// Only run cases whose name contains this
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List discovered cases and whether a golden image exists
    List {
        /// Only list cases whose name contains this
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Print the SSIM of two image files
    Compare {
        /// Image whose resolution is kept
        first: PathBuf,

        /// Image resampled to the first one's resolution
        second: PathBuf,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // Help and version go to stdout and are not failures
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Compare {
            ref first,
            ref second,
        } => cmd_compare(first, second),
        Commands::Generate { ref filter } => {
            cmd_batch(load_config(&cli)?, Mode::Generate, filter.as_deref())
        }
        Commands::Test { ref filter } => cmd_batch(load_config(&cli)?, Mode::Test, filter.as_deref()),
        Commands::List { ref filter } => cmd_list(load_config(&cli)?, filter.as_deref()),
        Commands::Config => cmd_config(load_config(&cli)?),
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let mut config = HarnessConfig::load(cli.config.as_deref(), &cwd)?;

    let overrides = [
        (&cli.renderer, &mut config.primary_renderer),
        (&cli.reference_renderer, &mut config.reference_renderer),
        (&cli.converter, &mut config.converter),
        (&cli.case_dir, &mut config.case_dir),
        (&cli.run_root, &mut config.run_root),
    ];
    for (flag, path) in overrides {
        if let Some(value) = flag {
            *path = cwd.join(value);
        }
    }

    Ok(config)
}

fn cmd_batch(config: HarnessConfig, mode: Mode, filter: Option<&str>) -> Result<bool> {
    println!("╔══════════════════════════════════════════╗");
    println!("║        REFCHECK VISUAL REGRESSION        ║");
    println!("╚══════════════════════════════════════════╝\n");

    let mut orchestrator = Orchestrator::new(config);
    if let Some(pattern) = filter {
        println!("Running tests matching: {}\n", pattern);
        orchestrator.filter(pattern);
    }

    info!("Mode: {}", mode);
    let report = match orchestrator.run(mode) {
        Ok(report) => report,
        Err(err) => {
            if err.is_prerequisite() {
                println!("Prerequisites:\n");
                prereq::print_checks(&orchestrator.prerequisites(mode));
                println!();
            }
            return Err(anyhow::Error::new(err).context(format!("{} aborted", mode)));
        }
    };

    println!("\n{}\n", report);
    println!("Run directory: {}", report.run_dir.display());
    println!("Duration: {:.1}s", report.duration.as_secs_f64());

    if report.all_passed() {
        match mode {
            Mode::Generate => println!("\nAll references generated!"),
            Mode::Test => println!("\nAll tests passed!"),
        }
    } else {
        println!("\n{} of {} case(s) failed:", report.failed(), report.total());
        for (case, reason) in report.failures() {
            println!("  {}: {}", case, reason);
        }
    }
    Ok(report.all_passed())
}

fn cmd_list(config: HarnessConfig, filter: Option<&str>) -> Result<bool> {
    let mut orchestrator = Orchestrator::new(config);
    if let Some(pattern) = filter {
        orchestrator.filter(pattern);
    }

    let config = orchestrator.config();
    let cases = orchestrator
        .cases()
        .with_context(|| format!("Failed to list {}", config.case_dir.display()))?;
    if cases.is_empty() {
        println!("No cases found in {}", config.case_dir.display());
        return Ok(true);
    }

    println!("Cases in {}:\n", config.case_dir.display());
    for case in &cases {
        let golden = GoldenArtifact::for_case(case, &config.naming);
        let status = if golden.exists() {
            "reference"
        } else {
            "no reference"
        };
        println!("  {:<30} {}", case.id, status);
    }
    Ok(true)
}

fn cmd_config(config: HarnessConfig) -> Result<bool> {
    print!("{}", config.to_toml()?);
    Ok(true)
}

fn cmd_compare(first: &Path, second: &Path) -> Result<bool> {
    let score = compare::compare(first, second).with_context(|| {
        format!("Failed to compare {} and {}", first.display(), second.display())
    })?;
    println!("SSIM: {:.4}", score);
    Ok(true)
}
