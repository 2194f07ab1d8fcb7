//! CLI for inspecting npm project dependencies

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use deps_inspect::registry::build_cache;
use deps_inspect::{
    analyze_structure, locate_lockfile, read_manifest, read_project_install_tree, AnalysisConfig,
    Analyzer, DependencyRecord, ProjectReport, StructureInput, StructureReport, UpdateClass,
    MANIFEST_FILE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CACHE_FILE: &str = ".deps-inspect-cache.json";

#[derive(Parser)]
#[command(name = "deps-inspect")]
#[command(about = "Find outdated, duplicated and cyclic npm dependencies", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the project directory or its package.json
    #[arg(short = 'p', long, default_value = ".", global = true)]
    project_path: PathBuf,

    /// Path to custom configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Dependencies to ignore (can be specified multiple times)
    #[arg(long = "ignore", global = true)]
    ignore_dependencies: Vec<String>,

    /// Include devDependencies
    #[arg(long, global = true)]
    include_dev: bool,

    /// Registry base URL
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Registry cache file (default: .deps-inspect-cache.json in the project)
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    /// Keep the registry cache in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare declared dependencies with the latest registry versions
    Outdated {
        /// Exit with failure if any dependency is this far behind or further
        #[arg(long)]
        fail_on: Option<FailOn>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// List every dependency, not only outdated ones
        #[arg(long)]
        all: bool,
    },

    /// Report dependency cycles and packages installed at several versions
    Structure {
        /// Print the findings as JSON
        #[arg(long)]
        json: bool,

        /// Exit with failure when a cycle is found
        #[arg(long)]
        fail_on_cycles: bool,
    },

    /// Inspect or clear the registry cache file
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show how many registry lookups are cached
    Stats,
    /// Delete the cache file
    Clear,
}

#[derive(Clone, Copy, Debug)]
enum FailOn {
    Patch,
    Minor,
    Major,
}

impl FailOn {
    fn class(self) -> UpdateClass {
        match self {
            FailOn::Patch => UpdateClass::Patch,
            FailOn::Minor => UpdateClass::Minor,
            FailOn::Major => UpdateClass::Major,
        }
    }
}

impl std::str::FromStr for FailOn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patch" => Ok(FailOn::Patch),
            "minor" => Ok(FailOn::Minor),
            "major" => Ok(FailOn::Major),
            _ => Err(format!("Unknown update class: {} (expected patch, minor or major)", s)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Outdated { fail_on, json, all } => {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}")
            {
                spinner.set_style(style);
            }
            spinner.set_message("Querying registry...");
            spinner.enable_steady_tick(std::time::Duration::from_millis(100));

            let analyzer = Analyzer::new(config)?;
            let result = analyzer.analyze_project(&cli.project_path).await;

            spinner.finish_and_clear();
            let report = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display_summary(&report);
                println!();
                display_records(&report, all);
            }

            if let Some(threshold) = fail_on {
                let failing = failing_records(&report, threshold);
                if !failing.is_empty() {
                    eprintln!(
                        "\n{} {} dependencies at least {} behind:",
                        "Failed:".red().bold(),
                        failing.len(),
                        threshold.class().to_string().to_lowercase()
                    );
                    for record in &failing {
                        eprintln!(
                            "  - {} {} -> {}",
                            record.name,
                            record.resolved_version.as_deref().unwrap_or("?"),
                            record.latest_version.as_deref().unwrap_or("?")
                        );
                    }
                    return Ok(1);
                }
            }
            Ok(0)
        }

        Commands::Structure {
            json,
            fail_on_cycles,
        } => {
            let report = structure_report(&cli.project_path, config.include_dev)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display_structure(&report);
            }

            if fail_on_cycles && !report.cycles.is_empty() {
                return Ok(1);
            }
            Ok(0)
        }

        Commands::Cache { action } => {
            let Some(path) = config.cache.path.clone() else {
                println!("Registry cache is disabled (--no-cache)");
                return Ok(0);
            };

            match action {
                CacheAction::Stats => {
                    let cache = build_cache(&config);
                    let loaded = cache.load().await;
                    let stats = cache.stats();
                    println!("Cache file: {}", path.display().to_string().cyan());
                    if path.exists() {
                        let bytes = std::fs::metadata(&path)
                            .with_context(|| format!("Failed to inspect {}", path.display()))?
                            .len();
                        println!("Size on disk: {} bytes", bytes);
                    } else {
                        println!("Size on disk: {}", "not created yet".dimmed());
                    }
                    println!("Live entries: {}", loaded);
                    if stats.errors > 0 {
                        println!(
                            "{} the cache file could not be read and will be rebuilt",
                            "Warning:".yellow().bold()
                        );
                    }
                }
                CacheAction::Clear => {
                    if path.exists() {
                        std::fs::remove_file(&path)
                            .with_context(|| format!("Failed to delete {}", path.display()))?;
                        println!("{} Removed {}", "Success:".green().bold(), path.display());
                    } else {
                        println!("Nothing to clear at {}", path.display());
                    }
                }
            }
            Ok(0)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> Result<AnalysisConfig> {
    AnalysisConfig::from_toml_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn build_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };

    // Add ignored dependencies from CLI
    config
        .ignored_dependencies
        .extend(cli.ignore_dependencies.iter().cloned());
    config.include_dev |= cli.include_dev;
    if let Some(registry) = &cli.registry {
        config.network.registry_url = registry.clone();
    }

    if cli.no_cache {
        config.cache.path = None;
    } else if let Some(path) = &cli.cache_file {
        config.cache.path = Some(path.clone());
    } else if config.cache.path.is_none() {
        config.cache.path = Some(project_dir(&cli.project_path).join(DEFAULT_CACHE_FILE));
    }

    config.validate()?;
    Ok(config)
}

fn project_dir(project_path: &Path) -> PathBuf {
    if project_path.is_dir() {
        project_path.to_path_buf()
    } else {
        project_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn structure_report(project_path: &Path, include_dev: bool) -> Result<StructureReport> {
    let manifest_path = project_dir(project_path).join(MANIFEST_FILE);
    let manifest = read_manifest(&manifest_path)?;

    let report = match locate_lockfile(&manifest_path) {
        Some(lockfile) => {
            let tree = read_project_install_tree(&manifest_path, &lockfile, include_dev)?;
            analyze_structure(StructureInput::InstallTree(&tree), include_dev)
        }
        None => {
            eprintln!(
                "{} no {} found; checking direct dependencies only",
                "Note:".yellow().bold(),
                deps_inspect::LOCKFILE
            );
            analyze_structure(StructureInput::Manifest(&manifest), include_dev)
        }
    };
    Ok(report)
}

fn failing_records(report: &ProjectReport, threshold: FailOn) -> Vec<&DependencyRecord> {
    let min_rank = threshold.class().rank();
    report
        .analysis
        .records
        .iter()
        .filter(|r| r.update_class.rank().is_some() && r.update_class.rank() >= min_rank)
        .collect()
}

fn colorize(class: UpdateClass) -> ColoredString {
    let text = class.to_string();
    match class {
        UpdateClass::Current => text.green(),
        UpdateClass::Patch => text.cyan(),
        UpdateClass::Minor => text.yellow(),
        UpdateClass::Major => text.red(),
        UpdateClass::Unknown => text.dimmed(),
    }
}

fn display_summary(report: &ProjectReport) {
    let summary = &report.analysis.summary;

    println!("\n{}", "=== Dependency Summary ===".bold());
    println!("Project: {}", report.project_name.cyan());
    println!("Total dependencies: {}", summary.total_dependencies);
    println!();

    println!("  {} {}", "●".green(), format!("Current: {}", summary.current).green());
    println!("  {} {}", "●".cyan(), format!("Patch behind: {}", summary.patch).cyan());
    println!("  {} {}", "●".yellow(), format!("Minor behind: {}", summary.minor).yellow());
    println!("  {} {}", "●".red(), format!("Major behind: {}", summary.major).red());
    println!("  {} Unknown: {}", "●".dimmed(), summary.unknown);
    if summary.failed > 0 {
        println!("  {} {}", "✗".red(), format!("Failed lookups: {}", summary.failed).red());
    }
    println!();

    println!("License issues: {}", summary.license_issues);
    println!(
        "Cycles: {}, duplicated packages: {}",
        report.structure.cycles.len(),
        report.structure.duplicates.len()
    );
}

fn display_records(report: &ProjectReport, all: bool) {
    println!("{}", "=== Dependencies ===".bold());

    let mut shown = 0;
    for record in &report.analysis.records {
        if !all && !record.update_class.is_outdated() && !record.is_error() {
            continue;
        }
        shown += 1;

        if let Some(error) = &record.error {
            println!("\n{} [{}] {}", record.name.bold(), record.group, error.red());
            continue;
        }

        println!(
            "\n{} [{}] {} -> {} ({})",
            record.name.bold(),
            record.group,
            record.resolved_version.as_deref().unwrap_or("?"),
            record.latest_version.as_deref().unwrap_or("?"),
            colorize(record.update_class)
        );

        if let Some(license) = &record.license {
            println!("  License: {} ({})", license, record.license_risk);
        }

        if !record.warnings.is_empty() {
            println!("  Warnings:");
            for warning in &record.warnings {
                println!("    - {}", warning.yellow());
            }
        }
    }

    if shown == 0 {
        println!("{} All dependencies are up to date!", "Success:".green().bold());
    }
}

fn display_structure(report: &StructureReport) {
    println!("\n{}", "=== Dependency Structure ===".bold());

    if report.cycles.is_empty() {
        println!("{}", "No dependency cycles".green());
    } else {
        println!("{}", format!("{} dependency cycles:", report.cycles.len()).red());
        for cycle in &report.cycles {
            println!("  - {}", cycle.join(" -> "));
        }
    }

    if report.duplicates.is_empty() {
        println!("{}", "No duplicated packages".green());
    } else {
        println!(
            "{}",
            format!("{} packages installed at several versions:", report.duplicates.len())
                .yellow()
        );
        for duplicate in &report.duplicates {
            println!("  - {}: {}", duplicate.name, duplicate.versions.join(", "));
        }
    }
}
