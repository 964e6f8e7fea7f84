//! gpu-census - GPUs-per-student census CLI
//!
//! Rebuilds the published dataset from validated per-university documents.
//!
//! Usage:
//!   gpu-census generate             Rebuild the dataset from validated documents
//!   gpu-census run [--only NAME]    Rebuild for all or some universities and publish
//!   gpu-census publish              Copy the dataset to the web data directory

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use gpu_census_core::{
    default_config_path, leaderboard, load_config, publish, table_from_outcome, write_outputs,
    CensusConfig, Config, DirectorySource, MasterTable, Paths, PriceTable, RecordSource, Roster,
    StudentCacheMerge,
};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gpu-census")]
#[command(about = "GPUs per student - rebuild and publish the census dataset")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for configured file locations
#[derive(Args, Clone, Default)]
struct PathArgs {
    /// Directory of validated per-university documents
    #[arg(long, global = true)]
    documents: Option<PathBuf>,

    /// GPU price table (CSV with GPU,Price_USD)
    #[arg(long, global = true)]
    prices: Option<PathBuf>,

    /// University roster (CSV with name,url[,id])
    #[arg(long, global = true)]
    roster: Option<PathBuf>,

    /// Output dataset path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Audit report path
    #[arg(long, global = true)]
    audit: Option<PathBuf>,

    /// Web data directory
    #[arg(long, global = true)]
    web_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the dataset from already-validated documents
    Generate {
        /// Number of leaderboard rows to print
        #[arg(short = 'n', long, default_value = "15")]
        top: usize,
    },
    /// Rebuild the dataset for every roster university (or a subset) and publish it
    Run {
        /// Only include these universities (roster name or id). Can be repeated.
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,

        /// Number of leaderboard rows to print
        #[arg(short = 'n', long, default_value = "15")]
        top: usize,
    },
    /// Copy the existing dataset and documents to the web data directory
    Publish,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.clone())?;
    let paths = apply_overrides(config.paths(), &cli.paths);

    match cli.command {
        Commands::Generate { top } => {
            let table = cmd_generate(&config, &paths, None)?;
            print_leaderboard(&table, top);
            check_malformed(&table)
        }
        Commands::Run { only, top } => {
            let only = if only.is_empty() { None } else { Some(only) };
            let table = cmd_generate(&config, &paths, only.as_deref())?;
            publish(&paths.output, &paths.documents_dir, &paths.web_dir)?;
            print_leaderboard(&table, top);
            check_malformed(&table)
        }
        Commands::Publish => {
            let stats = publish(&paths.output, &paths.documents_dir, &paths.web_dir)?;
            println!(
                "{} Published {} and {} documents to {}",
                "✓".green(),
                paths.output.display(),
                stats.documents,
                paths.web_dir.display()
            );
            Ok(())
        }
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            path
        }
        None => default_config_path()?,
    };
    load_config(&path)
}

fn apply_overrides(paths: Paths, args: &PathArgs) -> Paths {
    let args = args.clone();
    Paths {
        documents_dir: args.documents.unwrap_or(paths.documents_dir),
        price_table: args.prices.unwrap_or(paths.price_table),
        roster: args.roster.unwrap_or(paths.roster),
        output: args.output.unwrap_or(paths.output),
        audit: args.audit.unwrap_or(paths.audit),
        web_dir: args.web_dir.unwrap_or(paths.web_dir),
        student_cache_dirs: paths.student_cache_dirs,
    }
}

fn load_roster(paths: &Paths) -> Result<Roster> {
    if !paths.roster.exists() {
        tracing::warn!(
            "Roster not found at {}, using document names as ids",
            paths.roster.display()
        );
        return Ok(Roster::default());
    }
    Roster::from_path(&paths.roster)
        .with_context(|| format!("Failed to load roster: {}", paths.roster.display()))
}

/// Resolve `--only` names against the roster.
fn subset_ids(roster: &Roster, names: &[String]) -> Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();
    for name in names {
        let id = match roster.get(name) {
            Some(entry) => entry.id.clone(),
            None => match roster.lookup(name) {
                Some(entry) => entry.id.clone(),
                None if roster.is_empty() => roster.resolve_id(name),
                None => anyhow::bail!("Unknown university: {name}"),
            },
        };
        ids.insert(id);
    }
    Ok(ids)
}

fn cmd_generate(config: &Config, paths: &Paths, only: Option<&[String]>) -> Result<MasterTable> {
    let census: CensusConfig = config.census()?;
    let prices = PriceTable::from_path(&paths.price_table, &census.reference_model)
        .with_context(|| format!("Failed to load price table: {}", paths.price_table.display()))?;
    tracing::info!(
        "{} prices loaded, reference {} at ${:.0}",
        prices.len(),
        prices.reference(),
        prices.reference_price()
    );
    let roster = load_roster(paths)?;

    let subset = only.map(|names| subset_ids(&roster, names)).transpose()?;
    let merge = StudentCacheMerge::new(paths.student_cache_dirs.clone());
    let source = DirectorySource::new(paths.documents_dir.clone(), roster.clone(), merge);
    let mut outcome = source.records()?;

    if let Some(ids) = &subset {
        outcome.retain_ids(ids);
    }
    let expected: Vec<_> = roster
        .iter()
        .filter(|entry| subset.as_ref().map_or(true, |ids| ids.contains(&entry.id)))
        .filter(|entry| {
            !outcome.records.iter().any(|r| r.university_id == entry.id)
                && !outcome.rejected.iter().any(|e| e.university() == entry.id)
        })
        .map(|entry| entry.name.clone())
        .collect();
    for name in &expected {
        tracing::warn!("No validated document for {name}");
    }

    let table = table_from_outcome(outcome, &prices, &census);
    write_outputs(&table, &paths.output, &paths.audit)?;

    println!(
        "{} Generated {} with {} universities",
        "✓".green(),
        paths.output.display(),
        table.rows.len()
    );
    for issue in &table.issues {
        println!("  {} {}", "skipped".yellow(), issue);
    }
    Ok(table)
}

fn print_leaderboard(table: &MasterTable, top: usize) {
    if top == 0 {
        return;
    }
    println!();
    println!("{}", format!("TOP {top} LEADERBOARD:").bold());
    println!(
        "{:<5} {:<40} {:<12} {:<10} {:<8}",
        "Rank", "University", "GPUs/Student", "H100 Equiv", "Sources"
    );
    println!("{}", "-".repeat(80));
    for (rank, name, ratio, h100, sources) in leaderboard(table, top) {
        let name: String = name.chars().take(39).collect();
        println!("{rank:<5} {name:<40} {ratio:<12.4} {h100:<10.1} {sources:<8}");
    }
}

/// Non-zero exit when any document failed validation.
fn check_malformed(table: &MasterTable) -> Result<()> {
    let malformed = table.malformed_count();
    if malformed > 0 {
        anyhow::bail!("{malformed} document(s) failed validation; see the audit report");
    }
    Ok(())
}
