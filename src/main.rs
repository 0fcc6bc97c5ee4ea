//! ferro - concurrent, cancellable file operations and search.
//!
//! Usage:
//!   ferro copy SRC... DEST          Copy files and directories
//!   ferro move SRC... DEST          Move files and directories
//!   ferro delete PATH...            Permanently delete
//!   ferro extract ARCHIVE... DEST   Unpack zip and tar archives
//!   ferro search ROOT... -p PAT     Find files
//!   ferro --help                    Show help

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use ferrofile_core::{EngineConfig, ResourcePools};
use ferrofile_ops::{
    BatchCoordinator, BatchEvent, BatchReport, ConflictPolicy, OperationDescriptor,
    ProgressSnapshot,
};
use ferrofile_search::{FileCategory, SearchEngine, SearchMode, SearchQuery};

#[derive(Parser)]
#[command(
    name = "ferro",
    version,
    about = "Concurrent, cancellable file operations and search",
    long_about = "ferro copies, moves, deletes and extracts batches of files on bounded \
                  worker pools with byte-accurate progress, and searches directory trees \
                  by name, content, category or size."
)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format for the final report
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy sources into a directory
    Copy {
        /// Files or directories to copy, followed by the target directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// What to do when a destination already exists
        #[arg(long)]
        on_conflict: Option<ConflictArg>,
    },

    /// Move sources into a directory
    Move {
        /// Files or directories to move, followed by the target directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// What to do when a destination already exists
        #[arg(long)]
        on_conflict: Option<ConflictArg>,
    },

    /// Permanently delete files and directories
    Delete {
        /// Paths to delete
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Extract archives into a directory
    Extract {
        /// Archives to extract, followed by the target directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Search directory trees
    Search {
        /// Directories to search
        #[arg(default_value = ".")]
        roots: Vec<PathBuf>,

        /// Pattern to look for (glob for wildcard and content modes)
        #[arg(short, long)]
        pattern: String,

        /// How the pattern is applied
        #[arg(short, long, default_value = "wildcard")]
        mode: ModeArg,

        /// Threshold for the large-file mode (e.g., "500MB", "2GB")
        #[arg(long)]
        min_size: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictArg {
    Overwrite,
    Skip,
    Abort,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Overwrite => Self::OverwriteAll,
            ConflictArg::Skip => Self::SkipAll,
            ConflictArg::Abort => Self::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Wildcard,
    Substring,
    Content,
    Image,
    Audio,
    Video,
    Document,
    Archive,
    Large,
}

impl From<ModeArg> for SearchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Wildcard => Self::Wildcard,
            ModeArg::Substring => Self::Substring,
            ModeArg::Content => Self::ContentWildcard,
            ModeArg::Image => Self::ByCategory(FileCategory::Image),
            ModeArg::Audio => Self::ByCategory(FileCategory::Audio),
            ModeArg::Video => Self::ByCategory(FileCategory::Video),
            ModeArg::Document => Self::ByCategory(FileCategory::Document),
            ModeArg::Archive => Self::ByCategory(FileCategory::Archive),
            ModeArg::Large => Self::LargeFile,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Command::Search {
        min_size: Some(size),
        ..
    } = &cli.command
    {
        config.large_file_threshold = parse_size(size)?;
    }

    let pools = Arc::new(ResourcePools::new(&config).context("Cannot start worker pools")?);

    match cli.command {
        Command::Copy { paths, on_conflict } => {
            let (sources, target) = split_target(paths)?;
            let coordinator = BatchCoordinator::new(pools, config);
            run_batch(&coordinator, OperationDescriptor::copy(sources, target), on_conflict, cli.format)
        }
        Command::Move { paths, on_conflict } => {
            let (sources, target) = split_target(paths)?;
            let coordinator = BatchCoordinator::new(pools, config);
            run_batch(&coordinator, OperationDescriptor::move_to(sources, target), on_conflict, cli.format)
        }
        Command::Delete { paths } => {
            let coordinator = BatchCoordinator::new(pools, config);
            run_batch(&coordinator, OperationDescriptor::delete(paths), None, cli.format)
        }
        Command::Extract { paths } => {
            let (sources, target) = split_target(paths)?;
            let coordinator = BatchCoordinator::new(pools, config);
            run_batch(&coordinator, OperationDescriptor::extract(sources, target), None, cli.format)
        }
        Command::Search {
            roots,
            pattern,
            mode,
            ..
        } => {
            let engine = SearchEngine::new(pools, config);
            run_search(&engine, SearchQuery::new(roots, pattern, mode.into()), cli.format)
        }
    }
}

/// Load the engine configuration, or the defaults without a file.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Split trailing target directory off a positional path list.
fn split_target(mut paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, PathBuf)> {
    match paths.pop() {
        Some(target) if !paths.is_empty() => Ok((paths, target)),
        _ => bail!("Expected at least one source and a target directory"),
    }
}

/// Run one batch, printing progress to stderr and the report to stdout.
fn run_batch(
    coordinator: &BatchCoordinator,
    descriptor: OperationDescriptor,
    on_conflict: Option<ConflictArg>,
    format: OutputFormat,
) -> Result<()> {
    let prepared = coordinator
        .prepare_blocking(descriptor)
        .context("Pre-flight check failed")?;

    if !prepared.conflicts().is_empty() {
        eprintln!("{} destination(s) already exist:", prepared.conflicts().len());
        for conflict in prepared.conflicts() {
            eprintln!("  {} ({})", conflict.existing_target.display(), conflict.kind);
        }
        if on_conflict.is_none() {
            bail!("Refusing to continue; pass --on-conflict overwrite|skip|abort");
        }
    }

    let mut handle = prepared.start(on_conflict.map(Into::into))?;

    let mut report = None;
    while let Some(event) = handle.blocking_recv() {
        match event {
            BatchEvent::Progress(snapshot) => print_progress(&snapshot),
            BatchEvent::Complete(done) => {
                report = Some(done);
                break;
            }
        }
    }
    eprintln!();

    let report = match report {
        Some(report) => report,
        None => handle.wait_blocking(),
    };
    print_report(&report, format)?;

    if !report.is_success() {
        bail!("{}", report.summary());
    }
    Ok(())
}

fn print_progress(snapshot: &ProgressSnapshot) {
    eprint!(
        "\r{:>5.1}%  {} / {}  [{}/{}]  {:<40}",
        snapshot.percentage(),
        format_size(snapshot.processed_bytes),
        format_size(snapshot.total_bytes),
        snapshot.completed + snapshot.failed,
        snapshot.total_units,
        truncate(&snapshot.message, 40),
    );
    let _ = std::io::stderr().flush();
}

fn print_report(report: &BatchReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", report.summary());
            println!(
                "{} of {} processed",
                format_size(report.processed_bytes),
                format_size(report.total_bytes)
            );
            for error in &report.errors {
                println!("  error: {error}");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

/// Run a search and list the matches.
fn run_search(engine: &SearchEngine, query: SearchQuery, format: OutputFormat) -> Result<()> {
    let report = engine.search(&query)?.wait_blocking();

    match format {
        OutputFormat::Text => {
            for found in &report.results {
                println!("{:>10}  {}", format_size(found.size), found.path.display());
            }
            println!();
            println!("{} match(es)", report.results.len());
            if report.truncated {
                println!("Result limit reached; search stopped early");
            }
            if report.errors_skipped > 0 {
                println!("{} unreadable entries skipped", report.errors_skipped);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_chars` characters.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

/// Parse a size string (e.g., "1KB", "10MB", "1GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');

    let multiplier: u64 = match s[digits.len()..].trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        unit => bail!("Unknown size unit '{unit}'"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size '{s}'"))?;

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("100MB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), 1536 * 1024 * 1024);
        assert!(parse_size("10XB").is_err());
    }

    #[test]
    fn test_split_target() {
        let (sources, target) =
            split_target(vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("dst")]).unwrap();
        assert_eq!(sources, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(target, PathBuf::from("dst"));
        assert!(split_target(vec![PathBuf::from("only")]).is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["ferro", "copy", "a", "b", "dst", "--on-conflict", "skip"]).unwrap();
        assert!(matches!(cli.command, Command::Copy { on_conflict: Some(ConflictArg::Skip), .. }));
    }
}
