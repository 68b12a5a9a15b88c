use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use beautiful_coverage::cli::{self, Style};
use beautiful_coverage::parsers::gocover;
use beautiful_coverage::report::{self, Options};

/// beautiful-coverage — annotated coverage reports from Go coverage profiles.
#[derive(Parser)]
#[command(name = "beautiful-coverage", version, about)]
struct Cli {
    /// Path to the coverprofile file.
    #[arg(long, global = true, default_value = "coverage.out")]
    profile: PathBuf,

    /// Root directory for resolving source files (default: the profile's directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Report title.
    #[arg(long, global = true, default_value = report::DEFAULT_TITLE)]
    title: String,

    /// Write output to this file instead of stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// The go binary used to look up package directories.
    #[arg(long = "go", global = true, default_value = "go")]
    go_program: PathBuf,

    /// Seconds to wait for `go list` before giving up.
    #[arg(long, global = true, default_value_t = 60)]
    go_list_timeout: u64,

    /// Skip package lookup; resolve files from the root and go.mod only.
    #[arg(long, global = true)]
    no_go_list: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the whole report (default).
    Report {
        /// Output style.
        #[arg(long, value_enum, default_value_t = Style::Text)]
        format: Style,
    },

    /// List per-file coverage.
    Files {
        /// Sort by coverage rate ascending (show worst files first).
        #[arg(long)]
        sort_by_coverage: bool,
    },

    /// Show line-level coverage for one source file.
    Lines {
        /// Profile identifier or path relative to the root.
        source_file: String,

        /// Only list lines that are missed or partially covered.
        #[arg(long)]
        uncovered: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = Options {
        profile: cli.profile.clone(),
        root: cli.root.clone(),
        title: cli.title.clone(),
        package_lookup: !cli.no_go_list,
        go_program: cli.go_program.clone(),
        lookup_timeout: Duration::from_secs(cli.go_list_timeout),
    };

    let content = std::fs::read(&options.profile)
        .with_context(|| format!("Failed to read profile {}", options.profile.display()))?;
    if !gocover::looks_like_profile(&content) {
        eprintln!(
            "Warning: {} does not start with a 'mode:' line; is it a Go coverage profile?",
            options.profile.display()
        );
    }

    if cli.no_go_list {
        eprintln!("Warning: package lookup disabled; resolving files from go.mod and the root only");
    }

    let report = report::generate_from_bytes(&options, &content)
        .context("Failed to build coverage report")?;
    for file in report.files.iter().filter(|f| f.missing) {
        if let Some(description) = &file.missing_description {
            eprintln!("Warning: {}: {}", file.name, description);
        }
    }

    let output = match cli.command.unwrap_or(Commands::Report {
        format: Style::Text,
    }) {
        Commands::Report { format } => cli::cmd_report(&report, format)?,
        Commands::Files { sort_by_coverage } => cli::cmd_files(&report, sort_by_coverage),
        Commands::Lines {
            source_file,
            uncovered,
        } => cli::cmd_lines(&report, &source_file, uncovered)?,
    };

    match &cli.out {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", output),
    }
    Ok(())
}
