//! Report assembly: parse, resolve, annotate and aggregate in one pass, plus
//! the formatters the command line uses to print the result.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::annotate::annotate;
use crate::error::{CoverageError, Result};
use crate::model::{Coverage, Profile, Report, ResolvedFile, TreeNode};
use crate::parsers::gocover;
use crate::resolve::{FileResolver, GoList, NoLookup, PackageLookup, DEFAULT_LOOKUP_TIMEOUT};
use crate::tree::build_tree;

/// Characters that may not appear in an HTML anchor.
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").unwrap());

pub const DEFAULT_TITLE: &str = "Go Coverage Report";

/// Everything needed to produce a report from a profile on disk.
#[derive(Debug, Clone)]
pub struct Options {
    pub profile: PathBuf,
    /// Root for resolving source files. Defaults to the profile's directory.
    pub root: Option<PathBuf>,
    pub title: String,
    /// Ask the go toolchain where packages live.
    pub package_lookup: bool,
    pub go_program: PathBuf,
    pub lookup_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            profile: PathBuf::from("coverage.out"),
            root: None,
            title: DEFAULT_TITLE.to_string(),
            package_lookup: true,
            go_program: PathBuf::from("go"),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl Options {
    /// The resolution root: `--root` if given, otherwise the directory the
    /// profile lives in.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => match self.profile.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }

    fn lookup(&self) -> Box<dyn PackageLookup> {
        if self.package_lookup {
            Box::new(GoList {
                program: self.go_program.clone(),
                timeout: self.lookup_timeout,
            })
        } else {
            Box::new(NoLookup)
        }
    }
}

/// Read the profile named in `options` and build its report.
pub fn generate(options: &Options) -> Result<Report> {
    let content = std::fs::read(&options.profile)?;
    generate_from_bytes(options, &content)
}

/// Build a report from profile content already in memory. `options.profile`
/// is only used to pick the default root.
pub fn generate_from_bytes(options: &Options, content: &[u8]) -> Result<Report> {
    let profiles = gocover::parse(content)?;
    let lookup = options.lookup();
    build_report(profiles, &options.root(), &options.title, lookup.as_ref())
}

/// Build a report from parsed (and merged) profiles.
///
/// The package lookup runs once, before any file is read. A file that
/// cannot be read is flagged missing but still counts toward the totals.
pub fn build_report(
    profiles: Vec<Profile>,
    root: &Path,
    title: &str,
    lookup: &dyn PackageLookup,
) -> Result<Report> {
    let resolver = FileResolver::new(root, &profiles, lookup)?;

    let files: Vec<ResolvedFile> = profiles
        .iter()
        .map(|profile| resolve_file(profile, &resolver))
        .collect();

    let coverage: Coverage = files.iter().map(|f| f.coverage).sum();
    let missing_files = files.iter().filter(|f| f.missing).count();
    let tree = build_tree(&files);

    Ok(Report {
        title: title.to_string(),
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        coverage,
        total_files: files.len(),
        missing_files,
        tree,
        files,
    })
}

/// Resolve, read and annotate a single profile.
pub fn resolve_file(profile: &Profile, resolver: &FileResolver) -> ResolvedFile {
    let (source_path, relative_path) = resolver.resolve(&profile.file_name);

    let mut file = ResolvedFile {
        name: profile.file_name.clone(),
        anchor: sanitize_anchor(&profile.file_name),
        coverage: profile.coverage(),
        lines: Vec::new(),
        missing: false,
        missing_description: None,
        source_path,
        relative_path,
    };

    match read_source(&file.source_path) {
        Ok(source) => file.lines = annotate(&profile.blocks, &source),
        Err(e) => {
            file.missing = true;
            file.missing_description = Some(e.to_string());
        }
    }

    file
}

fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|source| CoverageError::SourceMissing {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Turn a file identifier into an HTML anchor id.
#[must_use]
pub fn sanitize_anchor(value: &str) -> String {
    let sanitized = ANCHOR_RE.replace_all(value, "-");
    let sanitized = sanitized.trim_matches('-');
    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized.to_string()
    }
}

// ---------------------------------------------------------------------------
// Formatters
// ---------------------------------------------------------------------------

/// Trait for formatting reports.
pub trait ReportFormatter {
    /// Format the report to a string.
    fn format(&self, report: &Report) -> Result<String>;
}

/// Plain text summary: totals, the directory tree and a per-file table.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &Report) -> Result<String> {
        let mut out = String::new();

        writeln!(out, "{}", report.title).unwrap();
        writeln!(out, "Generated:  {}", report.generated_at).unwrap();
        writeln!(
            out,
            "Statements: {}/{} ({}, {})",
            report.coverage.covered,
            report.coverage.total,
            report.coverage.percent_label(),
            report.coverage.class()
        )
        .unwrap();
        writeln!(out, "Files:      {}", report.total_files).unwrap();
        if report.missing_files > 0 {
            writeln!(out, "Missing:    {}", report.missing_files).unwrap();
        }

        if report.files.is_empty() {
            return Ok(out);
        }

        out.push('\n');
        for node in &report.tree {
            write_tree(&mut out, node, 0);
        }

        out.push('\n');
        writeln!(
            out,
            "{:<60} {:>8} {:>8} {:>8}",
            "FILE", "STMTS", "COVERED", "RATE"
        )
        .unwrap();
        writeln!(out, "{}", "-".repeat(88)).unwrap();
        for f in &report.files {
            let marker = if f.missing { "  (missing)" } else { "" };
            writeln!(
                out,
                "{:<60} {:>8} {:>8} {:>8}{}",
                f.relative_path.display(),
                f.coverage.total,
                f.coverage.covered,
                f.coverage.percent_label(),
                marker
            )
            .unwrap();
        }

        Ok(out)
    }
}

fn write_tree(out: &mut String, node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let suffix = if node.is_dir() { "/" } else { "" };
    writeln!(
        out,
        "{indent}{}{suffix}  {} ({}/{})",
        node.name,
        node.coverage.percent_label(),
        node.coverage.covered,
        node.coverage.total
    )
    .unwrap();
    for child in node.children() {
        write_tree(out, child, depth + 1);
    }
}

/// The whole report as pretty-printed JSON, for external renderers.
pub struct JsonFormatter;

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &Report) -> Result<String> {
        let mut json = serde_json::to_string_pretty(report)?;
        json.push('\n');
        Ok(json)
    }
}
