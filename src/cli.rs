//! Command handler functions for the beautiful-coverage CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::Path;

use anyhow::{bail, Result};
use clap::ValueEnum;

use crate::model::{LineClass, Report, ResolvedFile};
use crate::report::{JsonFormatter, ReportFormatter, TextFormatter};

/// Output style for the `report` command.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Style {
    #[default]
    Text,
    Json,
}

pub fn cmd_report(report: &Report, style: Style) -> Result<String> {
    let formatter: &dyn ReportFormatter = match style {
        Style::Text => &TextFormatter,
        Style::Json => &JsonFormatter,
    };
    Ok(formatter.format(report)?)
}

pub fn cmd_files(report: &Report, sort_by_coverage: bool) -> String {
    let mut files: Vec<&ResolvedFile> = report.files.iter().collect();
    if sort_by_coverage {
        files.sort_by(|a, b| a.coverage.percent().total_cmp(&b.coverage.percent()));
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:<60} {:>8} {:>8} {:>8}  CLASS",
        "FILE", "STMTS", "COVERED", "RATE"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(96)).unwrap();

    for f in files {
        writeln!(
            out,
            "{:<60} {:>8} {:>8} {:>8}  {}",
            f.relative_path.display(),
            f.coverage.total,
            f.coverage.covered,
            f.coverage.percent_label(),
            if f.missing { "missing" } else { f.coverage.class().as_str() }
        )
        .unwrap();
    }
    out
}

/// Find a file by profile identifier or by path relative to the root.
fn find_file<'a>(report: &'a Report, source_file: &str) -> Option<&'a ResolvedFile> {
    report
        .files
        .iter()
        .find(|f| f.name == source_file || f.relative_path == Path::new(source_file))
}

pub fn cmd_lines(report: &Report, source_file: &str, uncovered: bool) -> Result<String> {
    let Some(file) = find_file(report, source_file) else {
        bail!("No coverage data for '{}'", source_file);
    };
    if file.missing {
        bail!(
            "{}",
            file.missing_description
                .as_deref()
                .unwrap_or("source file is missing")
        );
    }

    let mut out = String::new();
    if uncovered {
        let missed: Vec<u32> = file
            .lines
            .iter()
            .filter(|l| matches!(l.class, LineClass::Missed | LineClass::Partial))
            .map(|l| l.number)
            .collect();

        if missed.is_empty() {
            return Ok(format!(
                "All tracked lines are covered in '{}'\n",
                source_file
            ));
        }

        writeln!(out, "Uncovered lines in '{}':", source_file).unwrap();
        writeln!(out, "  {}", format_line_numbers(&missed)).unwrap();
        writeln!(out, "  ({} lines)", missed.len()).unwrap();
        return Ok(out);
    }

    writeln!(out, "{:>6}  {:<12} CODE", "LINE", "CLASS").unwrap();
    writeln!(out, "{}", "-".repeat(40)).unwrap();
    for line in &file.lines {
        writeln!(
            out,
            "{:>6}  {:<12} {}",
            line.number,
            line.class.as_str(),
            line.code
        )
        .unwrap();
        if !line.ranges.is_empty() {
            writeln!(
                out,
                "{:>6}  {:<12} uncovered columns {}",
                "",
                "",
                crate::annotate::format_ranges(&line.ranges)
            )
            .unwrap();
        }
    }
    Ok(out)
}

/// Format sorted line numbers into compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_numbers(lines: &[u32]) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match ranges.last_mut() {
            Some((_, end)) if line == *end + 1 => *end = line,
            _ => ranges.push((line, line)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
