//! In-memory representation of a Go coverage profile and of the report built
//! from it. Parsers produce `Profile`s; the report assembler turns them into
//! `ResolvedFile`s, a `TreeNode` tree and finally a `Report`.

use std::fmt;
use std::path::PathBuf;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::CoverageError;

/// Counting discipline declared by the profile's `mode:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Set,
    Count,
    Atomic,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Set => "set",
            Mode::Count => "count",
            Mode::Atomic => "atomic",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = CoverageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "set" => Ok(Mode::Set),
            "count" => Ok(Mode::Count),
            "atomic" => Ok(Mode::Atomic),
            _ => Err(CoverageError::format(
                0,
                format!("unknown mode '{}'. Supported: set, count, atomic", s),
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A basic block: a contiguous source range with its statement and hit
/// counts. Lines and columns are 1-based, `end_col` is exclusive, and
/// columns count bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub num_stmt: u64,
    pub count: u64,
}

impl Block {
    /// True when both blocks describe exactly the same source range.
    #[must_use]
    pub fn same_range(&self, other: &Block) -> bool {
        self.start_line == other.start_line
            && self.start_col == other.start_col
            && self.end_line == other.end_line
            && self.end_col == other.end_col
    }
}

/// Coverage data for a single source file.
#[derive(Debug, Clone)]
pub struct Profile {
    /// File identifier as recorded in the profile, usually an import path.
    pub file_name: String,
    pub mode: Mode,
    pub blocks: Vec<Block>,
}

impl Profile {
    pub fn new(file_name: String, mode: Mode) -> Self {
        Self {
            file_name,
            mode,
            blocks: Vec::new(),
        }
    }

    /// Statement counts summed over every block.
    #[must_use]
    pub fn coverage(&self) -> Coverage {
        self.blocks.iter().fold(Coverage::default(), |acc, block| {
            let covered = if block.count > 0 { block.num_stmt } else { 0 };
            acc + Coverage::new(covered, block.num_stmt)
        })
    }
}

/// Compute a coverage percentage. A zero total counts as fully covered.
#[must_use]
pub fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

/// Severity bucket for a coverage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageClass {
    High,
    Medium,
    Low,
    None,
}

impl CoverageClass {
    #[must_use]
    pub fn from_percent(value: f64) -> Self {
        if value >= 90.0 {
            CoverageClass::High
        } else if value >= 75.0 {
            CoverageClass::Medium
        } else if value > 0.0 {
            CoverageClass::Low
        } else {
            CoverageClass::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageClass::High => "high",
            CoverageClass::Medium => "medium",
            CoverageClass::Low => "low",
            CoverageClass::None => "none",
        }
    }
}

impl fmt::Display for CoverageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Covered and total statement counts. Percentage and class are always
/// derived from these two numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    pub covered: u64,
    pub total: u64,
}

impl Coverage {
    #[must_use]
    pub fn new(covered: u64, total: u64) -> Self {
        Self { covered, total }
    }

    #[must_use]
    pub fn percent(&self) -> f64 {
        percent(self.covered, self.total)
    }

    #[must_use]
    pub fn class(&self) -> CoverageClass {
        CoverageClass::from_percent(self.percent())
    }

    /// Percentage with one decimal, e.g. `"87.5%"`.
    #[must_use]
    pub fn percent_label(&self) -> String {
        format!("{:.1}%", self.percent())
    }
}

impl std::ops::Add for Coverage {
    type Output = Coverage;

    fn add(self, rhs: Coverage) -> Coverage {
        Coverage::new(
            self.covered.saturating_add(rhs.covered),
            self.total.saturating_add(rhs.total),
        )
    }
}

impl std::ops::AddAssign for Coverage {
    fn add_assign(&mut self, rhs: Coverage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Coverage {
    fn sum<I: Iterator<Item = Coverage>>(iter: I) -> Coverage {
        iter.fold(Coverage::default(), |acc, c| acc + c)
    }
}

// Serialized with its derived values so consumers never recompute them.
impl Serialize for Coverage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Coverage", 4)?;
        state.serialize_field("covered", &self.covered)?;
        state.serialize_field("total", &self.total)?;
        state.serialize_field("percent", &self.percent_label())?;
        state.serialize_field("class", &self.class())?;
        state.end()
    }
}

/// Classification of a single source line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineClass {
    #[default]
    NotTracked,
    Covered,
    Missed,
    Partial,
}

impl LineClass {
    /// Combine two contributions. The result does not depend on the order
    /// in which contributions are applied.
    #[must_use]
    pub fn join(self, other: LineClass) -> LineClass {
        match (self, other) {
            (LineClass::NotTracked, c) | (c, LineClass::NotTracked) => c,
            (a, b) if a == b => a,
            _ => LineClass::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineClass::NotTracked => "not-tracked",
            LineClass::Covered => "covered",
            LineClass::Missed => "missed",
            LineClass::Partial => "partial",
        }
    }
}

impl fmt::Display for LineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte-column range `[start, end)` within one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One physical source line with its coverage classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineAnnotation {
    pub number: u32,
    pub code: String,
    pub class: LineClass,
    /// Uncovered spans, only populated for `Partial` lines.
    pub ranges: Vec<LineRange>,
}

/// A profile matched (or not) to a file on disk, with its annotated lines.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFile {
    pub name: String,
    pub source_path: PathBuf,
    pub relative_path: PathBuf,
    pub anchor: String,
    pub coverage: Coverage,
    pub lines: Vec<LineAnnotation>,
    pub missing: bool,
    pub missing_description: Option<String>,
}

/// A node of the file/directory tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Slash-joined segments from the report root.
    pub path: String,
    pub coverage: Coverage,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Directory {
        children: Vec<TreeNode>,
    },
    File {
        relative_path: String,
        anchor: String,
        /// Index into `Report::files`.
        file_index: usize,
    },
}

impl TreeNode {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    #[must_use]
    pub fn children(&self) -> &[TreeNode] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            NodeKind::File { .. } => &[],
        }
    }
}

/// The complete, render-ready result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub generated_at: String,
    pub coverage: Coverage,
    pub total_files: usize,
    pub missing_files: usize,
    pub tree: Vec<TreeNode>,
    /// Files in profile encounter order.
    pub files: Vec<ResolvedFile>,
}
