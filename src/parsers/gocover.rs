/// Parser for Go's `-coverprofile` format.
///
/// Reference: https://go.dev/blog/cover
///
/// Format:
///   mode: set|count|atomic
///   <file>:<startLine>.<startCol>,<endLine>.<endCol> <numStatements> <count>
///
/// Each line describes a basic block with the number of statements in the
/// block and how many times it was executed. Blocks are grouped per file in
/// first-seen order and duplicate ranges are merged before returning.
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::error::{CoverageError, Result};
use crate::merge::merge_blocks;
use crate::model::*;

/// Parse a Go coverage profile from raw bytes.
pub fn parse(input: &[u8]) -> Result<Vec<Profile>> {
    parse_reader(&mut &*input)
}

/// Read and parse the profile at `path`.
pub fn parse_file(path: &Path) -> Result<Vec<Profile>> {
    let file = std::fs::File::open(path)?;
    parse_reader(&mut std::io::BufReader::new(file))
}

/// Quick heuristic: does this content start like a Go coverage profile?
pub fn looks_like_profile(content: &[u8]) -> bool {
    let head = super::sniff_head(content);
    head.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .is_some_and(|first| first.starts_with("mode:"))
}

/// Parse a `startLine.startCol` pair.
fn parse_position(value: &str) -> Option<(u32, u32)> {
    let (line, col) = value.split_once('.')?;
    Some((line.parse().ok()?, col.parse().ok()?))
}

/// Parse a single block line, returning (file_name, Block).
///
/// The file name is everything before the last ':' so that names carrying
/// a drive letter still split correctly.
fn parse_block_line(line: &str, line_number: usize) -> Result<(&str, Block)> {
    let invalid = |message: &str| CoverageError::format(line_number, message);

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(invalid(&format!(
            "expected 3 fields, found {}",
            fields.len()
        )));
    }

    let (file, range) = fields[0]
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing ':' between file and range"))?;
    if file.is_empty() {
        return Err(invalid("empty file name"));
    }

    let (start, end) = range
        .split_once(',')
        .ok_or_else(|| invalid("invalid range"))?;
    let (start_line, start_col) =
        parse_position(start).ok_or_else(|| invalid("invalid start position"))?;
    let (end_line, end_col) =
        parse_position(end).ok_or_else(|| invalid("invalid end position"))?;
    if (end_line, end_col) < (start_line, start_col) {
        return Err(invalid("range ends before it starts"));
    }

    let num_stmt: u64 = fields[1]
        .parse()
        .map_err(|_| invalid("invalid statement count"))?;
    // Negative counts are accepted and read as never executed.
    let count: i64 = fields[2]
        .parse()
        .map_err(|_| invalid("invalid execution count"))?;
    let count = count.max(0).unsigned_abs();

    Ok((
        file,
        Block {
            start_line,
            start_col,
            end_line,
            end_col,
            num_stmt,
            count,
        },
    ))
}

/// Parse a profile from any buffered reader. Collects all blocks per file,
/// then merges each file's blocks under the declared mode.
pub fn parse_reader(reader: &mut dyn BufRead) -> Result<Vec<Profile>> {
    let mut mode: Option<Mode> = None;
    let mut profiles: Vec<Profile> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut buf = Vec::new();
    let mut line_number = 0;
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line_number += 1;

        // Identifiers are byte strings in Go; keep undecodable names readable.
        let raw_line = String::from_utf8_lossy(&buf);
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix("mode:") {
            let declared: Mode = name.trim().parse().map_err(|e| match e {
                CoverageError::Format { message, .. } => {
                    CoverageError::format(line_number, message)
                }
                other => other,
            })?;
            match mode {
                Some(current) if current != declared => {
                    return Err(CoverageError::format(
                        line_number,
                        format!("mode '{}' conflicts with earlier mode '{}'", declared, current),
                    ));
                }
                _ => mode = Some(declared),
            }
            continue;
        }

        let Some(mode) = mode else {
            return Err(CoverageError::MissingMode);
        };

        let (file, block) = parse_block_line(line, line_number)?;
        let slot = match index.get(file) {
            Some(&slot) => slot,
            None => {
                profiles.push(Profile::new(file.to_string(), mode));
                index.insert(file.to_string(), profiles.len() - 1);
                profiles.len() - 1
            }
        };
        profiles[slot].blocks.push(block);
    }

    if mode.is_none() {
        return Err(CoverageError::MissingMode);
    }

    for profile in &mut profiles {
        let blocks = std::mem::take(&mut profile.blocks);
        profile.blocks = merge_blocks(blocks, profile.mode)?;
    }

    Ok(profiles)
}
