//! Per-line classification of a source file against its coverage blocks.

use crate::model::{Block, LineAnnotation, LineClass, LineRange};

/// Accumulated contributions for one line.
#[derive(Default)]
struct LineState {
    class: LineClass,
    missed_ranges: Vec<LineRange>,
}

/// Split source text into physical lines. A trailing newline does not
/// start another line; the text of each line is left untouched.
#[must_use]
pub fn split_lines(source: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = source.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Classify every line of `source` using the file's merged blocks.
#[must_use]
pub fn annotate(blocks: &[Block], source: &str) -> Vec<LineAnnotation> {
    let lines = split_lines(source);
    let line_count = lines.len() as u32;
    let mut states: Vec<LineState> = lines.iter().map(|_| LineState::default()).collect();

    for block in blocks {
        let start = block.start_line.max(1);
        let end = block.end_line.min(line_count);
        for line in start..=end {
            let text = lines[(line - 1) as usize];
            let range = column_range(block, line, text.len() as u32);
            let state = &mut states[(line - 1) as usize];

            if block.count > 0 {
                state.class = state.class.join(LineClass::Covered);
            } else {
                state.class = state.class.join(LineClass::Missed);
                if range.end > range.start {
                    state.missed_ranges.push(range);
                }
            }
        }
    }

    lines
        .into_iter()
        .zip(states)
        .enumerate()
        .map(|(index, (text, state))| {
            let ranges = if state.class == LineClass::Partial {
                merge_ranges(state.missed_ranges)
            } else {
                Vec::new()
            };
            LineAnnotation {
                number: index as u32 + 1,
                code: text.to_string(),
                class: state.class,
                ranges,
            }
        })
        .collect()
}

/// The part of `line` a block spans, clamped to `[1, len + 1]`.
fn column_range(block: &Block, line: u32, len: u32) -> LineRange {
    let max_col = len + 1;
    let start = if line == block.start_line {
        block.start_col
    } else {
        1
    };
    let end = if line == block.end_line {
        block.end_col
    } else {
        max_col
    };

    let start = start.clamp(1, max_col);
    let end = end.clamp(start, max_col);
    LineRange::new(start, end)
}

/// Sort ranges and coalesce the ones that overlap or touch.
#[must_use]
pub fn merge_ranges(mut ranges: Vec<LineRange>) -> Vec<LineRange> {
    ranges.sort();

    let mut merged: Vec<LineRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(current) if range.start <= current.end => {
                current.end = current.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Render ranges as `"start-end,start-end"`.
#[must_use]
pub fn format_ranges(ranges: &[LineRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
