//! Grep with optional surrounding context, merging overlapping context spans
//! into groups.

use anyhow::Result;

use crate::capture::{Filter, Reader};
use crate::model::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    Before,
    Match,
    After,
}

#[derive(Debug, Clone)]
pub struct GrepLine {
    pub entry: LogEntry,
    pub role: LineRole,
    pub group: usize,
}

/// `context == 0`: stream-emit every match directly, each its own group.
/// `context > 0`: buffer the whole scan, then emit `[m-N, m+N]` spans with
/// overlapping spans collapsed into a single group.
pub fn grep(reader: &Reader, filter: &Filter, context: usize) -> Result<Vec<GrepLine>> {
    if context == 0 {
        let mut out = Vec::new();
        let mut group = 0usize;
        reader.scan(filter, |entry| {
            out.push(GrepLine {
                entry: entry.clone(),
                role: LineRole::Match,
                group,
            });
            group += 1;
            true
        })?;
        return Ok(out);
    }

    // Context mode needs every entry (to pull in non-matching neighbors), so
    // scan with an unfiltered pass and track which indices matched.
    let mut all = Vec::new();
    let mut match_indices = Vec::new();
    reader.scan(&Filter::default(), |entry| {
        if filter.match_entry(entry) {
            match_indices.push(all.len());
        }
        all.push(entry.clone());
        true
    })?;

    if match_indices.is_empty() {
        return Ok(Vec::new());
    }

    let spans = merge_spans(&match_indices, context, all.len());

    let mut out = Vec::new();
    for (group, (start, end)) in spans.into_iter().enumerate() {
        for idx in start..=end {
            let role = if match_indices.binary_search(&idx).is_ok() {
                LineRole::Match
            } else if idx < match_indices[0] {
                LineRole::Before
            } else {
                // Disambiguate by nearest match: before if any following
                // match is closer behind than ahead isn't needed here since
                // spans are built per contiguous [m-N, m+N] ranges; within a
                // merged span a non-match line is `Before` if it precedes
                // its nearest match, else `After`.
                nearest_role(idx, &match_indices)
            };
            out.push(GrepLine {
                entry: all[idx].clone(),
                role,
                group,
            });
        }
    }
    Ok(out)
}

fn nearest_role(idx: usize, matches: &[usize]) -> LineRole {
    match matches.binary_search(&idx) {
        Ok(_) => LineRole::Match,
        Err(pos) => {
            let after_match = matches.get(pos).copied();
            let before_match = if pos > 0 { matches.get(pos - 1).copied() } else { None };
            match (before_match, after_match) {
                (Some(b), Some(a)) => {
                    if idx - b <= a - idx {
                        LineRole::After
                    } else {
                        LineRole::Before
                    }
                }
                (Some(_), None) => LineRole::After,
                (None, Some(_)) => LineRole::Before,
                (None, None) => LineRole::Before,
            }
        }
    }
}

/// Merge `[m-N, m+N]` spans (clamped to `[0, len)`) that overlap or touch.
fn merge_spans(match_indices: &[usize], context: usize, len: usize) -> Vec<(usize, usize)> {
    let mut raw: Vec<(usize, usize)> = match_indices
        .iter()
        .map(|&m| {
            let start = m.saturating_sub(context);
            let end = (m + context).min(len.saturating_sub(1));
            (start, end)
        })
        .collect();
    raw.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in raw {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 + 1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{metadata, writer::Writer};
    use crate::model::{Labels, Metadata};
    use chrono::Utc;
    use std::time::Duration;

    fn seven_line_capture(dir: &std::path::Path) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        let mut w = Writer::open_new(dir, 0, u64::MAX, Duration::from_secs(3600)).unwrap();
        for i in 1..=7 {
            let msg = if i == 4 { "boom".to_string() } else { format!("line {i}") };
            w.append(&LogEntry::new(Utc::now(), Labels::new(), msg)).unwrap();
        }
        let (path, acc, _) = w.close_for_rotation().unwrap();
        crate::capture::rotator::rotate(dir, &path, acc, &crate::metrics::Registry::new()).unwrap();
    }

    #[test]
    fn context_two_emits_surrounding_lines_in_one_group() {
        let dir = tempfile::tempdir().unwrap();
        seven_line_capture(dir.path());
        let reader = Reader::open(dir.path()).unwrap();

        let mut filter = Filter::default();
        filter.grep = Some(regex::Regex::new("boom").unwrap());

        let lines = grep(&reader, &filter, 2).unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|l| l.role == LineRole::Match).count(), 1);
        assert!(lines.iter().all(|l| l.group == 0));
    }

    #[test]
    fn zero_context_emits_only_matches() {
        let dir = tempfile::tempdir().unwrap();
        seven_line_capture(dir.path());
        let reader = Reader::open(dir.path()).unwrap();

        let mut filter = Filter::default();
        filter.grep = Some(regex::Regex::new("boom").unwrap());

        let lines = grep(&reader, &filter, 0).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].role, LineRole::Match);
    }
}
