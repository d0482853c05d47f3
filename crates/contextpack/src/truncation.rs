//! Output Truncation Policy (§4.11): a shared utility used by tool
//! executors (bash output, grep results) and by the async background tool
//! completion router to keep injected text within a predictable budget.

use serde::Serialize;

/// How a truncation result was bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncatedBy {
    Lines,
    Bytes,
}

/// Default limits (§4.11).
pub const DEFAULT_MAX_LINES: usize = 2000;
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024;
pub const GREP_LINE_CAP: usize = 500;

/// Carries enough metadata to format a human-readable trailer, and for
/// head/tail truncators to be compared against each other in tests (§8).
#[derive(Debug, Clone, Serialize)]
pub struct TruncationResult {
    pub text: String,
    pub total_lines: usize,
    pub total_bytes: usize,
    pub output_lines: usize,
    pub output_bytes: usize,
    pub truncated: bool,
    pub truncated_by: Option<TruncatedBy>,
    pub last_line_partial: bool,
    pub first_line_exceeds_limit: bool,
}

/// Keeps a prefix of `text` until either `max_lines` or `max_bytes` is hit,
/// whichever comes first.
pub fn truncate_head(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let lines: Vec<&str> = text.split('\n').collect();
    let total_lines = lines.len();
    let total_bytes = text.len();

    let mut kept = String::new();
    let mut kept_lines = 0usize;
    let mut truncated_by = None;

    for (i, line) in lines.iter().enumerate() {
        let sep = if i == 0 { 0 } else { 1 };
        if kept_lines >= max_lines {
            truncated_by = Some(TruncatedBy::Lines);
            break;
        }
        if kept.len() + sep + line.len() > max_bytes {
            truncated_by = Some(TruncatedBy::Bytes);
            break;
        }
        if i > 0 {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_lines += 1;
    }

    let truncated = kept_lines < total_lines;
    TruncationResult {
        output_bytes: kept.len(),
        output_lines: kept_lines,
        total_lines,
        total_bytes,
        truncated,
        truncated_by: if truncated { truncated_by } else { None },
        last_line_partial: false,
        first_line_exceeds_limit: total_lines > 0 && lines[0].len() > max_bytes,
        text: kept,
    }
}

/// Keeps a suffix of `text` until either limit is hit. If the last
/// remaining line itself exceeds the byte budget, it is truncated at a
/// valid UTF-8 boundary measured from the start of that line (so the
/// reader sees its *tail*, not a prefix of a prefix).
pub fn truncate_tail(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let lines: Vec<&str> = text.split('\n').collect();
    let total_lines = lines.len();
    let total_bytes = text.len();

    let mut kept_rev: Vec<&str> = Vec::new();
    let mut bytes_used = 0usize;
    let mut truncated_by = None;
    let mut last_line_partial = false;

    for (count, line) in lines.iter().rev().enumerate() {
        if count >= max_lines {
            truncated_by = Some(TruncatedBy::Lines);
            break;
        }
        let sep = if kept_rev.is_empty() { 0 } else { 1 };
        if bytes_used + sep + line.len() > max_bytes {
            if kept_rev.is_empty() {
                // Even the single last line is too big: keep its tail,
                // backing up to a UTF-8 boundary.
                let start = line.len().saturating_sub(max_bytes);
                let boundary = floor_char_boundary(line, start);
                kept_rev.push(&line[boundary..]);
                bytes_used = line.len() - boundary;
                last_line_partial = true;
            }
            truncated_by = Some(TruncatedBy::Bytes);
            break;
        }
        bytes_used += sep + line.len();
        kept_rev.push(line);
    }

    kept_rev.reverse();
    let output_lines = kept_rev.len();
    let text_out = kept_rev.join("\n");
    let truncated = output_lines < total_lines || last_line_partial;

    TruncationResult {
        output_bytes: text_out.len(),
        output_lines,
        total_lines,
        total_bytes,
        truncated,
        truncated_by: if truncated { truncated_by } else { None },
        last_line_partial,
        first_line_exceeds_limit: total_lines > 0 && lines[total_lines - 1].len() > max_bytes,
        text: text_out,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Formats the `[Showing lines X-Y of N ...]` trailer for a truncated
/// result. Returns `None` if nothing was truncated.
pub fn format_trailer(result: &TruncationResult, start_line: usize) -> Option<String> {
    if !result.truncated {
        return None;
    }
    let end_line = start_line + result.output_lines.saturating_sub(1);
    let by = match result.truncated_by {
        Some(TruncatedBy::Lines) => "line limit",
        Some(TruncatedBy::Bytes) => "byte limit",
        None => "limit",
    };
    Some(format!(
        "[Showing lines {start_line}-{end_line} of {} total ({by} reached{})]",
        result.total_lines,
        if result.last_line_partial {
            ", last line truncated"
        } else {
            ""
        }
    ))
}

/// Caps a single grep match line to [`GREP_LINE_CAP`] chars (not bytes —
/// grep output is expected to be human text; we still back up to a char
/// boundary when the cap lands mid-character).
pub fn cap_grep_line(line: &str) -> String {
    if line.chars().count() <= GREP_LINE_CAP {
        return line.to_string();
    }
    let boundary = floor_char_boundary(line, GREP_LINE_CAP);
    format!("{}...", &line[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn head_truncation_keeps_prefix() {
        let text = lines(10);
        let r = truncate_head(&text, 3, 10_000);
        assert_eq!(r.output_lines, 3);
        assert!(r.truncated);
        assert_eq!(r.truncated_by, Some(TruncatedBy::Lines));
        assert_eq!(r.text, "line0\nline1\nline2");
    }

    #[test]
    fn tail_truncation_keeps_suffix() {
        let text = lines(10);
        let r = truncate_tail(&text, 3, 10_000);
        assert_eq!(r.output_lines, 3);
        assert_eq!(r.text, "line7\nline8\nline9");
    }

    #[test]
    fn no_truncation_under_limits() {
        let text = "a\nb\nc";
        let head = truncate_head(text, 100, 10_000);
        let tail = truncate_tail(text, 100, 10_000);
        assert!(!head.truncated);
        assert!(!tail.truncated);
        assert_eq!(head.total_lines, tail.total_lines);
        assert_eq!(head.total_bytes, tail.total_bytes);
    }

    #[test]
    fn head_and_tail_agree_on_totals() {
        let text = lines(50);
        let head = truncate_head(&text, 5, 10_000);
        let tail = truncate_tail(&text, 5, 10_000);
        assert_eq!(head.total_lines, tail.total_lines);
        assert_eq!(head.total_bytes, tail.total_bytes);
    }

    #[test]
    fn output_bytes_never_exceeds_max() {
        let text = lines(1000);
        let r = truncate_head(&text, 10_000, 37);
        assert!(r.output_bytes <= 37);
    }

    #[test]
    fn tail_last_line_partial_keeps_utf8_boundary() {
        // A single huge line with a multi-byte char near the cut point.
        let mut huge = "x".repeat(100);
        huge.push('é'); // 2-byte char
        huge.push_str(&"y".repeat(100));
        let r = truncate_tail(&huge, 10, 50);
        assert!(r.last_line_partial);
        assert!(r.output_bytes <= 50);
        assert!(r.text.is_char_boundary(0));
        // The kept text must itself be valid UTF-8 (guaranteed by the
        // type system since we sliced at a verified boundary), and must
        // be the *tail* of the original line.
        assert!(huge.ends_with(&r.text));
    }

    #[test]
    fn first_line_exceeds_limit_flagged() {
        let text = format!("{}\nshort", "a".repeat(200));
        let r = truncate_head(&text, 10, 50);
        assert!(r.first_line_exceeds_limit);
    }

    #[test]
    fn grep_line_cap_truncates_long_matches() {
        let line = "m".repeat(600);
        let capped = cap_grep_line(&line);
        assert!(capped.chars().count() <= GREP_LINE_CAP + 3);
        assert!(capped.ends_with("..."));
    }

    #[test]
    fn grep_line_cap_leaves_short_lines_alone() {
        assert_eq!(cap_grep_line("short match"), "short match");
    }

    #[test]
    fn format_trailer_none_when_not_truncated() {
        let r = truncate_head("a\nb", 100, 10_000);
        assert!(format_trailer(&r, 1).is_none());
    }

    #[test]
    fn format_trailer_reports_range() {
        let text = lines(10);
        let r = truncate_head(&text, 4, 10_000);
        let trailer = format_trailer(&r, 1).unwrap();
        assert!(trailer.contains("1-4"));
        assert!(trailer.contains("10 total"));
    }
}
