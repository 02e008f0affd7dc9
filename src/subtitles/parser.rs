use std::sync::OnceLock;

use regex::Regex;

use super::Cue;

/// Timestamp line: `[H:]MM:SS[.,]mmm --> [H:]MM:SS[.,]mmm`. Hours optional,
/// fractional separator is `.` (WebVTT) or `,` (SubRip).
fn timing_regex() -> &'static Regex {
    static TIMING: OnceLock<Regex> = OnceLock::new();
    TIMING.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?:(\d{1,2}):)?(\d{2}):(\d{2})[.,](\d{3})
            \s*-->\s*
            (?:(\d{1,2}):)?(\d{2}):(\d{2})[.,](\d{3})",
        )
        .unwrap()
    })
}

fn capture_seconds(caps: &regex::Captures<'_>, base: usize) -> f64 {
    let field = |i: usize| -> f64 {
        caps.get(base + i)
            .map(|m| m.as_str().parse::<f64>().unwrap_or(0.0))
            .unwrap_or(0.0)
    };
    field(0) * 3600.0 + field(1) * 60.0 + field(2) + field(3) / 1000.0
}

/// Parse a SubRip or WebVTT document into a cue batch.
///
/// Pure and total: malformed timestamp lines are skipped and scanning
/// resumes at the next line, so the worst input yields an empty batch, not
/// an error. Cues come out in input order; overlaps are preserved.
pub fn parse(raw: &str) -> Vec<Cue> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let mut cues = Vec::new();
    let mut i = 0;

    // WebVTT header block: the marker line plus everything up to the first
    // blank line.
    if lines
        .first()
        .map(|l| l.trim_start_matches('\u{feff}').trim().starts_with("WEBVTT"))
        .unwrap_or(false)
    {
        i = 1;
        while i < lines.len() && !lines[i].trim().is_empty() {
            i += 1;
        }
    }

    while i < lines.len() {
        // Skip blank lines and bare numeric cue-index lines.
        while i < lines.len() {
            let trimmed = lines[i].trim();
            let is_index = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
            if trimmed.is_empty() || is_index {
                i += 1;
            } else {
                break;
            }
        }
        if i >= lines.len() {
            break;
        }

        let caps = match timing_regex().captures(lines[i]) {
            Some(caps) => caps,
            None => {
                i += 1;
                continue;
            }
        };

        let start = capture_seconds(&caps, 1);
        let end = capture_seconds(&caps, 5);
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            text_lines.push(lines[i].trim());
            i += 1;
        }

        if !text_lines.is_empty() && end >= start {
            cues.push(Cue {
                start,
                end,
                text: text_lines.join("\n"),
            });
        }
    }

    cues
}
