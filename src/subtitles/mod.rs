use serde::Serialize;

pub mod parser;

pub use parser::parse;

/// One subtitle cue. Times are seconds from stream start. Cues are produced
/// in one batch per document and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// All cues whose interval contains `position + offset`, in input order.
/// Overlapping cues are all returned; the renderer stacks them.
pub fn active_cues<'a>(cues: &'a [Cue], position: f64, offset: f64) -> Vec<&'a Cue> {
    let adjusted = position + offset;
    cues.iter()
        .filter(|c| adjusted >= c.start && adjusted <= c.end)
        .collect()
}

/// Escape cue markup except a fixed allow-list of inline styling tags
/// (bold/italic/underline/line-break), which are re-enabled after escaping.
/// Upstream subtitle sources are scraped content and cannot be trusted.
pub fn sanitize(text: &str) -> String {
    use std::sync::OnceLock;

    static OPEN_TAG: OnceLock<regex::Regex> = OnceLock::new();
    static CLOSE_TAG: OnceLock<regex::Regex> = OnceLock::new();

    let open = OPEN_TAG.get_or_init(|| regex::Regex::new(r"&lt;(b|i|u|br\s*/?)&gt;").unwrap());
    let close = CLOSE_TAG.get_or_init(|| regex::Regex::new(r"&lt;/(b|i|u)&gt;").unwrap());

    let escaped = text.replace('<', "&lt;").replace('>', "&gt;");
    let reopened = open.replace_all(&escaped, "<$1>");
    close.replace_all(&reopened, "</$1>").into_owned()
}
