//! Deterministic clean-up of service-generated page Markdown.
//!
//! OCR models occasionally wrap their answer in a ```` ```markdown ```` fence,
//! return CRLF line endings, pad lines with spaces, or leak zero-width
//! characters. None of that is content. The passes below remove it without
//! touching the text itself, and each is a pure `&str → String`.
//!
//! Order matters: fences are stripped before line endings are normalised so
//! the fence regex sees the raw answer, and trailing-newline handling runs
//! last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every clean-up pass to one page of service output.
///
/// 1. Strip an outer Markdown fence
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of 3+ blank lines to one blank line
/// 5. Drop invisible Unicode (zero-width spaces, BOM, soft hyphen)
/// 6. Trim surrounding blank lines; no trailing newline (the artifact
///    assembler owns inter-page spacing)
pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_line_ends(&s);
    let s = collapse_blank_runs(&s);
    let s = drop_invisible(&s);
    s.trim_matches('\n').to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_line_ends(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

const INVISIBLE: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}', '\u{00AD}'];

fn drop_invisible(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let raw = "```markdown\n# Budget\n\n| a | b |\n```\n";
        assert_eq!(clean_markdown(raw), "# Budget\n\n| a | b |");
    }

    #[test]
    fn keeps_inner_code_fences() {
        let raw = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(clean_markdown(raw), raw);
    }

    #[test]
    fn normalises_crlf_and_trailing_spaces() {
        assert_eq!(clean_markdown("a  \r\nb\t\r\nc"), "a\nb\nc");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_markdown("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn drops_zero_width_characters() {
        assert_eq!(clean_markdown("\u{FEFF}ห\u{200B}น้า"), "หน้า");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_markdown("\n\n  \n"), "");
    }
}
