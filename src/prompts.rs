//! Prompt sent with every page image.
//!
//! Callers can override it via [`crate::config::ServiceConfig::prompt`]; the
//! constant here is used only when no override is provided.

/// Default OCR prompt. Asks for faithful transcription in reading order,
/// Markdown structure, and HTML tables (OCR models handle merged cells far
/// better in HTML than in GFM pipes).
pub const DEFAULT_OCR_PROMPT: &str = r#"Extract all text from this document page and return it as clean Markdown.

Rules:
1. Transcribe every word exactly as printed, in natural reading order. Do not translate, summarise, or correct the text.
2. Use Markdown headings, lists, and emphasis to mirror the visual structure.
3. Render tables as HTML <table> markup, preserving merged cells with rowspan/colspan.
4. Wrap checkboxes as ☐ / ☑ and keep form field labels next to their values.
5. Describe figures briefly inside <figure>…</figure>; do not invent content.
6. Omit running headers, footers, and page numbers.
7. Output only the Markdown. No code fences, no commentary."#;
