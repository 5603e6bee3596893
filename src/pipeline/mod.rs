//! Stages behind [`crate::converter::OcrService`], one page at a time.
//!
//! ```text
//! render ──▶ encode ──▶ ocr ──▶ postprocess
//! (pdfium)   (base64)   (HTTP)   (cleanup)
//! ```
//!
//! 1. [`render`]: count pages and rasterise one page; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]: PNG-encode the bitmap and wrap it as a data URL
//! 3. [`ocr`]: one `chat/completions` call; the only stage with network
//!    I/O. Retries live in the worker, not here.
//! 4. [`postprocess`]: deterministic text clean-up of the service output

pub mod encode;
pub mod ocr;
pub mod postprocess;
pub mod render;
