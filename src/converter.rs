//! The seam between the batch pipeline and the remote conversion service.
//!
//! Workers only ever see a [`PageConverter`]. [`OcrService`] is the
//! production implementation (pdfium rasterisation + an OpenAI-compatible
//! vision endpoint); tests substitute scripted converters.

use crate::config::ServiceConfig;
use crate::error::{AttemptError, BatchError};
use crate::pipeline::{encode, ocr, postprocess, render};
use crate::prompts::DEFAULT_OCR_PROMPT;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Converts single pages of a document to Markdown.
#[async_trait]
pub trait PageConverter: Send + Sync {
    /// Identifier recorded in every artifact header.
    fn model(&self) -> &str;

    /// Number of pages in `path`, or `None` when it cannot be determined.
    async fn page_count(&self, path: &Path) -> Option<usize>;

    /// Convert page `page` (1-based) of `path`. One call = one attempt.
    async fn convert_page(&self, path: &Path, page: usize) -> Result<String, AttemptError>;
}

/// Production converter: render → encode → OCR service → clean-up.
pub struct OcrService {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl OcrService {
    pub fn new(config: ServiceConfig) -> Result<Self, BatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BatchError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PageConverter for OcrService {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn page_count(&self, path: &Path) -> Option<usize> {
        render::page_count(path, self.config.pdfium_lib_dir.as_deref()).await
    }

    async fn convert_page(&self, path: &Path, page: usize) -> Result<String, AttemptError> {
        let image = render::render_page(
            path,
            page,
            self.config.max_rendered_pixels,
            self.config.pdfium_lib_dir.as_deref(),
        )
        .await?;
        let data_url = encode::encode_page(&image).map_err(|e| AttemptError::Render {
            page,
            detail: format!("image encoding failed: {e}"),
        })?;

        let prompt = self.config.prompt.as_deref().unwrap_or(DEFAULT_OCR_PROMPT);
        let raw = ocr::request_page(&self.client, &self.config, prompt, data_url).await?;
        debug!("{}: page {} → {} chars", path.display(), page, raw.len());
        Ok(postprocess::clean_markdown(&raw))
    }
}
