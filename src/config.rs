//! Configuration types for batch conversion.
//!
//! Two structs, each built once at startup and passed by reference into the
//! components that need them:
//!
//! * [`BatchConfig`]: where inputs, artifacts and logs live, and how the run
//!   is scheduled (concurrency, retry policy, wall-clock budget, item cap).
//! * [`ServiceConfig`]: how to reach the remote OCR service.
//!
//! Both use the builder pattern; `build()` validates everything up front so a
//! missing credential fails before any work starts rather than deep inside a
//! worker.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ── Retry policy ─────────────────────────────────────────────────────────

/// Per-page retry policy: `max_retries + 1` attempts, exponential backoff
/// with additive jitter between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Base backoff. Default: 2 s.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Total attempts per page.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay after failed attempt `attempt` (0-based):
    /// `base × 2^attempt + jitter` where `jitter ∈ [0, 1)` seconds.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let jitter = jitter.clamp(0.0, 0.999_999);
        self.base_delay.saturating_mul(factor) + Duration::from_secs_f64(jitter)
    }

    /// [`Self::delay`] with jitter drawn from the thread RNG.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        self.delay(attempt, rand::random::<f64>())
    }
}

// ── Batch configuration ──────────────────────────────────────────────────

/// Configuration for one batch invocation.
#[derive(Clone)]
pub struct BatchConfig {
    /// Root of the input document tree.
    pub input_root: PathBuf,

    /// Root under which artifacts mirror the input tree. Default: `data/processed/ocr_markdown`.
    pub output_root: PathBuf,

    /// Append-only conversion journal. Default: `data/manifests/ocr_manifest.jsonl`.
    pub journal_path: PathBuf,

    /// Parquet snapshot rebuilt from the journal. Default: `data/manifests/ocr_manifest.parquet`.
    pub snapshot_path: PathBuf,

    /// Accepted input extensions, compared case-insensitively. Default: `["pdf"]`.
    pub extensions: Vec<String>,

    /// Extension given to artifacts. Default: `md`.
    pub artifact_extension: String,

    /// Items converted concurrently. Default: 3.
    ///
    /// The remote service is the bottleneck and usually rate-limited; a small
    /// pool keeps throughput up without tripping 429s.
    pub concurrency: usize,

    /// Per-page retry policy.
    pub retry: RetryPolicy,

    /// Wall-clock budget for dispatching. Default: 2 h.
    ///
    /// Once elapsed, no new items start; in-flight items finish and the run
    /// ends normally. The next invocation picks up the remainder.
    pub budget: Duration,

    /// Cap on items dispatched this invocation. `None` = no cap.
    pub max_items: Option<usize>,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("data/raw"),
            output_root: PathBuf::from("data/processed/ocr_markdown"),
            journal_path: PathBuf::from("data/manifests/ocr_manifest.jsonl"),
            snapshot_path: PathBuf::from("data/manifests/ocr_manifest.parquet"),
            extensions: vec!["pdf".to_string()],
            artifact_extension: "md".to_string(),
            concurrency: 3,
            retry: RetryPolicy::default(),
            budget: Duration::from_secs(7200),
            max_items: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("input_root", &self.input_root)
            .field("output_root", &self.output_root)
            .field("journal_path", &self.journal_path)
            .field("snapshot_path", &self.snapshot_path)
            .field("extensions", &self.extensions)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("budget", &self.budget)
            .field("max_items", &self.max_items)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `path` has one of the accepted extensions.
    pub fn accepts(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn input_root(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.input_root = p.into();
        self
    }

    pub fn output_root(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.output_root = p.into();
        self
    }

    pub fn journal_path(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.journal_path = p.into();
        self
    }

    pub fn snapshot_path(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = p.into();
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_string())
            .collect();
        self
    }

    pub fn artifact_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.artifact_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_base_delay(mut self, d: Duration) -> Self {
        self.config.retry.base_delay = d;
        self
    }

    pub fn budget(mut self, d: Duration) -> Self {
        self.config.budget = d;
        self
    }

    /// `0` means no cap.
    pub fn max_items(mut self, n: usize) -> Self {
        self.config.max_items = (n > 0).then_some(n);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.extensions.is_empty() || c.extensions.iter().any(|e| e.is_empty()) {
            return Err(BatchError::InvalidConfig(
                "At least one non-empty input extension is required".into(),
            ));
        }
        if c.artifact_extension.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Artifact extension must not be empty".into(),
            ));
        }
        if c.budget.is_zero() {
            return Err(BatchError::InvalidConfig(
                "Wall-clock budget must be greater than zero".into(),
            ));
        }
        if c.input_root == c.output_root {
            return Err(BatchError::InvalidConfig(
                "Output root must differ from the input root".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Service configuration ────────────────────────────────────────────────

/// How to reach the remote OCR service (any OpenAI-compatible
/// `chat/completions` endpoint that accepts image input).
#[derive(Clone)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://api.opentyphoon.ai/v1`. Required.
    pub endpoint: String,

    /// Bearer credential. Required.
    pub api_key: String,

    /// Model identifier, recorded in every artifact header. Default: `typhoon-ocr`.
    pub model: String,

    /// Per-call timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Longest edge of the rendered page image in pixels. Default: 1800.
    pub max_rendered_pixels: u32,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per page. Default: 16384.
    pub max_tokens: usize,

    /// Custom OCR prompt. If None, uses [`crate::prompts::DEFAULT_OCR_PROMPT`].
    pub prompt: Option<String>,

    /// Directory containing the pdfium shared library. If None, the system
    /// library search path is used.
    pub pdfium_lib_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: "typhoon-ocr".to_string(),
            request_timeout_secs: 120,
            max_rendered_pixels: 1800,
            temperature: 0.1,
            max_tokens: 16384,
            prompt: None,
            pdfium_lib_dir: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into().trim().to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, BatchError> {
        let c = &self.config;
        if c.endpoint.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Missing OCR service endpoint.\nSet BATCH2MD_BASE_URL or pass --endpoint.".into(),
            ));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(BatchError::InvalidConfig(format!(
                "OCR service endpoint must be an HTTP/HTTPS URL, got '{}'",
                c.endpoint
            )));
        }
        if c.api_key.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Missing OCR service credential.\nSet BATCH2MD_API_KEY or pass --api-key.".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(BatchError::InvalidConfig("Model identifier must not be empty".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(BatchError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let p = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(p.delay(0, 0.0), Duration::from_secs(2));
        assert_eq!(p.delay(1, 0.0), Duration::from_secs(4));
        assert_eq!(p.delay(2, 0.0), Duration::from_secs(8));
        assert_eq!(p.attempts(), 4);
    }

    #[test]
    fn retry_jitter_is_additive_and_below_one_second() {
        let p = RetryPolicy::new(1, Duration::from_millis(500));
        assert_eq!(p.delay(0, 0.25), Duration::from_millis(750));
        let drawn = p.delay_with_jitter(0);
        assert!(drawn >= Duration::from_millis(500));
        assert!(drawn < Duration::from_millis(1500));
    }

    #[test]
    fn batch_defaults() {
        let c = BatchConfig::default();
        assert_eq!(c.concurrency, 3);
        assert_eq!(c.budget, Duration::from_secs(7200));
        assert_eq!(c.retry, RetryPolicy::default());
        assert!(c.max_items.is_none());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = BatchConfig::builder().concurrency(0).build().unwrap_err();
        assert!(err.to_string().contains("Concurrency"));
    }

    #[test]
    fn max_items_zero_means_unlimited() {
        let c = BatchConfig::builder().max_items(0).build().unwrap();
        assert_eq!(c.max_items, None);
        let c = BatchConfig::builder().max_items(5).build().unwrap();
        assert_eq!(c.max_items, Some(5));
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let c = BatchConfig::builder().extensions([".PDF", "tiff"]).build().unwrap();
        assert!(c.accepts(Path::new("a/b.pdf")));
        assert!(c.accepts(Path::new("scan.TIFF")));
        assert!(!c.accepts(Path::new("notes.txt")));
        assert!(!c.accepts(Path::new("README")));
    }

    #[test]
    fn service_requires_endpoint_and_key() {
        let err = ServiceConfig::builder().api_key("k").build().unwrap_err();
        assert!(err.to_string().contains("BATCH2MD_BASE_URL"), "got: {err}");

        let err = ServiceConfig::builder()
            .endpoint("https://ocr.example/v1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("BATCH2MD_API_KEY"), "got: {err}");
    }

    #[test]
    fn service_endpoint_is_normalised() {
        let c = ServiceConfig::builder()
            .endpoint(" https://ocr.example/v1/ ")
            .api_key("secret")
            .build()
            .unwrap();
        assert_eq!(c.endpoint, "https://ocr.example/v1");
        assert!(!format!("{c:?}").contains("secret"));
    }

    #[test]
    fn service_rejects_non_http_endpoint() {
        let err = ServiceConfig::builder()
            .endpoint("ftp://ocr.example")
            .api_key("k")
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }
}
