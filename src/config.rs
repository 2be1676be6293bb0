//! Configuration types for a classification run.
//!
//! All run behaviour is controlled through [`RunConfig`], built via its
//! [`RunConfigBuilder`]. Backend identity and credentials live in a separate
//! [`BackendConfig`] so that the environment is read in exactly one place
//! ([`BackendConfig::from_env`]) and everything downstream receives explicit
//! values.

use crate::backend::VisionBackend;
use crate::error::ClassifyError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Which classification backend to talk to, and with which credential.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Provider name understood by `edgequake_llm::ProviderFactory`
    /// (`"gemini"`, `"openai"`, `"anthropic"`, `"ollama"`, ...).
    pub provider: String,
    /// Vision-capable model identifier.
    pub model: String,
    /// Credential for providers that need one. `None` for local providers.
    ///
    /// Checked for presence before any I/O, then passed straight to the
    /// provider constructor ([`crate::backend::build_provider`]).
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BackendConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Environment variable holding the credential for `provider`, or `None`
    /// when the provider runs locally or configures itself (`azure` reads its
    /// endpoint and key through `ProviderFactory`).
    pub fn credential_var(provider: &str) -> Option<&'static str> {
        match provider.to_lowercase().as_str() {
            "gemini" | "google" => Some("GEMINI_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "mistral" => Some("MISTRAL_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            _ => None,
        }
    }

    /// Build a config for `provider`/`model`, reading its credential from the
    /// provider's standard environment variable.
    pub fn from_env(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let provider = provider.into();
        let api_key = Self::credential_var(&provider)
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty());
        Self {
            provider,
            model: model.into(),
            api_key,
        }
    }

    /// Check that a credential is present when the provider requires one.
    pub fn validate(&self) -> Result<(), ClassifyError> {
        if self.provider.trim().is_empty() {
            return Err(ClassifyError::InvalidConfig("provider name is empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ClassifyError::InvalidConfig("model name is empty".into()));
        }
        if let Some(var) = Self::credential_var(&self.provider) {
            if self.api_key.as_deref().map_or(true, str::is_empty) {
                return Err(ClassifyError::MissingCredential {
                    provider: self.provider.clone(),
                    var: var.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// How the per-page results of one document are written to the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationPolicy {
    /// Keep one result per page, in page order. (default)
    #[default]
    PerPage,
    /// Keep only the first page's result.
    FirstPage,
    /// Collapse to the most frequent recognised category.
    MajorityVote,
}

/// Configuration for a classification run.
///
/// Built via [`RunConfig::builder()`] or using [`RunConfig::default()`].
///
/// # Example
/// ```rust
/// use lector_dj::{AggregationPolicy, RunConfig};
///
/// let config = RunConfig::builder()
///     .output_dir("out")
///     .temp_dir("scratch")
///     .aggregation(AggregationPolicy::MajorityVote)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Directory receiving `results.json`. Created if missing. Default: `output`.
    pub output_dir: PathBuf,

    /// The confined temp directory. Destroyed and recreated at run start,
    /// destroyed at run end. Default: `temp_extracted`.
    pub temp_dir: PathBuf,

    /// Few-shot example library: one subdirectory per category label.
    /// A missing directory means zero examples. Default: `examples`.
    pub examples_dir: PathBuf,

    /// Longest edge of a rendered PDF page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// How many archive levels are opened: 1 = only archives found in the
    /// input, 2 = those plus archives found inside them. Default: 2.
    pub max_archive_depth: usize,

    /// Report shape for multi-page documents. Default: per page.
    pub aggregation: AggregationPolicy,

    /// Backend identity and credential.
    pub backend: BackendConfig,

    /// Pre-constructed backend. Takes precedence over `backend`.
    pub vision_backend: Option<Arc<dyn VisionBackend>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per reply. The JSON verdict is short. Default: 1024.
    pub max_tokens: usize,

    /// Retries after a retryable backend failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call backend timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Explicit pdfium library location. When `None`, the library next to
    /// the executable and then the system library are tried.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp_extracted"),
            examples_dir: PathBuf::from("examples"),
            max_rendered_pixels: 2000,
            max_archive_depth: 2,
            aggregation: AggregationPolicy::default(),
            backend: BackendConfig::default(),
            vision_backend: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("output_dir", &self.output_dir)
            .field("temp_dir", &self.temp_dir)
            .field("examples_dir", &self.examples_dir)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_archive_depth", &self.max_archive_depth)
            .field("aggregation", &self.aggregation)
            .field("backend", &self.backend)
            .field(
                "vision_backend",
                &self.vision_backend.as_ref().map(|_| "<dyn VisionBackend>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }

    /// Where the report is written.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(crate::REPORT_FILE_NAME)
    }
}

/// Builder for [`RunConfig`].
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn examples_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.examples_dir = dir.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_archive_depth(mut self, depth: usize) -> Self {
        self.config.max_archive_depth = depth;
        self
    }

    pub fn aggregation(mut self, policy: AggregationPolicy) -> Self {
        self.config.aggregation = policy;
        self
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn vision_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.vision_backend = Some(backend);
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// The temp directory is wiped on every run, so it must not coincide
    /// with, or contain, the output directory.
    pub fn build(self) -> Result<RunConfig, ClassifyError> {
        let c = &self.config;
        if c.temp_dir.as_os_str().is_empty() {
            return Err(ClassifyError::InvalidConfig("temp directory is empty".into()));
        }
        if c.temp_dir.parent().is_none() {
            return Err(ClassifyError::InvalidConfig(format!(
                "temp directory '{}' is a filesystem root",
                c.temp_dir.display()
            )));
        }
        if overlaps(&c.temp_dir, &c.output_dir) {
            return Err(ClassifyError::InvalidConfig(format!(
                "temp directory '{}' must not contain the output directory '{}'",
                c.temp_dir.display(),
                c.output_dir.display()
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ClassifyError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ClassifyError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// Lexical check: is `outer` equal to or an ancestor of `inner`?
fn overlaps(outer: &Path, inner: &Path) -> bool {
    let strip = |p: &Path| -> PathBuf {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    strip(inner).starts_with(strip(outer))
}
