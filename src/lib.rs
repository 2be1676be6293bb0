//! # lector-dj
//!
//! Classify scanned documents (identity documents, invoices, receipts, tax
//! forms, bank statements) with a few-shot prompted vision model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input path (file, directory or .zip)
//!  │
//!  ├─ 1. Scan     walk directories, extract archives into a confined temp dir
//!  ├─ 2. Render   images as one page, PDFs page by page via pdfium
//!  ├─ 3. Prime    few-shot history from examples/<CATEGORY>/*.jpg
//!  ├─ 4. Classify one backend exchange per page, with retry/backoff
//!  ├─ 5. Parse    fenced or bare JSON, else the UNKNOWN sentinel
//!  └─ 6. Output   results.json keyed by original file name
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lector_dj::{classify_to_file, BackendConfig, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads GEMINI_API_KEY
//!     let config = RunConfig::builder()
//!         .backend(BackendConfig::from_env("gemini", "gemini-2.0-flash"))
//!         .output_dir("output")
//!         .build()?;
//!     let stats = classify_to_file("input", &config).await?;
//!     eprintln!("{} documents, {} pages", stats.total_documents, stats.classified_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lector` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! lector-dj = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod fewshot;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod workspace;

/// File name of the persisted report inside the output directory.
pub const REPORT_FILE_NAME: &str = "results.json";

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{LlmBackend, Role, Turn, VisionBackend};
pub use classify::{classify_batch, classify_to_file, scan_only};
pub use config::{AggregationPolicy, BackendConfig, RunConfig, RunConfigBuilder};
pub use error::{ArchiveError, BackendError, ClassifyError, RenderError};
pub use output::{Category, ClassificationResult, DocumentReport, RunReport, RunStats};
pub use pipeline::input::{DocumentKind, RawDocument};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
