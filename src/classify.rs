//! Run orchestration: scan, rasterise, classify, aggregate, persist.
//!
//! [`classify_batch`] returns the report in memory; [`classify_to_file`]
//! additionally writes `results.json`. [`scan_only`] stops after scanning and
//! never contacts the backend.
//!
//! Only configuration errors, a missing input, directory setup failures and
//! a backend credential rejection abort a run. A document that fails to
//! render is recorded with zero results; a page whose backend call fails
//! after every retry is recorded as UNKNOWN.

use crate::backend::{resolve_backend, VisionBackend};
use crate::config::RunConfig;
use crate::error::{BackendError, ClassifyError};
use crate::fewshot::{load_examples, priming_history};
use crate::output::{ClassificationResult, DocumentReport, RunReport, RunStats};
use crate::pipeline::input::{ensure_input_exists, scan_input, RawDocument};
use crate::pipeline::llm::ClassificationClient;
use crate::pipeline::render::{self, RenderOptions};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Classify every document reachable from `input`.
///
/// # Errors
/// Returns `Err(ClassifyError)` only for fatal errors:
/// - invalid configuration or missing credential (before any I/O)
/// - input not found (before any directory is created)
/// - output or temp directory cannot be prepared
/// - the backend rejected the credentials
pub async fn classify_batch(
    input: impl AsRef<Path>,
    config: &RunConfig,
) -> Result<RunReport, ClassifyError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    info!("Starting run: {}", input.display());

    // ── Step 1: Backend ──────────────────────────────────────────────────
    let backend = resolve_backend(config)?;

    // ── Step 2: Input ────────────────────────────────────────────────────
    ensure_input_exists(input)?;

    // ── Step 3: Directories ──────────────────────────────────────────────
    std::fs::create_dir_all(&config.output_dir).map_err(|e| ClassifyError::ReportWriteFailed {
        path: config.output_dir.clone(),
        source: e,
    })?;
    let workspace = Workspace::create(&config.temp_dir)?;

    let result = run(input, config, backend, &workspace).await;

    if let Err(e) = workspace.cleanup() {
        warn!("Could not remove temp directory {}: {}", workspace.root().display(), e);
    }

    result.map(|mut report| {
        report.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Run complete: {} documents, {} pages ({} unknown), {}ms",
            report.stats.total_documents,
            report.stats.classified_pages,
            report.stats.unknown_pages,
            report.stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(&report.stats);
        }
        report
    })
}

/// Classify and write `results.json` into `config.output_dir`.
///
/// Uses atomic write (temp file + rename) so a reader never sees a partial
/// report.
pub async fn classify_to_file(
    input: impl AsRef<Path>,
    config: &RunConfig,
) -> Result<RunStats, ClassifyError> {
    let report = classify_batch(input, config).await?;
    let path = config.report_path();
    let write_err = |source| ClassifyError::ReportWriteFailed {
        path: path.clone(),
        source,
    };

    let json = serde_json::to_string_pretty(&report.documents)
        .map_err(|e| ClassifyError::Internal(format!("report serialisation: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&config.output_dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    info!("Report written to {}", path.display());
    Ok(report.stats)
}

/// List the documents a run would classify, without building a backend.
///
/// Archives are extracted into a temp directory that is removed before this
/// returns, so paths of extracted documents no longer exist afterwards; use
/// the labels.
pub fn scan_only(
    input: impl AsRef<Path>,
    config: &RunConfig,
) -> Result<Vec<RawDocument>, ClassifyError> {
    let input = input.as_ref();
    ensure_input_exists(input)?;
    let workspace = Workspace::create(&config.temp_dir)?;
    let docs = scan_input(input, &workspace, config.max_archive_depth)?;
    if let Err(e) = workspace.cleanup() {
        warn!("Could not remove temp directory {}: {}", workspace.root().display(), e);
    }
    Ok(docs)
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run(
    input: &Path,
    config: &RunConfig,
    backend: Arc<dyn VisionBackend>,
    workspace: &Workspace,
) -> Result<RunReport, ClassifyError> {
    // ── Step 4: Priming history ──────────────────────────────────────────
    let examples = load_examples(&config.examples_dir, config.max_rendered_pixels);
    let client = ClassificationClient::new(backend, priming_history(&examples), config);
    debug!("Priming history: {} turns", client.history_len());

    // ── Step 5: Scan ─────────────────────────────────────────────────────
    let docs = scan_input(input, workspace, config.max_archive_depth)?;
    let total = docs.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let render_options = RenderOptions {
        max_rendered_pixels: config.max_rendered_pixels,
        pdfium_lib_path: config.pdfium_lib_path.clone(),
    };

    let mut documents: BTreeMap<String, DocumentReport> = BTreeMap::new();
    let mut stats = RunStats {
        total_documents: total,
        ..Default::default()
    };

    // ── Step 6: Per document ─────────────────────────────────────────────
    for (idx, doc) in docs.iter().enumerate() {
        if let Some(ref cb) = config.progress_callback {
            cb.on_document_start(&doc.label, idx + 1, total);
        }
        let label = unique_label(&documents, &doc.label);

        let pages = match render::rasterize(doc, workspace, &render_options).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("{}: {}", label, e);
                stats.failed_documents += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_document_error(&label, &e.to_string());
                }
                documents.insert(label, DocumentReport::default());
                continue;
            }
        };

        let mut results = Vec::with_capacity(pages.len());
        for page in &pages {
            let result = match client.query_for(page) {
                Err(e) => {
                    warn!("{} page {}: {}", label, page.page_num, e);
                    ClassificationResult::unrecognized(e.to_string())
                }
                Ok(query) => match client.classify(page, &query).await {
                    Ok(result) => result,
                    Err(e @ BackendError::Auth(_)) => {
                        return Err(ClassifyError::BackendUnavailable(e));
                    }
                    Err(e) => {
                        warn!("{} page {}: backend unavailable: {}", label, page.page_num, e);
                        stats.backend_failures += 1;
                        ClassificationResult::unrecognized(format!("backend unavailable: {e}"))
                    }
                },
            };
            stats.classified_pages += 1;
            if result.is_unknown() {
                stats.unknown_pages += 1;
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_classified(&label, page.page_num, &result);
            }
            results.push(result);
        }

        debug!("{}: {} page results", label, results.len());
        documents.insert(label, DocumentReport::new(results).aggregate(config.aggregation));
    }

    Ok(RunReport { documents, stats })
}

/// `label`, or `label~2`, `label~3`… if already taken.
fn unique_label(documents: &BTreeMap<String, DocumentReport>, label: &str) -> String {
    if !documents.contains_key(label) {
        return label.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{label}~{n}");
        if !documents.contains_key(&candidate) {
            warn!("Duplicate document name '{}' reported as '{}'", label, candidate);
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_label_suffixes_repeats() {
        let mut documents = BTreeMap::new();
        assert_eq!(unique_label(&documents, "doc.jpg"), "doc.jpg");
        documents.insert("doc.jpg".to_string(), DocumentReport::default());
        assert_eq!(unique_label(&documents, "doc.jpg"), "doc.jpg~2");
        documents.insert("doc.jpg~2".to_string(), DocumentReport::default());
        assert_eq!(unique_label(&documents, "doc.jpg"), "doc.jpg~3");
        assert_eq!(unique_label(&documents, "other.png"), "other.png");
    }
}
