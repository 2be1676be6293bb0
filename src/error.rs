//! Error types for the lector-dj library.
//!
//! Four error types reflect four blast radii:
//!
//! * [`ClassifyError`]: **Fatal**: the run cannot proceed at all (missing
//!   credential, input path absent, workspace not creatable, report not
//!   writable). Returned as `Err(ClassifyError)` from the top-level entry
//!   points in [`crate::classify`].
//!
//! * [`ArchiveError`]: fatal for **one archive**: the scanner logs it and
//!   moves on to the sibling inputs.
//!
//! * [`RenderError`]: fatal for **one document**: the document yields zero
//!   pages and the batch continues.
//!
//! * [`BackendError`]: fatal for **one backend call**. Retryable kinds are
//!   retried by [`crate::pipeline::llm::ClassificationClient`]; only
//!   [`BackendError::Auth`] escalates to a [`ClassifyError`].
//!
//! Malformed classification replies are not errors at all; they become the
//! sentinel result (see [`crate::pipeline::parse`]).

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// Status codes and wording that mark a rejected credential. Codes must stand
/// alone so that "4013ms" or "req_401abc" do not count.
static AUTH_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|invalid[ _]api[ _]key").unwrap()
});

/// All fatal errors returned by the lector-dj library.
#[derive(Debug, Error)]
pub enum ClassifyError {
    // ── Configuration errors ─────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The credential required by the configured provider is absent.
    #[error("Missing credential for provider '{provider}'.\nSet {var} and retry.")]
    MissingCredential { provider: String, var: String },

    /// The provider factory refused to build the configured provider.
    #[error("Classification provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ─────────────────────────────────────────────────────
    /// Input path was not found.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    // ── Workspace / output errors ────────────────────────────────────────
    /// The confined temp directory could not be (re)created.
    #[error("Failed to prepare temp directory '{path}': {source}")]
    WorkspaceSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output report.
    #[error("Failed to write report '{path}': {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Backend errors ───────────────────────────────────────────────────
    /// The backend rejected our credentials; every further call would fail.
    #[error("Classification backend unavailable: {0}")]
    BackendUnavailable(#[source] BackendError),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// An archive could not be opened or its directory could not be read.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open archive '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Why a document produced no pages.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// The file could not be read or decoded at all.
    #[error("'{path}' is unreadable: {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The file was read but its encoding is not supported (encrypted PDF,
    /// unknown image codec).
    #[error("'{path}' uses an unsupported format: {detail}")]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// The PDF opened but has no pages.
    #[error("'{path}' contains no pages")]
    EmptyDocument { path: PathBuf },

    /// pdfium could not be loaded.
    #[error(
        "PDF engine unavailable: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    EngineUnavailable(String),

    /// A rendered page could not be written to the temp directory.
    #[error("Failed to save page {page} of '{path}': {detail}")]
    SaveFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// A page could not be PNG-encoded for the backend. No call was made.
    #[error("Failed to encode page {page} of '{path}': {detail}")]
    EncodeFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },
}

/// A single backend exchange failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BackendError {
    /// The call did not finish within the configured timeout.
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Transport or provider error (5xx, 429, connection reset, ...).
    #[error("backend request failed: {0}")]
    Request(String),

    /// 401/403: the credential is wrong. Retrying cannot help.
    #[error("backend rejected credentials: {0}")]
    Auth(String),
}

impl BackendError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Auth(_))
    }

    /// Map a provider error message onto our taxonomy.
    ///
    /// Used for provider errors that carry no typed auth variant: auth
    /// failures are recognised by a standalone 401/403 or their wording.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if AUTH_MARKER.is_match(&message) {
            BackendError::Auth(message)
        } else {
            BackendError::Request(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_not_found_display() {
        let e = ClassifyError::InputNotFound {
            path: PathBuf::from("/no/such/dir"),
        };
        assert!(e.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn missing_credential_names_variable() {
        let e = ClassifyError::MissingCredential {
            provider: "gemini".into(),
            var: "GEMINI_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("gemini"), "got: {msg}");
        assert!(msg.contains("GEMINI_API_KEY"), "got: {msg}");
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        let e = BackendError::from_provider_message("HTTP 401 Unauthorized");
        assert!(matches!(e, BackendError::Auth(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn auth_wording_is_recognised() {
        for msg in [
            "API error: 403 Forbidden",
            "status=401",
            "Invalid API key provided",
            "error code: invalid_api_key",
        ] {
            assert!(
                matches!(BackendError::from_provider_message(msg), BackendError::Auth(_)),
                "{msg}"
            );
        }
    }

    #[test]
    fn status_digits_inside_other_numbers_are_not_auth() {
        for msg in [
            "retry after 4013ms",
            "request req_401abc failed with 500",
            "HTTP 503, trace 14032",
        ] {
            let e = BackendError::from_provider_message(msg);
            assert!(matches!(e, BackendError::Request(_)), "{msg} -> {e:?}");
        }
    }

    #[test]
    fn transport_errors_are_retryable() {
        let e = BackendError::from_provider_message("HTTP 503 Service Unavailable");
        assert!(matches!(e, BackendError::Request(_)));
        assert!(e.is_retryable());
        assert!(BackendError::Timeout { secs: 5 }.is_retryable());
    }

    #[test]
    fn render_error_display() {
        let e = RenderError::SaveFailed {
            path: PathBuf::from("scan.pdf"),
            page: 3,
            detail: "disk full".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
        assert!(msg.contains("disk full"), "got: {msg}");
    }
}
