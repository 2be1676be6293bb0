//! Pipeline stages for document classification.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ render ──▶ encode ──▶ llm ──▶ parse
//! (scan)    (zip)      (pdfium)   (base64)  (VLM)   (JSON)
//! ```
//!
//! 1. [`input`]: walk the input path and collect supported documents
//! 2. [`extract`]: flatten ZIP archives into the temp directory, refusing
//!    any entry that would land outside it
//! 3. [`render`]: decode images and rasterise PDF pages; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 4. [`encode`]: downscale, PNG-encode and base64-wrap each page
//! 5. [`llm`]: replay the priming history and send the page, with
//!    timeout and retry/backoff; the only stage with network I/O
//! 6. [`parse`]: decode the reply into a classification, or the UNKNOWN
//!    sentinel

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
