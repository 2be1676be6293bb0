//! Input scanning: turn a user-supplied path into the raw documents to process.
//!
//! Three input shapes are accepted:
//!
//! * a supported file (`.jpg`, `.jpeg`, `.png`, `.pdf`): the sole document;
//! * a `.zip` archive: everything it contains, via [`super::extract`];
//! * a directory: walked recursively, each file treated as above, so
//!   archives at any depth are extracted independently.
//!
//! Anything else is silently excluded. Extracted files go through the same
//! extension rules, and archives found inside archives are opened up to
//! [`crate::config::RunConfig::max_archive_depth`] levels.

use super::extract::extract_archive;
use crate::error::ClassifyError;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// The two document shapes the rasteriser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Image,
    Pdf,
}

impl DocumentKind {
    /// Classify by extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path).as_deref() {
            Some("jpg" | "jpeg" | "png") => Some(DocumentKind::Image),
            Some("pdf") => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

/// A file to classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Location in the input tree or in the temp directory.
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// Original file name. Archive extraction discards directories, so this
    /// is what the report is keyed by.
    pub label: String,
}

impl RawDocument {
    /// `label` is the name the document had before extraction; its kind is
    /// still taken from `path`.
    fn labelled(path: PathBuf, label: String) -> Option<Self> {
        let kind = DocumentKind::from_path(&path)?;
        Some(Self { path, kind, label })
    }

    /// File name without extension, used for rendered page names.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.label.clone())
    }
}

/// Whether `path` names a ZIP archive.
pub fn is_archive(path: &Path) -> bool {
    extension(path).as_deref() == Some("zip")
}

/// Fail fast with [`ClassifyError::InputNotFound`] if `input` is absent.
pub fn ensure_input_exists(input: &Path) -> Result<(), ClassifyError> {
    if input.exists() {
        Ok(())
    } else {
        Err(ClassifyError::InputNotFound {
            path: input.to_path_buf(),
        })
    }
}

/// Collect every raw document reachable from `input`.
///
/// The order of the result is unspecified.
pub fn scan_input(
    input: &Path,
    workspace: &Workspace,
    max_archive_depth: usize,
) -> Result<Vec<RawDocument>, ClassifyError> {
    ensure_input_exists(input)?;
    // Documents carry absolute paths, whatever the caller passed.
    let absolute = std::path::absolute(input).map_err(|_| ClassifyError::InputNotFound {
        path: input.to_path_buf(),
    })?;
    let input = absolute.as_path();

    let scanner = Scanner {
        workspace,
        max_archive_depth,
    };
    let mut docs = Vec::new();

    if input.is_file() {
        scanner.visit_path(input.to_path_buf(), 0, &mut docs);
    } else {
        // The temp directory may sit inside the input tree; its contents are
        // our own output and must not be scanned.
        let walker = WalkDir::new(input)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_workspace_dir(e, workspace));
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    scanner.visit_path(entry.into_path(), 0, &mut docs);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path during scan: {}", e),
            }
        }
    }

    info!("Scan of {} found {} documents", input.display(), docs.len());
    Ok(docs)
}

struct Scanner<'a> {
    workspace: &'a Workspace,
    max_archive_depth: usize,
}

impl Scanner<'_> {
    fn visit_path(&self, path: PathBuf, depth: usize, docs: &mut Vec<RawDocument>) {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.visit_file(path, label, depth, docs);
    }

    /// `depth` is the number of archives already opened to reach `path`.
    fn visit_file(&self, path: PathBuf, label: String, depth: usize, docs: &mut Vec<RawDocument>) {
        if is_archive(&path) {
            self.visit_archive(&path, depth, docs);
        } else if let Some(doc) = RawDocument::labelled(path.clone(), label) {
            debug!("Found {:?} document {}", doc.kind, path.display());
            docs.push(doc);
        } else {
            debug!("Ignoring unsupported file {}", path.display());
        }
    }

    fn visit_archive(&self, path: &Path, depth: usize, docs: &mut Vec<RawDocument>) {
        if depth >= self.max_archive_depth {
            warn!(
                "Not opening {}: archive nesting limit ({}) reached",
                path.display(),
                self.max_archive_depth
            );
            return;
        }
        match extract_archive(path, self.workspace) {
            Ok(files) => {
                for file in files {
                    self.visit_file(file.path, file.name, depth + 1, docs);
                }
            }
            Err(e) => warn!("Skipping archive: {}", e),
        }
    }
}

fn is_workspace_dir(entry: &walkdir::DirEntry, workspace: &Workspace) -> bool {
    entry.file_type().is_dir()
        && entry
            .path()
            .canonicalize()
            .map_or(false, |p| p == workspace.root())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// `outer.zip` holding `inner.zip` holding `x.png`.
    fn nested_archive(dir: &Path) -> PathBuf {
        let inner = zip_bytes(&[("x.png", &b"png"[..])]);
        let outer = dir.join("outer.zip");
        std::fs::write(&outer, zip_bytes(&[("inner.zip", &inner[..]), ("top.png", &b"png"[..])])).unwrap();
        outer
    }

    fn labels(docs: Vec<RawDocument>) -> Vec<String> {
        let mut labels: Vec<_> = docs.into_iter().map(|d| d.label).collect();
        labels.sort();
        labels
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_path(Path::new("a.JPG")), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_path(Path::new("a.jpeg")), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_path(Path::new("a.Png")), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("a.txt")), None);
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn archive_detection() {
        assert!(is_archive(Path::new("bundle.zip")));
        assert!(is_archive(Path::new("BUNDLE.ZIP")));
        assert!(!is_archive(Path::new("bundle.tar.gz")));
    }

    #[test]
    fn stem_drops_extension() {
        let doc = RawDocument::labelled(PathBuf::from("/in/tax_2023.pdf"), "tax_2023.pdf".into())
            .unwrap();
        assert_eq!(doc.stem(), "tax_2023");
        assert_eq!(doc.label, "tax_2023.pdf");
    }

    #[test]
    fn missing_input_fails_fast() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let err = scan_input(&base.path().join("nope"), &ws, 2).unwrap_err();
        assert!(matches!(err, ClassifyError::InputNotFound { .. }));
    }

    #[test]
    fn single_supported_file_is_the_only_document() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("id.png");
        std::fs::write(&file, b"png").unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let docs = scan_input(&file, &ws, 2).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind, DocumentKind::Image);
        assert_eq!(docs[0].path, file);
    }

    #[test]
    fn single_unsupported_file_yields_nothing() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("notes.txt");
        std::fs::write(&file, b"hello").unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        assert!(scan_input(&file, &ws, 2).unwrap().is_empty());
    }

    #[test]
    fn directory_walk_is_recursive() {
        let base = TempDir::new().unwrap();
        let input = base.path().join("input");
        std::fs::create_dir_all(input.join("a/b")).unwrap();
        std::fs::write(input.join("top.jpg"), b"x").unwrap();
        std::fs::write(input.join("a/b/deep.pdf"), b"x").unwrap();
        std::fs::write(input.join("a/skip.txt"), b"x").unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let mut labels: Vec<_> = scan_input(&input, &ws, 2)
            .unwrap()
            .into_iter()
            .map(|d| d.label)
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["deep.pdf", "top.jpg"]);
    }

    #[test]
    fn corrupt_archive_does_not_abort_scan() {
        let base = TempDir::new().unwrap();
        let input = base.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("broken.zip"), b"not a zip").unwrap();
        std::fs::write(input.join("ok.png"), b"x").unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let docs = scan_input(&input, &ws, 2).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].label, "ok.png");
    }

    #[test]
    fn nested_archive_opened_within_depth() {
        let base = TempDir::new().unwrap();
        let outer = nested_archive(base.path());
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let docs = scan_input(&outer, &ws, 2).unwrap();
        assert_eq!(labels(docs), vec!["top.png", "x.png"]);
    }

    #[test]
    fn nested_archive_beyond_depth_is_not_opened() {
        let base = TempDir::new().unwrap();
        let outer = nested_archive(base.path());

        let ws = Workspace::create(base.path().join("temp")).unwrap();
        assert_eq!(labels(scan_input(&outer, &ws, 1).unwrap()), vec!["top.png"]);

        let ws = Workspace::create(base.path().join("temp")).unwrap();
        assert!(scan_input(&outer, &ws, 0).unwrap().is_empty());
    }

    #[test]
    fn archive_holding_its_own_name_does_not_loop() {
        let base = TempDir::new().unwrap();
        let innermost = zip_bytes(&[("deep.png", &b"png"[..])]);
        let middle = zip_bytes(&[("bundle.zip", &innermost[..]), ("mid.png", &b"png"[..])]);
        let outer = base.path().join("bundle.zip");
        std::fs::write(&outer, zip_bytes(&[("bundle.zip", &middle[..])])).unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let docs = scan_input(&outer, &ws, 3).unwrap();
        assert_eq!(labels(docs), vec!["deep.png", "mid.png"]);
    }

    #[test]
    fn same_name_in_two_archives_yields_two_files() {
        let base = TempDir::new().unwrap();
        let input = base.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("one.zip"), zip_bytes(&[("doc.png", &b"one"[..])])).unwrap();
        std::fs::write(input.join("two.zip"), zip_bytes(&[("doc.png", &b"two"[..])])).unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();

        let docs = scan_input(&input, &ws, 2).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.label == "doc.png"));
        assert_ne!(docs[0].path, docs[1].path);
        let mut bodies: Vec<_> = docs.iter().map(|d| std::fs::read(&d.path).unwrap()).collect();
        bodies.sort();
        assert_eq!(bodies, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
