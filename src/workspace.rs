//! The confined temp directory owned by a single run.
//!
//! [`Workspace::create`] wipes any leftover directory of the same name and
//! creates it afresh; dropping the `Workspace` removes it again. Every file
//! the extractor or the rasteriser writes must resolve underneath
//! [`Workspace::root`], which is stored in canonical form so containment
//! checks compare like with like.
//!
//! Extracted files live directly under the root. Names are handed out by
//! [`Workspace::claim`] so that two archives holding the same file name never
//! share one extracted file.

use crate::error::ClassifyError;
use std::borrow::Cow;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Subdirectory of the workspace receiving rendered PDF pages, kept apart
/// from extracted files so a render never overwrites an input.
pub const PAGES_DIR: &str = "pages";

/// Scratch directory with scoped lifetime.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    claimed: Mutex<HashSet<String>>,
}

impl Workspace {
    /// Destroy `path` if it exists, then create it empty.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ClassifyError> {
        let path = path.as_ref();
        let setup_err = |source| ClassifyError::WorkspaceSetup {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::remove_dir_all(path) {
            Ok(()) => debug!("Removed stale temp directory {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(setup_err(e)),
        }
        std::fs::create_dir_all(path).map_err(setup_err)?;
        let root = path.canonicalize().map_err(setup_err)?;

        debug!("Temp directory ready: {}", root.display());
        Ok(Self {
            root,
            claimed: Mutex::new(HashSet::from([PAGES_DIR.to_string()])),
        })
    }

    /// Canonical path of the temp directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a file directly under the root for `name`.
    ///
    /// The first claim gets `root/name`; later claims of the same name get
    /// `root/stem~2.ext`, `root/stem~3.ext`... Only names handed out here are
    /// tracked, not files already on disk.
    pub fn claim(&self, name: &str) -> PathBuf {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.insert(name.to_string()) {
            return self.root.join(name);
        }

        let path = Path::new(name);
        let stem = path.file_stem().map_or(Cow::Borrowed(name), |s| s.to_string_lossy());
        let ext = path.extension().map(|e| e.to_string_lossy());
        let mut n = 2;
        loop {
            let candidate = match ext {
                Some(ref ext) => format!("{stem}~{n}.{ext}"),
                None => format!("{stem}~{n}"),
            };
            if claimed.insert(candidate.clone()) {
                debug!("'{}' already taken, using '{}'", name, candidate);
                return self.root.join(candidate);
            }
            n += 1;
        }
    }

    /// Whether `candidate` resolves to a strict descendant of the root.
    ///
    /// If `candidate` exists (possibly as a symlink) it is fully resolved;
    /// otherwise its parent is resolved and the file name re-attached.
    pub fn contains(&self, candidate: &Path) -> bool {
        let resolved = match candidate.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                let (Some(parent), Some(name)) = (candidate.parent(), candidate.file_name()) else {
                    return false;
                };
                match parent.canonicalize() {
                    Ok(p) => p.join(name),
                    Err(_) => return false,
                }
            }
        };
        resolved != self.root && resolved.starts_with(&self.root)
    }

    /// Remove the directory. Calling this more than once is a no-op.
    pub fn cleanup(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("Removed temp directory {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to remove temp directory {}: {}", self.root.display(), e);
        }
    }
}
