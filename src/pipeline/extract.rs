//! Secure ZIP extraction into the confined temp directory.
//!
//! Every entry is flattened to its base name and written directly under
//! [`Workspace::root`], at the path [`Workspace::claim`] hands out for that
//! name. Within one archive, entries sharing a base name overwrite each
//! other; across archives they get distinct files. Three independent guards
//! stand between an entry name and the filesystem:
//!
//! 1. **Base-name stripping** drops every directory component, so
//!    `../../etc/passwd` becomes `passwd`.
//! 2. **Canonical containment** resolves the destination (following any
//!    symlink already sitting there) and refuses to write unless it is a
//!    descendant of the canonical root.
//! 3. **No symlink at the destination**, dangling or not. The file is then
//!    opened with `create_new`, which never follows a link.
//!
//! An entry failing a guard is skipped; the rest of the archive is still
//! extracted. Only an archive that cannot be opened at all is an error.

use crate::error::ArchiveError;
use crate::workspace::Workspace;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// A file written by [`extract_archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Where the entry was written, directly under the workspace root.
    pub path: PathBuf,
    /// The entry's base name inside the archive. May differ from the file
    /// name of `path` when another archive claimed the name first.
    pub name: String,
}

/// Extract `archive_path` into `workspace`, returning the written files.
///
/// The returned list holds each destination once, even when several entries
/// collapsed onto the same base name (the last entry's content wins).
pub fn extract_archive(
    archive_path: &Path,
    workspace: &Workspace,
) -> Result<Vec<ExtractedFile>, ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::Corrupt {
            path: archive_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    info!(
        "Extracting {} ({} entries)",
        archive_path.display(),
        archive.len()
    );

    let mut written: Vec<ExtractedFile> = Vec::new();
    let mut destinations: HashMap<String, PathBuf> = HashMap::new();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{}: skipping unreadable entry #{}: {}", archive_path.display(), i, e);
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let Some(base) = base_name(&raw_name) else {
            debug!("Skipping entry with empty base name: {:?}", raw_name);
            continue;
        };

        let dest = destinations
            .entry(base.to_string())
            .or_insert_with(|| workspace.claim(base))
            .clone();
        if !workspace.contains(&dest) {
            warn!(
                "{}: rejecting entry {:?}: resolves outside {}",
                archive_path.display(),
                raw_name,
                workspace.root().display()
            );
            continue;
        }
        if is_symlink(&dest) {
            warn!(
                "{}: rejecting entry {:?}: {} is a symlink",
                archive_path.display(),
                raw_name,
                dest.display()
            );
            continue;
        }

        if let Err(e) = stream_to(&mut entry, &dest) {
            warn!(
                "{}: failed to write entry {:?}: {}",
                archive_path.display(),
                raw_name,
                e
            );
            continue;
        }

        if written.iter().any(|f| f.path == dest) {
            warn!(
                "{}: entry {:?} overwrote an earlier entry named {:?}",
                archive_path.display(),
                raw_name,
                base
            );
        } else {
            written.push(ExtractedFile {
                path: dest,
                name: base.to_string(),
            });
        }
    }

    debug!(
        "Extracted {} files from {}",
        written.len(),
        archive_path.display()
    );
    Ok(written)
}

/// Final path segment of an archive entry name, splitting on both `/` and
/// `\`. `None` for names that end in a separator or reduce to `.`/`..`.
pub fn base_name(entry_name: &str) -> Option<&str> {
    let base = entry_name.rsplit(|c| c == '/' || c == '\\').next()?;
    match base {
        "" | "." | ".." => None,
        b if b.contains('\0') => None,
        b => Some(b),
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).map_or(false, |m| m.file_type().is_symlink())
}

/// Replace `dest` with the contents of `reader`. An earlier regular file is
/// removed first so the new one can be created with `create_new`.
fn stream_to(reader: &mut impl io::Read, dest: &Path) -> io::Result<u64> {
    match std::fs::remove_file(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut out = OpenOptions::new().write(true).create_new(true).open(dest)?;
    io::copy(reader, &mut out)
}
