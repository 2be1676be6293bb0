//! Few-shot priming history.
//!
//! Reference images live under the examples directory, one subdirectory per
//! category:
//!
//! ```text
//! examples/
//!   ID/passport.jpg
//!   INVOICE/acme.png
//!   ...
//! ```
//!
//! Each image becomes a user turn ("This is an example of a <label>.") with
//! the image attached, followed by an assistant acknowledgement. The history
//! is built once per run and replayed before every page.

use crate::backend::Turn;
use crate::output::Category;
use crate::pipeline::encode::encode_image;
use crate::pipeline::input::DocumentKind;
use crate::prompts::{example_ack, example_prompt};
use edgequake_llm::ImageData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One labelled reference image, already encoded for the backend.
#[derive(Clone)]
pub struct FewShotExample {
    pub label: String,
    pub image: ImageData,
}

impl std::fmt::Debug for FewShotExample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FewShotExample")
            .field("label", &self.label)
            .field("bytes", &self.image.data.len())
            .finish()
    }
}

/// Load every example image under `dir`, sorted by label then file name.
///
/// A missing directory yields no examples (zero-shot). Unreadable images are
/// skipped with a warning; PDFs are not accepted as examples.
pub fn load_examples(dir: &Path, max_edge: u32) -> Vec<FewShotExample> {
    if !dir.is_dir() {
        info!("No examples directory at {}; classifying zero-shot", dir.display());
        return Vec::new();
    }

    let mut examples = Vec::new();
    for category_dir in sorted_entries(dir).into_iter().filter(|p| p.is_dir()) {
        let Some(label) = category_dir.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        if Category::from_label(&label).is_none() {
            warn!("Example label '{}' is not a known category", label);
        }

        for file in sorted_entries(&category_dir) {
            if !file.is_file() || DocumentKind::from_path(&file) != Some(DocumentKind::Image) {
                continue;
            }
            match load_one(&file, max_edge) {
                Ok(image) => {
                    debug!("Loaded example {} for {}", file.display(), label);
                    examples.push(FewShotExample {
                        label: label.clone(),
                        image,
                    });
                }
                Err(e) => warn!("Skipping example {}: {}", file.display(), e),
            }
        }
    }

    info!("Loaded {} few-shot examples from {}", examples.len(), dir.display());
    examples
}

fn load_one(path: &Path, max_edge: u32) -> Result<ImageData, image::ImageError> {
    let image = image::ImageReader::open(path)?.with_guessed_format()?.decode()?;
    encode_image(&image, max_edge)
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    entries.sort();
    entries
}

/// Two turns per example: the labelled image, then the acknowledgement.
pub fn priming_history(examples: &[FewShotExample]) -> Vec<Turn> {
    examples
        .iter()
        .flat_map(|ex| {
            [
                Turn::user(example_prompt(&ex.label), ex.image.clone()),
                Turn::assistant(example_ack(&ex.label)),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn missing_directory_is_zero_shot() {
        let base = TempDir::new().unwrap();
        assert!(load_examples(&base.path().join("examples"), 512).is_empty());
    }

    #[test]
    fn one_example_primes_two_turns() {
        let base = TempDir::new().unwrap();
        let id_dir = base.path().join("ID");
        std::fs::create_dir_all(&id_dir).unwrap();
        RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]))
            .save(id_dir.join("test.png"))
            .unwrap();

        let examples = load_examples(base.path(), 512);
        assert_eq!(examples.len(), 1);

        let history = priming_history(&examples);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "This is an example of a ID.");
        assert!(history[0].image.is_some());
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[test]
    fn bad_images_and_stray_files_are_skipped() {
        let base = TempDir::new().unwrap();
        let tax = base.path().join("TAX");
        std::fs::create_dir_all(&tax).unwrap();
        std::fs::write(tax.join("broken.jpg"), b"not an image").unwrap();
        std::fs::write(tax.join("notes.txt"), b"ignore").unwrap();
        std::fs::write(base.path().join("loose.png"), b"top-level file").unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]))
            .save(tax.join("good.png"))
            .unwrap();

        let examples = load_examples(base.path(), 512);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].label, "TAX");
    }

    #[test]
    fn examples_are_ordered_by_label() {
        let base = TempDir::new().unwrap();
        for label in ["RECEIPT", "ID", "INVOICE"] {
            let dir = base.path().join(label);
            std::fs::create_dir_all(&dir).unwrap();
            RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]))
                .save(dir.join("a.png"))
                .unwrap();
        }
        let labels: Vec<_> = load_examples(base.path(), 64)
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(labels, vec!["ID", "INVOICE", "RECEIPT"]);
    }
}
