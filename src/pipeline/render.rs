//! Page rasterisation: turn a raw document into the page images to classify.
//!
//! Images decode to a single page. PDFs are rendered page by page through
//! pdfium; each rendered page is also written to the temp directory as
//! `<stem>_page_<n>.jpg` so a page on disk can be traced back to its source
//! and page number.
//!
//! ## Blocking work
//!
//! pdfium is a C++ library with thread-local state and image decoding is
//! CPU-bound; both run on the blocking pool so the runtime's worker threads
//! stay free.

use super::input::{DocumentKind, RawDocument};
use crate::error::RenderError;
use crate::workspace::{Workspace, PAGES_DIR};
use image::{DynamicImage, ImageFormat, ImageReader};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One page, ready for classification.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub image: DynamicImage,
    pub source: RawDocument,
    /// 1-based. Always 1 for image documents.
    pub page_num: usize,
    /// Where the rendered page was persisted (PDF pages only).
    pub saved_path: Option<PathBuf>,
}

/// Rendering knobs taken from [`crate::config::RunConfig`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub max_rendered_pixels: u32,
    pub pdfium_lib_path: Option<PathBuf>,
}

/// Rasterise `doc` into its pages, in page order.
pub async fn rasterize(
    doc: &RawDocument,
    workspace: &Workspace,
    options: &RenderOptions,
) -> Result<Vec<PageImage>, RenderError> {
    match doc.kind {
        DocumentKind::Image => {
            let path = doc.path.clone();
            let image = run_blocking(&doc.path, move || load_image(&path)).await?;
            Ok(vec![PageImage {
                image,
                source: doc.clone(),
                page_num: 1,
                saved_path: None,
            }])
        }
        DocumentKind::Pdf => {
            let path = doc.path.clone();
            let max_pixels = options.max_rendered_pixels;
            let lib_path = options.pdfium_lib_path.clone();
            let images = run_blocking(&doc.path, move || {
                render_pdf_blocking(&path, max_pixels, lib_path.as_deref())
            })
            .await?;

            let pages_dir = workspace.root().join(PAGES_DIR);
            let source = doc.clone();
            run_blocking(&doc.path, move || persist_pages(&source, images, &pages_dir)).await
        }
    }
}

async fn run_blocking<T, F>(path: &Path, f: F) -> Result<T, RenderError>
where
    F: FnOnce() -> Result<T, RenderError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RenderError::Unreadable {
            path: path.to_path_buf(),
            detail: format!("render task panicked: {e}"),
        })?
}

/// Decode an image, sniffing the real format rather than trusting the
/// extension.
fn load_image(path: &Path) -> Result<DynamicImage, RenderError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| RenderError::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    reader.decode().map_err(|e| match e {
        image::ImageError::Unsupported(_) => RenderError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
        other => RenderError::Unreadable {
            path: path.to_path_buf(),
            detail: other.to_string(),
        },
    })
}

/// Locate pdfium: an explicit path, else next to the working directory,
/// else the system library.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, RenderError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| RenderError::EngineUnavailable(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

/// Render every page of the PDF, longest edge capped at `max_pixels`.
fn render_pdf_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    lib_path: Option<&Path>,
) -> Result<Vec<DynamicImage>, RenderError> {
    let pdfium = bind_pdfium(lib_path)?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_lowercase().contains("password") {
            RenderError::UnsupportedFormat {
                path: pdf_path.to_path_buf(),
                detail: "encrypted PDF".to_string(),
            }
        } else {
            RenderError::Unreadable {
                path: pdf_path.to_path_buf(),
                detail,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(RenderError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }
    info!("{}: {} pages", pdf_path.display(), total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Unreadable {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

/// Write rendered pages as `<stem>_page_<n>.jpg` and wrap them as
/// [`PageImage`]s numbered from 1.
fn persist_pages(
    doc: &RawDocument,
    images: Vec<DynamicImage>,
    pages_dir: &Path,
) -> Result<Vec<PageImage>, RenderError> {
    std::fs::create_dir_all(pages_dir).map_err(|e| RenderError::SaveFailed {
        path: doc.path.clone(),
        page: 0,
        detail: e.to_string(),
    })?;

    let stem = doc.stem();
    images
        .into_iter()
        .enumerate()
        .map(|(idx, image)| {
            let page_num = idx + 1;
            let out = pages_dir.join(page_file_name(&stem, page_num));
            // JPEG has no alpha channel.
            DynamicImage::ImageRgb8(image.to_rgb8())
                .save_with_format(&out, ImageFormat::Jpeg)
                .map_err(|e| RenderError::SaveFailed {
                    path: doc.path.clone(),
                    page: page_num,
                    detail: e.to_string(),
                })?;
            Ok(PageImage {
                image,
                source: doc.clone(),
                page_num,
                saved_path: Some(out),
            })
        })
        .collect()
}

/// `<stem>_page_<n>.jpg`
pub fn page_file_name(stem: &str, page_num: usize) -> String {
    format!("{stem}_page_{page_num}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn options() -> RenderOptions {
        RenderOptions {
            max_rendered_pixels: 500,
            pdfium_lib_path: None,
        }
    }

    fn doc(path: PathBuf, kind: DocumentKind) -> RawDocument {
        let label = path.file_name().unwrap().to_string_lossy().into_owned();
        RawDocument { path, kind, label }
    }

    #[test]
    fn page_file_name_embeds_stem_and_number() {
        assert_eq!(page_file_name("test", 1), "test_page_1.jpg");
        assert_eq!(page_file_name("tax_2023", 12), "tax_2023_page_12.jpg");
    }

    #[test]
    fn persist_pages_numbers_from_one_in_order() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let source = doc(ws.root().join("report.pdf"), DocumentKind::Pdf);
        let images: Vec<DynamicImage> = (0..3u8)
            .map(|i| {
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([i * 80, 0, 0, 255])))
            })
            .collect();

        let pages = persist_pages(&source, images, &ws.root().join(PAGES_DIR)).unwrap();

        assert_eq!(pages.len(), 3);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.page_num, i + 1);
            let saved = page.saved_path.as_ref().unwrap();
            let name = saved.file_name().unwrap().to_string_lossy();
            assert!(name.contains("report"), "got {name}");
            assert!(name.contains(&format!("page_{}", i + 1)), "got {name}");
            assert!(saved.exists());
            assert!(ws.contains(saved));
        }
    }

    #[tokio::test]
    async fn image_document_is_one_page() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let path = base.path().join("id.png");
        RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])).save(&path).unwrap();

        let pages = rasterize(&doc(path, DocumentKind::Image), &ws, &options())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert_eq!(pages[0].image.width(), 10);
        assert!(pages[0].saved_path.is_none());
    }

    #[tokio::test]
    async fn mislabelled_image_is_sniffed() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let png = base.path().join("real.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 255])).save(&png).unwrap();
        let jpg = base.path().join("actually_png.jpg");
        std::fs::rename(&png, &jpg).unwrap();

        let pages = rasterize(&doc(jpg, DocumentKind::Image), &ws, &options())
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn garbage_image_is_an_error() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let path = base.path().join("test1.jpg");
        std::fs::write(&path, b"dummy content").unwrap();

        let err = rasterize(&doc(path, DocumentKind::Image), &ws, &options())
            .await
            .unwrap_err();
        assert!(
            matches!(err, RenderError::Unreadable { .. } | RenderError::UnsupportedFormat { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn corrupt_pdf_yields_an_error_not_a_panic() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::create(base.path().join("temp")).unwrap();
        let path = base.path().join("test.pdf");
        std::fs::write(&path, b"fake pdf").unwrap();

        let result = rasterize(&doc(path, DocumentKind::Pdf), &ws, &options()).await;
        assert!(result.is_err());
    }
}
