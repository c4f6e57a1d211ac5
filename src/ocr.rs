//! Text from images and scanned PDFs through the system `tesseract` and
//! `pdftoppm` binaries.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::OcrSection;

/// File extensions routed to OCR rather than read as text.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),
    #[error("OCR failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    lang: String,
}

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

impl TesseractOcr {
    pub fn from_config(cfg: &OcrSection) -> Option<Self> {
        cfg.enabled.then(|| Self {
            lang: cfg.tesseract_lang.clone(),
        })
    }

    /// OCR an in-memory image. `extension` only names the temp file so
    /// tesseract's loader picks the right decoder.
    pub fn image_to_text(&self, image: &[u8], extension: &str) -> Result<String, OcrError> {
        let dir = TempDir::new()?;
        let path = dir.path().join(format!("upload.{}", extension.to_ascii_lowercase()));
        std::fs::write(&path, image)?;
        self.run_tesseract(&path)
    }

    /// Rasterize every page at 300 dpi and OCR them in page order.
    pub fn pdf_to_text(&self, pdf: &[u8]) -> Result<String, OcrError> {
        let dir = TempDir::new()?;
        let pdf_path = dir.path().join("scan.pdf");
        std::fs::write(&pdf_path, pdf)?;

        let prefix = dir.path().join("page");
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", "300"])
            .arg(&pdf_path)
            .arg(&prefix)
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => return Err(OcrError::Failed(format!("pdftoppm exited with {s}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::ToolNotFound("pdftoppm (install poppler-utils)".into()));
            }
            Err(e) => return Err(e.into()),
        }

        let pages = page_images(dir.path())?;
        info!(pages = pages.len(), "Rasterized scanned PDF");

        let mut text = String::new();
        for page in &pages {
            text.push_str(&self.run_tesseract(page)?);
            text.push('\n');
        }
        Ok(text)
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        debug!(path = %image_path.display(), lang = %self.lang, "Running tesseract");
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.lang])
            .output();

        match output {
            Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(out) => Err(OcrError::Failed(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::ToolNotFound("tesseract (install tesseract-ocr)".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `page-1.png`, `page-2.png`, ... sorted by page number. pdftoppm pads the
/// number to the page count's width, so a plain string sort is not enough.
fn page_images(dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
    let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            let number = stem.strip_prefix("page-")?.parse::<u32>().ok()?;
            (path.extension()? == "png").then_some((number, path))
        })
        .collect();
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}
