//! PDF page rasterization through poppler's `pdftoppm`.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::ocr::run_command;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const PAGE_PREFIX: &str = "page";

#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    program: String,
    dpi: u32,
    timeout: Duration,
}

impl PdfRasterizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.pdftoppm_cmd.clone(),
            dpi: config.pdf_dpi,
            timeout: config.timeout,
        }
    }

    /// Render every page of `pdf` as PNG into `out_dir`, returned in page order.
    pub fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(out_dir.join(PAGE_PREFIX));
        run_command(cmd, &self.program, self.timeout)?;

        let pages = sorted_page_images(out_dir)?;
        if pages.is_empty() {
            return Err(OcrError::NoPages {
                program: self.program.clone(),
            });
        }
        Ok(pages)
    }
}

/// `page-7.png` -> 7. pdftoppm zero-pads by page count, so sort numerically.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(PAGE_PREFIX)?
        .trim_start_matches('-')
        .parse()
        .ok()
}

fn sorted_page_images(dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
    let mut pages: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("png"))
        .filter_map(|path| page_number(&path).map(|n| (n, path)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}
