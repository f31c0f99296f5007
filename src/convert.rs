//! Attachment-to-text conversion, dispatched on file extension.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::ConvertError;
use crate::excel::tabular_to_text;
use crate::ocr::{AdaptiveOcr, OcrEngine, TesseractCli};
use crate::services::{word_to_text, PdfRasterizer};
use crate::types::StoredAttachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Pdf,
    Image,
    Text,
    Word,
    Tabular,
    Unsupported,
}

impl AttachmentKind {
    /// Classified by the lowercased text after the last `.`.
    pub fn from_file_name(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return AttachmentKind::Unsupported,
        };
        match ext.as_str() {
            "pdf" => AttachmentKind::Pdf,
            "jpg" | "jpeg" | "png" => AttachmentKind::Image,
            "txt" => AttachmentKind::Text,
            "docx" => AttachmentKind::Word,
            "csv" | "xls" | "xlsx" | "xlsb" => AttachmentKind::Tabular,
            _ => AttachmentKind::Unsupported,
        }
    }
}

fn unsupported_text(name: &str) -> String {
    format!("File {name} type not supported")
}

fn failed_text(name: &str, err: &ConvertError) -> String {
    format!("File {name} could not be converted: {err}")
}

pub struct Converter<E: OcrEngine> {
    ocr: AdaptiveOcr<E>,
    rasterizer: PdfRasterizer,
}

impl Converter<TesseractCli> {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(AdaptiveOcr::new(TesseractCli::new(config)), PdfRasterizer::new(config))
    }
}

impl<E: OcrEngine> Converter<E> {
    pub fn new(ocr: AdaptiveOcr<E>, rasterizer: PdfRasterizer) -> Self {
        Self { ocr, rasterizer }
    }

    /// Normalized text of one file. Unsupported extensions yield a
    /// placeholder instead of an error.
    pub fn convert_file(&self, path: &Path) -> Result<String, ConvertError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = AttachmentKind::from_file_name(&name);
        debug!(file = %name, ?kind, "converting attachment");
        match kind {
            AttachmentKind::Pdf => self.pdf_to_text(path),
            AttachmentKind::Image => Ok(self.ocr.image_to_text(path)),
            AttachmentKind::Text => {
                let bytes = fs::read(path).map_err(|source| ConvertError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            AttachmentKind::Word => word_to_text(path),
            AttachmentKind::Tabular => tabular_to_text(path),
            AttachmentKind::Unsupported => Ok(unsupported_text(&name)),
        }
    }

    /// Every page OCR'd in order, each followed by a newline.
    fn pdf_to_text(&self, path: &Path) -> Result<String, ConvertError> {
        let pages_dir = tempfile::tempdir().map_err(|source| ConvertError::Io {
            path: std::env::temp_dir().display().to_string(),
            source,
        })?;
        let pages = self.rasterizer.rasterize(path, pages_dir.path())?;
        let mut text = String::new();
        for page in &pages {
            text.push_str(&self.ocr.image_to_text(page));
            text.push('\n');
        }
        Ok(text)
    }

    /// One `FILE i - name` block per attachment, in input order.
    pub fn aggregate(&self, attachments: &[StoredAttachment]) -> String {
        let mut out = String::new();
        for (i, attachment) in attachments.iter().enumerate() {
            let text = match self.convert_file(&attachment.path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %attachment.name, error = %e, "attachment conversion failed");
                    failed_text(&attachment.name, &e)
                }
            };
            out.push_str(&format!("FILE {} - {}:\n\n{}\n\n", i + 1, attachment.name, text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::tests::FakeEngine;

    fn converter(engine: FakeEngine) -> Converter<FakeEngine> {
        let config = OcrConfig {
            pdftoppm_cmd: "no-such-pdftoppm-binary".into(),
            ..OcrConfig::default()
        };
        let ocr = AdaptiveOcr::new(engine).with_language_detector(|_| "eng".to_string());
        Converter::new(ocr, PdfRasterizer::new(&config))
    }

    fn stored(dir: &Path, name: &str, contents: &[u8]) -> StoredAttachment {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        StoredAttachment {
            name: name.to_string(),
            path,
        }
    }

    #[test]
    fn kinds_by_extension() {
        assert_eq!(AttachmentKind::from_file_name("scan.PDF"), AttachmentKind::Pdf);
        assert_eq!(AttachmentKind::from_file_name("a.b.JPEG"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_file_name("notes.txt"), AttachmentKind::Text);
        assert_eq!(AttachmentKind::from_file_name("letter.docx"), AttachmentKind::Word);
        assert_eq!(AttachmentKind::from_file_name("ledger.xlsb"), AttachmentKind::Tabular);
        assert_eq!(AttachmentKind::from_file_name("letter.doc"), AttachmentKind::Unsupported);
        assert_eq!(AttachmentKind::from_file_name("README"), AttachmentKind::Unsupported);
    }

    #[test]
    fn unsupported_extension_is_a_placeholder() {
        let conv = converter(FakeEngine::new("", vec![]));
        let text = conv.convert_file(Path::new("/nowhere/file.xyz")).unwrap();
        assert_eq!(text, "File file.xyz type not supported");
    }

    #[test]
    fn image_goes_through_adaptive_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let img = stored(dir.path(), "receipt.png", b"\x89PNG");
        let engine = FakeEngine::new(
            "Script: Latin\nScript confidence: 2.0\n",
            vec![("eng+chi_sim", "Total 12.00")],
        );
        let conv = converter(engine);
        assert_eq!(conv.convert_file(&img.path).unwrap(), "Total 12.00");
    }

    #[test]
    fn text_is_read_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let txt = stored(dir.path(), "note.txt", b"caf\xe9 ok");
        let conv = converter(FakeEngine::new("", vec![]));
        assert_eq!(conv.convert_file(&txt.path).unwrap(), "caf\u{FFFD} ok");
    }

    #[test]
    fn aggregate_numbers_blocks_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = stored(dir.path(), "first.txt", b"hello");
        let b = stored(dir.path(), "second.xyz", b"??");
        let conv = converter(FakeEngine::new("", vec![]));
        assert_eq!(
            conv.aggregate(&[a, b]),
            "FILE 1 - first.txt:\n\nhello\n\n\
             FILE 2 - second.xyz:\n\nFile second.xyz type not supported\n\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn pdf_pages_are_ocrd_in_order_with_newlines() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // args: -png -r <dpi> <pdf> <out prefix>
        let script = dir.path().join("fake-pdftoppm");
        fs::write(&script, "#!/bin/sh\nprintf x > \"$5-2.png\"\nprintf x > \"$5-1.png\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let config = OcrConfig {
            pdftoppm_cmd: script.display().to_string(),
            ..OcrConfig::default()
        };
        let engine = FakeEngine::new("", vec![("eng+chi_sim", "PAGE")]);
        let ocr = AdaptiveOcr::new(engine).with_language_detector(|_| "eng".to_string());
        let conv = Converter::new(ocr, PdfRasterizer::new(&config));

        let pdf = stored(dir.path(), "scan.pdf", b"%PDF-1.4");
        assert_eq!(conv.convert_file(&pdf.path).unwrap(), "PAGE\nPAGE\n");
    }

    #[test]
    fn failing_attachment_is_rendered_inline() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = stored(dir.path(), "scan.pdf", b"%PDF-1.4");
        let missing = StoredAttachment {
            name: "gone.txt".into(),
            path: dir.path().join("gone.txt"),
        };
        let ok = stored(dir.path(), "ok.txt", b"fine");
        let conv = converter(FakeEngine::new("", vec![]));
        let out = conv.aggregate(&[pdf, missing, ok]);
        assert!(out.starts_with("FILE 1 - scan.pdf:\n\nFile scan.pdf could not be converted: could not start no-such-pdftoppm-binary"));
        assert!(out.contains("FILE 2 - gone.txt:\n\nFile gone.txt could not be converted: could not read"));
        assert!(out.ends_with("FILE 3 - ok.txt:\n\nfine\n\n"));
    }

    #[test]
    fn empty_attachment_list_is_empty_text() {
        let conv = converter(FakeEngine::new("", vec![]));
        assert_eq!(conv.aggregate(&[]), "");
    }
}
