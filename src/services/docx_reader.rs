//! Paragraph text of a `.docx` file, read straight from `word/document.xml`.

use crate::error::ConvertError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::read::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";

/// Paragraphs in document order, joined with newlines.
pub fn word_to_text(path: &Path) -> Result<String, ConvertError> {
    let file = File::open(path).map_err(|source| ConvertError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut archive = ZipArchive::new(file)?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)?
        .read_to_string(&mut xml)
        .map_err(|source| ConvertError::Io {
            path: format!("{}!{}", path.display(), DOCUMENT_PART),
            source,
        })?;
    Ok(paragraphs_from_xml(&xml)?.join("\n"))
}

/// Only `w:t` runs contribute text; field codes and properties are skipped.
/// A paragraph nested in a text box gets its own slot right after the
/// paragraph that anchors it, so the outer text stays whole.
fn paragraphs_from_xml(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();
    // Indices into `paragraphs` of the paragraphs still open.
    let mut open: Vec<usize> = Vec::new();
    let mut in_text_run = false;
    // `mc:Fallback` repeats the `mc:Choice` content for older readers.
    let mut fallback_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) if fallback_depth > 0 => {
                if e.name().as_ref() == b"mc:Fallback" {
                    fallback_depth += 1;
                }
            }
            Event::End(e) if fallback_depth > 0 => {
                if e.name().as_ref() == b"mc:Fallback" {
                    fallback_depth -= 1;
                }
            }
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => {
                    paragraphs.push(String::new());
                    open.push(paragraphs.len() - 1);
                }
                b"w:t" => in_text_run = true,
                b"mc:Fallback" => fallback_depth = 1,
                _ => {}
            },
            Event::Empty(e) if fallback_depth == 0 => match e.name().as_ref() {
                b"w:p" => paragraphs.push(String::new()),
                b"w:tab" => {
                    if let Some(&i) = open.last() {
                        paragraphs[i].push('\t');
                    }
                }
                b"w:br" | b"w:cr" => {
                    if let Some(&i) = open.last() {
                        paragraphs[i].push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(t) if in_text_run && fallback_depth == 0 => {
                if let Some(&i) = open.last() {
                    paragraphs[i].push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => {
                    open.pop();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}
