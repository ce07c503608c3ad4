use crate::error::IngestError;
use crate::models::{Document, FileType};
use chrono::Utc;
use lopdf::Document as PdfDocument;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Turns the raw bytes of one file into text sections. Blank sections are
/// dropped, so an empty file yields no sections.
pub trait DocumentExtractor {
    fn extract_sections(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract_sections(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(error) => {
                warn!(%error, "text file is not valid utf-8, replacing invalid sequences");
                String::from_utf8_lossy(bytes).into_owned()
            }
        };

        Ok(non_blank_section(1, text.replace("\r\n", "\n")))
    }
}

#[derive(Default)]
pub struct LopdfExtractor;

impl DocumentExtractor for LopdfExtractor {
    fn extract_sections(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            PdfDocument::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.extend(non_blank_section(page_no, text));
        }

        Ok(pages)
    }
}

/// Reads `word/document.xml` out of a `.docx` archive and keeps paragraph,
/// line-break and tab structure.
#[derive(Default)]
pub struct DocxExtractor;

impl DocumentExtractor for DocxExtractor {
    fn extract_sections(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::Docx(error.to_string()))?;
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|error| IngestError::Docx(error.to_string()))?
            .read_to_string(&mut xml)?;

        Ok(non_blank_section(1, docx_xml_to_text(&xml)?))
    }
}

fn docx_xml_to_text(xml: &str) -> Result<String, IngestError> {
    let paragraph_end = Regex::new(r"</w:p>")?;
    let line_break = Regex::new(r"<w:(?:br|cr)\s*/>")?;
    let tab = Regex::new(r"<w:tab\s*/>")?;
    let any_tag = Regex::new(r"<[^>]+>")?;

    let text = paragraph_end.replace_all(xml, "\n");
    let text = line_break.replace_all(&text, "\n");
    let text = tab.replace_all(&text, "\t");
    let text = any_tag.replace_all(&text, "");

    Ok(text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim_end()
        .to_string())
}

fn non_blank_section(number: u32, text: String) -> Vec<PageText> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![PageText { number, text }]
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Loads documents from in-memory file contents; `source` names the origin
/// (a path or an upload name) and picks the extractor by extension.
pub fn load_bytes(source: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let file_name = Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(source.to_string()))?;
    let file_type = FileType::from_file_name(file_name)
        .ok_or_else(|| IngestError::UnsupportedFormat(file_name.to_string()))?;

    let sections = match file_type {
        FileType::Text => TextExtractor.extract_sections(bytes)?,
        FileType::Pdf => LopdfExtractor.extract_sections(bytes)?,
        FileType::Docx => DocxExtractor.extract_sections(bytes)?,
    };

    let digest = checksum(bytes);
    let loaded_at = Utc::now().to_rfc3339();
    debug!(source, sections = sections.len(), file_type = file_type.as_str(), "extracted document");

    Ok(sections
        .into_iter()
        .map(|section| {
            let document = Document::new(section.text)
                .with_metadata("source", source)
                .with_metadata("file_name", file_name)
                .with_metadata("file_type", file_type.as_str())
                .with_metadata("checksum", digest.clone())
                .with_metadata("loaded_at", loaded_at.clone());
            if file_type == FileType::Pdf {
                document.with_metadata("page_number", section.number)
            } else {
                document
            }
        })
        .collect())
}

pub fn load_document(path: &Path) -> Result<Vec<Document>, IngestError> {
    let bytes = std::fs::read(path)?;
    load_bytes(&path.to_string_lossy(), &bytes)
}
