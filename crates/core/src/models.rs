use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Pdf,
    Docx,
}

impl FileType {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match extension.as_str() {
            "txt" | "md" | "markdown" | "text" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            "docx" => Some(FileType::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// A slice of one document. `text` is the exact substring of the parent text
/// starting at char offset `start_char`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub document_index: usize,
    pub chunk_index: usize,
    pub start_char: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// Paragraph, then line, then word boundaries, then a hard cut.
    #[default]
    Recursive,
    /// Line boundaries only, then a hard cut.
    Paragraph,
}

impl std::str::FromStr for SplitMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recursive" | "character" | "characters" => Ok(SplitMethod::Recursive),
            "paragraph" | "paragraphs" | "line" => Ok(SplitMethod::Paragraph),
            other => Err(format!("unknown split method `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchCandidate>,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub split_method: SplitMethod,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            split_method: SplitMethod::Recursive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_is_detected_case_insensitively() {
        assert_eq!(FileType::from_file_name("notes.TXT"), Some(FileType::Text));
        assert_eq!(FileType::from_file_name("a/b/report.pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_file_name("Report.Docx"), Some(FileType::Docx));
        assert_eq!(FileType::from_file_name("archive.zip"), None);
        assert_eq!(FileType::from_file_name("README"), None);
    }

    #[test]
    fn split_method_parses_aliases() {
        assert_eq!("recursive".parse::<SplitMethod>(), Ok(SplitMethod::Recursive));
        assert_eq!("Paragraph".parse::<SplitMethod>(), Ok(SplitMethod::Paragraph));
        assert!("sentences".parse::<SplitMethod>().is_err());
    }
}
