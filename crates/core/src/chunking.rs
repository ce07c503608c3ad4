use crate::error::IngestError;
use crate::models::{Chunk, Document, IngestionOptions, SplitMethod};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub method: SplitMethod,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(IngestionOptions::default())
    }
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
            method: value.split_method,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn separators(&self) -> &'static [&'static str] {
        match self.method {
            SplitMethod::Recursive => &["\n\n", "\n", " "],
            SplitMethod::Paragraph => &["\n"],
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits `text` into `(start_char, chunk_text)` pairs.
///
/// Every chunk is at most `chunk_size` chars long and is an exact substring of
/// `text`. A chunk ends right after the last separator that fits, trying the
/// separators in priority order and falling back to a hard cut. The next chunk
/// resumes at the first word boundary inside the trailing `chunk_overlap` chars
/// of the previous one.
pub fn split_text(
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<(usize, String)>, IngestError> {
    config.validate()?;
    let chars: Vec<char> = text.chars().collect();

    Ok(split_spans(&chars, config)
        .into_iter()
        .map(|(start, end)| (start, chars[start..end].iter().collect()))
        .collect())
}

fn split_spans(chars: &[char], config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if chars.iter().all(|c| c.is_whitespace()) {
        return spans;
    }

    let total = chars.len();
    let separators = config.separators();
    let mut start = 0;

    loop {
        if total - start <= config.chunk_size {
            spans.push((start, total));
            break;
        }

        let limit = start + config.chunk_size;
        let earliest = start + config.chunk_overlap;
        let end = find_break(chars, earliest, limit, separators).unwrap_or(limit);
        spans.push((start, end));

        let floor = end.saturating_sub(config.chunk_overlap).max(start + 1);
        start = find_resume(chars, floor, end);
    }

    spans
}

/// Last position in `(lower, limit]` that directly follows a separator.
fn find_break(chars: &[char], lower: usize, limit: usize, separators: &[&str]) -> Option<usize> {
    for separator in separators {
        let pattern: Vec<char> = separator.chars().collect();
        let mut end = limit;
        while end > lower && end >= pattern.len() {
            if chars[end - pattern.len()..end] == pattern[..] {
                return Some(end);
            }
            end -= 1;
        }
    }
    None
}

fn find_resume(chars: &[char], floor: usize, end: usize) -> usize {
    (floor..end)
        .find(|&position| position > 0 && chars[position - 1].is_whitespace())
        .unwrap_or(floor)
}

pub fn split_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;
    let mut chunks = Vec::new();

    for (document_index, document) in documents.iter().enumerate() {
        for (chunk_index, (start_char, text)) in
            split_text(&document.text, config)?.into_iter().enumerate()
        {
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
            metadata.insert("start_index".to_string(), Value::from(start_char));

            chunks.push(Chunk {
                chunk_id: make_chunk_id(document.source(), document_index, chunk_index, &text),
                text,
                metadata,
                document_index,
                chunk_index,
                start_char,
            });
        }
    }

    Ok(chunks)
}

/// Rebuilds a document's text from its chunks by dropping the overlapping
/// prefix of each chunk. Expects the chunks of a single document in order.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start_char);
        text.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.start_char + chunk.char_len());
    }

    text
}

/// Drops metadata values a flat vector payload cannot hold: nulls, arrays and
/// nested objects. Strings, numbers and booleans are kept.
pub fn filter_complex_metadata(chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks
        .into_iter()
        .map(|mut chunk| {
            chunk
                .metadata
                .retain(|_, value| value.is_string() || value.is_number() || value.is_boolean());
            chunk
        })
        .collect()
}

fn make_chunk_id(source: &str, document_index: usize, chunk_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update((document_index as u64).to_le_bytes());
    hasher.update((chunk_index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
