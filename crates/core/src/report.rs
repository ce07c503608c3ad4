use crate::chunking::normalize_whitespace;
use crate::models::{Chunk, SearchCandidate};

pub const PREVIEW_CHUNKS: usize = 10;
pub const PREVIEW_CHARS: usize = 200;
pub const SOURCE_LIMIT: usize = 3;
pub const SOURCE_CHARS: usize = 300;

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Whitespace-collapsed prefix of `text`, suffixed with `...` when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat = normalize_whitespace(text);
    let cut = truncate_chars(&flat, max_chars);
    if cut.len() < flat.len() {
        format!("{cut}...")
    } else {
        flat
    }
}

pub fn chunk_preview(chunks: &[Chunk]) -> String {
    let mut preview = String::from("=== Chunk preview ===\n\n");

    for (index, chunk) in chunks.iter().take(PREVIEW_CHUNKS).enumerate() {
        preview.push_str(&format!("--- Chunk {} ---\n", index + 1));
        preview.push_str(&format!("Length: {} chars\n", chunk.char_len()));
        preview.push_str(&format!(
            "Content: {}...\n",
            truncate_chars(&chunk.text, PREVIEW_CHARS)
        ));
        preview.push_str(&"-".repeat(50));
        preview.push_str("\n\n");
    }

    if chunks.len() > PREVIEW_CHUNKS {
        preview.push_str(&format!(
            "... {} more chunks not shown ...\n",
            chunks.len() - PREVIEW_CHUNKS
        ));
    }

    preview
}

pub fn all_chunks(chunks: &[Chunk]) -> String {
    let mut content = String::from("=== All chunks ===\n\n");

    for (index, chunk) in chunks.iter().enumerate() {
        content.push_str(&format!("--- Chunk {} ---\n", index + 1));
        content.push_str(&format!("Length: {} chars\n", chunk.char_len()));
        content.push_str(&format!("Content:\n{}\n", chunk.text));
        content.push_str(&"=".repeat(60));
        content.push_str("\n\n");
    }

    content
}

pub fn sources_text(sources: &[SearchCandidate], show_full_content: bool) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut text = String::from("\n=== Related chunks ===\n\n");
    for (index, source) in sources.iter().take(SOURCE_LIMIT).enumerate() {
        let content = &source.chunk.text;
        if show_full_content {
            text.push_str(&format!(
                "Chunk {} (length: {} chars, score: {:.4}):\n{}\n\n",
                index + 1,
                content.chars().count(),
                source.score,
                content
            ));
        } else {
            text.push_str(&format!(
                "Chunk {}:\n{}...\n\n",
                index + 1,
                truncate_chars(content, SOURCE_CHARS)
            ));
        }
        text.push_str(&"-".repeat(50));
        text.push_str("\n\n");
    }

    text
}
