use crate::chunking::{filter_complex_metadata, split_documents, ChunkingConfig};
use crate::extractor::load_document;
use crate::models::{Chunk, Document, FileType, IngestionOptions};
use crate::IngestError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(FileType::from_file_name)
            .is_some();

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Loads a single file, or every supported file under a folder. Files that
/// fail to load are recorded in `skipped_files` instead of aborting the run.
pub fn load_path_best_effort(
    path: &Path,
) -> Result<(Vec<Document>, Vec<SkippedFile>), IngestError> {
    if path.is_file() {
        return Ok((load_document(path)?, Vec::new()));
    }

    if !path.is_dir() {
        return Err(IngestError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let files = discover_documents(path);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no supported documents found in {}",
            path.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();
    for file in files {
        match load_document(&file) {
            Ok(loaded) => documents.extend(loaded),
            Err(error) => {
                warn!(path = %file.display(), reason = %error, "skipped document");
                skipped_files.push(SkippedFile {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok((documents, skipped_files))
}

/// Load, split and strip complex metadata in one step.
pub fn ingest_path(path: &Path, options: IngestionOptions) -> Result<IngestionReport, IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;

    let (documents, skipped_files) = load_path_best_effort(path)?;
    let chunks = filter_complex_metadata(split_documents(&documents, &config)?);

    info!(
        path = %path.display(),
        documents = documents.len(),
        chunks = chunks.len(),
        skipped = skipped_files.len(),
        "ingested path"
    );

    Ok(IngestionReport {
        documents,
        chunks,
        skipped_files,
    })
}
