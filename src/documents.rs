//! Document store: corpus discovery and PDF text extraction.
//!
//! Scans the configured corpus folder for PDFs (glob-filtered, sorted by
//! identity so every run sees the same document order) and extracts plain
//! text. Per-file read/extract failures are errors the caller collects and
//! reports; they never abort a whole ingestion run.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::{Error, Result};
use crate::models::{CorpusFile, RawDocument};

/// List the PDFs under the corpus root, sorted by identity.
/// Fails if the corpus folder itself is absent.
pub fn scan_corpus(config: &CorpusConfig) -> Result<Vec<CorpusFile>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(Error::Input(format!(
            "corpus folder not found: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut walker = WalkDir::new(root);
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Input(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let identity = relative.to_string_lossy().to_string();

        if !include_set.is_match(&identity) {
            continue;
        }

        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(CorpusFile {
            identity,
            path: path.to_path_buf(),
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(files)
}

/// Read and extract one PDF. Returns the document text plus a content hash
/// of the file bytes for change detection.
pub fn load_document(file: &CorpusFile) -> Result<RawDocument> {
    let bytes = std::fs::read(&file.path)
        .map_err(|e| Error::Input(format!("cannot read {}: {}", file.identity, e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = format!("{:x}", hasher.finalize());

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| Error::Input(format!("PDF extraction failed for {}: {}", file.identity, e)))?;

    Ok(RawDocument {
        identity: file.identity.clone(),
        text,
        content_hash,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::Input(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::Input(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus_config(root: &std::path::Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.pdf".to_string()],
            recursive: true,
        }
    }

    #[test]
    fn missing_folder_is_an_input_error() {
        let config = corpus_config(std::path::Path::new("/nonexistent/leases"));
        let err = scan_corpus(&config).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn scan_is_sorted_and_filters_non_pdfs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let files = scan_corpus(&corpus_config(tmp.path())).unwrap();
        let identities: Vec<&str> = files.iter().map(|f| f.identity.as_str()).collect();
        assert_eq!(identities, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn corrupt_pdf_reports_input_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let file = CorpusFile {
            identity: "bad.pdf".to_string(),
            path,
            size_bytes: 9,
        };
        let err = load_document(&file).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }
}
