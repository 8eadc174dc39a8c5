//! Text extraction boundary.
//!
//! Binary formats (PDF, DOCX) belong to external extractors plugged in through
//! [`TextExtractor`]; the built-in extractor covers plain text and Markdown.

use std::fs;
use std::path::Path;

use super::types::{Document, ExtractionError};

/// Converts raw document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract the text content of `bytes` declared as `format` (extension or MIME type).
    fn extract(&self, bytes: &[u8], format: &str) -> Result<String, ExtractionError>;

    /// Whether `format` is handled by this extractor.
    fn supports(&self, format: &str) -> bool;
}

/// Extractor for UTF-8 plain text and Markdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

const PLAIN_FORMATS: &[&str] = &[
    "txt",
    "text",
    "md",
    "markdown",
    "text/plain",
    "text/markdown",
];

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], format: &str) -> Result<String, ExtractionError> {
        if !self.supports(format) {
            return Err(ExtractionError::UnsupportedFormat(format.to_string()));
        }
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes)?;
        Ok(text.to_string())
    }

    fn supports(&self, format: &str) -> bool {
        let normalized = normalize_format(format);
        PLAIN_FORMATS.contains(&normalized.as_str())
    }
}

fn normalize_format(format: &str) -> String {
    format
        .trim()
        .trim_start_matches('.')
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Declared format of `path`, taken from its extension.
pub fn format_from_path(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Read and extract a single file into a [`Document`].
///
/// `declared_format` overrides the file extension when present.
pub fn load_document(
    path: &Path,
    declared_format: Option<&str>,
    extractor: &dyn TextExtractor,
) -> Result<Document, ExtractionError> {
    let bytes = fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let format = declared_format
        .map(str::to_string)
        .unwrap_or_else(|| format_from_path(path));
    let source_id = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document")
        .to_string();
    tracing::debug!(path = %path.display(), format = %format, bytes = bytes.len(), "Loading document");
    Document::from_bytes(source_id, &bytes, &format, extractor)
}

/// Load every supported file under `root`, in path order, merged into one document.
///
/// Files are separated by a blank line. Unsupported files are skipped with a warning.
pub fn load_directory(
    root: &Path,
    extractor: &dyn TextExtractor,
) -> Result<Document, ExtractionError> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|error| ExtractionError::Io {
            path: root.display().to_string(),
            source: error.into(),
        })?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }

    let mut sections = Vec::new();
    for path in paths {
        let format = format_from_path(&path);
        if !extractor.supports(&format) {
            tracing::warn!(path = %path.display(), format = %format, "Skipping unsupported file");
            continue;
        }
        let document = load_document(&path, Some(&format), extractor)?;
        sections.push(document.text().to_string());
    }

    let source_id = root
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("directory")
        .to_string();
    Ok(Document::new(source_id, sections.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_byte_order_mark() {
        let text = PlainTextExtractor
            .extract(b"\xEF\xBB\xBFhello", "txt")
            .expect("text");
        assert_eq!(text, "hello");
    }

    #[test]
    fn accepts_mime_types_with_parameters() {
        assert!(PlainTextExtractor.supports("text/plain; charset=utf-8"));
        assert!(PlainTextExtractor.supports(".MD"));
    }

    #[test]
    fn rejects_binary_formats() {
        let error = PlainTextExtractor.extract(b"%PDF-1.7", "pdf").unwrap_err();
        assert!(matches!(error, ExtractionError::UnsupportedFormat(format) if format == "pdf"));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let error = PlainTextExtractor.extract(&[0xff, 0xfe, 0x00], "txt").unwrap_err();
        assert!(matches!(error, ExtractionError::InvalidEncoding(_)));
    }

    #[test]
    fn directory_loading_merges_supported_files_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.txt"), "second").expect("write");
        fs::write(dir.path().join("a.md"), "first").expect("write");
        fs::write(dir.path().join("c.pdf"), "ignored").expect("write");

        let document = load_directory(dir.path(), &PlainTextExtractor).expect("document");
        assert_eq!(document.text(), "first\n\nsecond");
    }
}
