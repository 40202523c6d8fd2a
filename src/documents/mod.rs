// Document loading module
// Resolves a loader per file extension and turns files into page text


use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{RagError, Result};

/// Extensions that are never decoded as text
const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "avi", "bin", "bmp", "class", "dll", "doc", "docx", "dylib", "exe", "gif", "gz", "ico",
    "jar", "jpeg", "jpg", "mkv", "mov", "mp3", "mp4", "o", "ogg", "png", "ppt", "pptx", "pyc",
    "so", "sqlite", "tar", "tgz", "wasm", "wav", "webp", "xls", "xlsx", "zip",
];

/// How a file is turned into text, resolved once from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    Unsupported,
}

impl DocumentFormat {
    #[inline]
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some(ext) if BINARY_EXTENSIONS.contains(&ext) => Self::Unsupported,
            _ => Self::PlainText,
        }
    }
}

impl fmt::Display for DocumentFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlainText => write!(f, "text"),
            Self::Pdf => write!(f, "pdf"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// A loaded source document. Only the chunks derived from it are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Display name: the upload filename or the path found during a directory scan
    pub source: String,
    pub format: DocumentFormat,
    /// Page texts in order. Plain text documents have exactly one page.
    pub pages: Vec<String>,
}

impl Document {
    /// Total number of characters across all pages
    #[inline]
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|page| page.chars().count()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|page| page.trim().is_empty())
    }
}

/// Load a document from `path`, choosing the loader from the extension of `name`.
///
/// `name` and `path` differ for uploads, where the content sits in a temporary
/// file but the format comes from the client's filename.
#[inline]
pub fn load_document(path: &Path, name: &str) -> Result<Document> {
    let format = DocumentFormat::from_path(Path::new(name));
    if format == DocumentFormat::Unsupported {
        return Err(RagError::Ingestion(format!(
            "Unsupported file format: {}",
            name
        )));
    }

    let bytes = fs::read(path).map_err(|e| {
        RagError::Ingestion(format!("Failed to read {}: {}", path.display(), e))
    })?;

    parse_document(&bytes, name)
}

/// Parse in-memory file content into a document
#[inline]
pub fn parse_document(bytes: &[u8], name: &str) -> Result<Document> {
    let format = DocumentFormat::from_path(Path::new(name));

    let pages = match format {
        DocumentFormat::PlainText => vec![decode_text(bytes, name)?],
        DocumentFormat::Pdf => extract_pdf_pages(bytes, name)?,
        DocumentFormat::Unsupported => {
            return Err(RagError::Ingestion(format!(
                "Unsupported file format: {}",
                name
            )));
        }
    };

    debug!(
        "Loaded {} as {} ({} pages, {} bytes)",
        name,
        format,
        pages.len(),
        bytes.len()
    );

    Ok(Document {
        source: name.to_string(),
        format,
        pages,
    })
}

/// Strict UTF-8 decoding; binary content is rejected instead of mis-decoded
fn decode_text(bytes: &[u8], name: &str) -> Result<String> {
    if bytes.contains(&0) {
        return Err(RagError::Ingestion(format!(
            "{} appears to be a binary file",
            name
        )));
    }

    let text = std::str::from_utf8(bytes).map_err(|e| {
        RagError::Ingestion(format!("{} is not valid UTF-8 text: {}", name, e))
    })?;

    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

fn extract_pdf_pages(bytes: &[u8], name: &str) -> Result<Vec<String>> {
    let pdf = lopdf::Document::load_mem(bytes)
        .map_err(|e| RagError::Ingestion(format!("Failed to parse PDF {}: {}", name, e)))?;

    let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(RagError::Ingestion(format!("PDF {} has no pages", name)));
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        let text = pdf.extract_text(&[page_number]).map_err(|e| {
            RagError::Ingestion(format!(
                "Failed to extract text from page {} of {}: {}",
                page_number, name, e
            ))
        })?;
        pages.push(text);
    }

    Ok(pages)
}

/// Recursively list every file under `dir` that has an extension.
///
/// Hidden files and directories are skipped. Subdirectories that cannot be read
/// are logged and skipped; only a missing or unreadable root is an error.
#[inline]
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RagError::Ingestion(format!(
            "Data directory does not exist or is not a directory: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    let mut is_root = true;

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if is_root => {
                return Err(RagError::Ingestion(format!(
                    "Failed to read directory {}: {}",
                    current.display(),
                    e
                )));
            }
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", current.display(), e);
                continue;
            }
        };
        is_root = false;

        for entry in entries.flatten() {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }

            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => pending.push(path),
                Ok(_) if path.is_file() && path.extension().is_some() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
    }

    files.sort();
    debug!("Discovered {} files under {}", files.len(), dir.display());
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
