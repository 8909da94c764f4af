//! Text extraction for uploaded CVs.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("could not read PDF: {0}")]
    Pdf(String),

    #[error("text file is not valid UTF-8")]
    NotUtf8,

    #[error("no text could be extracted from the file")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    /// Decides from the declared content type, falling back to the file extension.
    pub fn detect(file_name: Option<&str>, content_type: Option<&str>) -> Result<Self, ExtractError> {
        match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
            Some("application/pdf") => return Ok(DocumentKind::Pdf),
            Some("text/plain") => return Ok(DocumentKind::PlainText),
            _ => {}
        }

        let extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("pdf") => Ok(DocumentKind::Pdf),
            Some("txt") => Ok(DocumentKind::PlainText),
            _ => Err(ExtractError::Unsupported(
                content_type
                    .or(file_name)
                    .unwrap_or("unknown")
                    .to_string(),
            )),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::PlainText => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::PlainText => "text/plain",
        }
    }
}

/// Extracts the text of a document. PDF parsing is CPU-bound; call it off the async runtime.
pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError> {
    let text = match kind {
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?,
        DocumentKind::PlainText => String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::NotUtf8)?,
    };

    let text = normalize_whitespace(&text);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Strips trailing spaces and collapses runs of blank lines left behind by PDF layout.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
