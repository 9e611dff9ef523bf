//! PDF Extraction Module
//!
//! Extracts page text from PDF documents. Enabled with `--features pdf`;
//! without it every call returns [`PdfError::FeatureNotEnabled`].

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF feature not enabled. Compile with --features pdf")]
    FeatureNotEnabled,
}

/// Extract page texts from a PDF file, in page order.
#[cfg(feature = "pdf")]
pub fn extract_pages(path: &Path) -> Result<Vec<String>, PdfError> {
    use pdf_extract::extract_text;

    if !path.exists() {
        return Err(PdfError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("PDF not found: {}", path.display()),
        )));
    }
    let text = extract_text(path).map_err(|e| PdfError::ExtractionFailed(e.to_string()))?;
    Ok(split_pages(&text))
}

#[cfg(not(feature = "pdf"))]
pub fn extract_pages(_path: &Path) -> Result<Vec<String>, PdfError> {
    Err(PdfError::FeatureNotEnabled)
}

/// Split extracted text into pages on form feeds. Each page is trimmed.
///
/// `pdf-extract` emits a form feed between pages, as do many text exports,
/// so the same rule serves plain-text files.
pub fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0C').map(|p| p.trim().to_string()).collect();
    // A trailing form feed should not create a phantom last page.
    while pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_form_feed() {
        let pages = split_pages("first page\n\x0C  second page  \x0C");
        assert_eq!(pages, vec!["first page".to_string(), "second page".to_string()]);
    }

    #[test]
    fn test_single_page_without_form_feed() {
        assert_eq!(split_pages("  only  "), vec!["only".to_string()]);
    }

    #[cfg(not(feature = "pdf"))]
    #[test]
    fn test_feature_gate() {
        let err = extract_pages(Path::new("missing.pdf")).unwrap_err();
        assert!(matches!(err, PdfError::FeatureNotEnabled));
    }
}
