use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::warn;

use super::ExtractError;
use crate::pdf::{page_strings, unlock};

/// pdf-extract first; it panics on some fonts, so fall back to the raw
/// show-text strings lopdf can see.
pub fn pdf_text(path: &Path) -> Result<String, ExtractError> {
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)));
    match extracted {
        Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("pdf-extract 失败，改用内容流: {}", e),
        Err(_) => warn!("pdf-extract 崩溃，改用内容流: {}", path.display()),
    }

    let mut doc = Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    unlock(&mut doc).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages: Vec<String> = doc
        .get_pages()
        .into_values()
        .map(|page_id| page_strings(&doc, page_id).join("\n"))
        .collect();
    Ok(pages.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{separator_document, write_document};

    #[test]
    fn test_generated_page_text_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sep.pdf");
        write_document(separator_document("Exhibit B").unwrap(), &path).unwrap();
        assert!(pdf_text(&path).unwrap().contains("Exhibit"));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        assert!(pdf_text(&path).is_err());
    }
}
