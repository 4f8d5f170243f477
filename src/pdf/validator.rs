use lopdf::Document;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::page::{placeholder_document, write_document};
use super::{unlock, PdfError};

/// 结构校验的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid { pages: usize },
    Substituted { placeholder: PathBuf, reason: String },
}

impl Validation {
    /// 参与合并的实际路径
    pub fn effective_path<'a>(&'a self, original: &'a Path) -> &'a Path {
        match self {
            Validation::Valid { .. } => original,
            Validation::Substituted { placeholder, .. } => placeholder,
        }
    }
}

/// 只做结构解析（头部 + 对象表 + 页面树），不渲染
pub fn inspect(path: &Path) -> Result<usize, String> {
    check_header(path)?;

    let loaded = panic::catch_unwind(AssertUnwindSafe(|| Document::load(path)))
        .map_err(|_| "parser panicked on malformed structure".to_string())?;
    let mut doc = loaded.map_err(|e| e.to_string())?;

    if doc.is_encrypted() {
        let unlocked = panic::catch_unwind(AssertUnwindSafe(|| unlock(&mut doc)));
        match unlocked {
            Ok(Ok(())) => debug!("已用空密码解密: {}", path.display()),
            Ok(Err(e)) => {
                debug!("空密码无法解密 {}: {}", path.display(), e);
                return Err("encrypted documents are not supported".to_string());
            }
            Err(_) => return Err("encrypted documents are not supported".to_string()),
        }
    }
    let pages = doc.get_pages().len();
    if pages == 0 {
        return Err("document has no pages".to_string());
    }
    Ok(pages)
}

fn check_header(path: &Path) -> Result<(), String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut head = [0u8; 1024];
    let n = file.read(&mut head).map_err(|e| e.to_string())?;
    if head[..n].windows(5).any(|w| w == b"%PDF-") {
        Ok(())
    } else {
        Err("missing %PDF header".to_string())
    }
}

/// 校验失败时在 `placeholder_path` 写入占位页并返回它
///
/// A missing file is the only error; malformed content never is.
pub fn validate_or_substitute(path: &Path, placeholder_path: &Path) -> Result<PathBuf, PdfError> {
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let validation = validate_named(path, &display_name, placeholder_path)?;
    Ok(validation.effective_path(path).to_path_buf())
}

pub fn validate_named(
    path: &Path,
    display_name: &str,
    placeholder_path: &Path,
) -> Result<Validation, PdfError> {
    if !path.is_file() {
        return Err(PdfError::MissingFile(path.to_path_buf()));
    }

    match inspect(path) {
        Ok(pages) => {
            debug!("PDF校验通过: {} ({} 页)", display_name, pages);
            Ok(Validation::Valid { pages })
        }
        Err(reason) => {
            warn!("PDF校验失败，使用占位页: {} ({})", display_name, reason);
            let placeholder = placeholder_document(display_name, &reason)?;
            write_document(placeholder, placeholder_path)?;
            Ok(Validation::Substituted {
                placeholder: placeholder_path.to_path_buf(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{page_text_contains, separator_document};

    #[test]
    fn test_valid_pdf_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.pdf");
        write_document(separator_document("Form I-131").unwrap(), &path).unwrap();

        let placeholder = dir.path().join("placeholder.pdf");
        let result = validate_or_substitute(&path, &placeholder).unwrap();
        assert_eq!(result, path);
        assert!(!placeholder.exists());
    }

    #[test]
    fn test_corrupt_pdf_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken-scan.pdf");
        std::fs::write(&path, b"%PDF-1.4\n1 0 obj << /Type /Catalog").unwrap();

        let placeholder = dir.path().join("placeholder.pdf");
        let result = validate_or_substitute(&path, &placeholder).unwrap();
        assert_eq!(result, placeholder);

        let doc = Document::load(&placeholder).unwrap();
        let page_id = doc.get_pages()[&1];
        assert!(page_text_contains(&doc, page_id, "broken-scan.pdf"));
    }

    #[test]
    fn test_non_pdf_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.pdf");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n not a pdf").unwrap();
        assert_eq!(inspect(&path).unwrap_err(), "missing %PDF header");
    }

    #[test]
    fn test_owner_password_only_pdf_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/owner_only_rc4.pdf");
        assert_eq!(inspect(&path), Ok(1));
    }

    #[test]
    fn test_missing_file_is_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate_or_substitute(&dir.path().join("gone.pdf"), &dir.path().join("p.pdf"));
        assert!(matches!(result, Err(PdfError::MissingFile(_))));
    }
}
