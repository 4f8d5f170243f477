//! 按格式提取纯文本，供文本提取型合成文档使用

pub mod docx;
pub mod pdf;

use scraper::{Html, Selector};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::artifact::MediaKind;

pub const UNSUPPORTED_MARKER: &str = "[unsupported file type]";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("DOCX包读取失败: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("XML解析失败: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("PDF文本提取失败: {0}")]
    Pdf(String),

    #[error("不支持提取文本的格式: {0:?}")]
    Unsupported(MediaKind),
}

/// 提取文件的纯文本
///
/// Images, spreadsheets and unknown formats return `Unsupported`;
/// callers decide what to render for those.
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let kind = MediaKind::from_extension(&ext);
    debug!("提取文本 ({:?}): {}", kind, path.display());

    match (kind, ext.as_str()) {
        (MediaKind::PageOriented, _) => pdf::pdf_text(path),
        (MediaKind::PageFlow, "docx") => docx::docx_text(path),
        (MediaKind::Markup, "html" | "htm") => {
            let raw = std::fs::read(path)?;
            Ok(html_text(&String::from_utf8_lossy(&raw)))
        }
        (MediaKind::Markup, _) => {
            let raw = std::fs::read(path)?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
        _ => Err(ExtractError::Unsupported(kind)),
    }
}

/// HTML 的可见文本，一个块一行
pub fn html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = match Selector::parse("body") {
        Ok(selector) => document.select(&selector).next(),
        Err(_) => None,
    };
    let chunks: Vec<&str> = match root {
        Some(body) => body.text().collect(),
        None => document.root_element().text().collect(),
    };
    chunks
        .iter()
        .map(|chunk| chunk.trim())
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_text_skips_head() {
        let html = "<html><head><title>ignored</title></head>\
                    <body><h1>Affidavit</h1><p>I, the undersigned, <b>declare</b></p></body></html>";
        let text = html_text(html);
        assert!(text.starts_with("Affidavit"));
        assert!(text.contains("declare"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_plain_text_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.md");
        std::fs::write(&notes, "# Timeline\n\n- entered 2019").unwrap();
        assert!(extract_text(&notes).unwrap().contains("entered 2019"));

        let sheet = dir.path().join("budget.xlsx");
        std::fs::write(&sheet, b"PK").unwrap();
        assert!(matches!(
            extract_text(&sheet),
            Err(ExtractError::Unsupported(MediaKind::Spreadsheet))
        ));

        let legacy = dir.path().join("old.doc");
        std::fs::write(&legacy, b"\xd0\xcf\x11\xe0").unwrap();
        assert!(matches!(extract_text(&legacy), Err(ExtractError::Unsupported(_))));
    }
}
