pub mod converter;

pub use converter::{ConversionError, DocumentConverter, SofficeConverter};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, MediaKind};
use crate::config::ConversionConfig;
use crate::pdf::page::image_page;
use crate::pdf::write_document;
use converter::pdf_sibling_in;

/// 格式归一化：把各种输入转成 PDF
///
/// 新文件写在原文件旁边，原文件从不删除。任何失败都返回原路径，
/// 调用方看到非 PDF 路径即表示没有转换。
pub struct FormatNormalizer {
    config: ConversionConfig,
    converter: Arc<dyn DocumentConverter>,
}

impl FormatNormalizer {
    pub fn new(config: ConversionConfig) -> Self {
        let converter = Arc::new(SofficeConverter::from_config(&config));
        Self { config, converter }
    }

    pub fn with_converter(config: ConversionConfig, converter: Arc<dyn DocumentConverter>) -> Self {
        Self { config, converter }
    }

    pub async fn normalize_to_page_oriented(&self, path: &Path) -> PathBuf {
        match self.try_normalize(path).await {
            Ok(converted) => converted,
            Err(ConversionError::Unsupported(kind)) => {
                debug!("跳过转换 ({:?}): {}", kind, path.display());
                path.to_path_buf()
            }
            Err(e) => {
                warn!("格式转换失败，保留原文件 {}: {}", path.display(), e);
                path.to_path_buf()
            }
        }
    }

    /// 归一化单个条目，展示名和来源保持不变
    pub async fn normalize(&self, artifact: &Artifact) -> Artifact {
        let converted = self.normalize_to_page_oriented(&artifact.local_path).await;
        if converted == artifact.local_path {
            artifact.clone()
        } else {
            artifact.with_local_path(converted)
        }
    }

    pub async fn try_normalize(&self, path: &Path) -> Result<PathBuf, ConversionError> {
        let kind = MediaKind::from_path(path);
        match kind {
            MediaKind::PageOriented => Ok(path.to_path_buf()),
            MediaKind::Image => image_to_pdf(path, self.config.image_dpi).await,
            MediaKind::PageFlow => self.delegate(path).await,
            MediaKind::Spreadsheet if self.config.convert_spreadsheets => self.delegate(path).await,
            MediaKind::Markup if self.config.convert_markup => self.delegate(path).await,
            _ => Err(ConversionError::Unsupported(kind)),
        }
    }

    async fn delegate(&self, path: &Path) -> Result<PathBuf, ConversionError> {
        if !self.config.enabled {
            return Err(ConversionError::Unsupported(MediaKind::from_path(path)));
        }
        let out_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.converter.convert_to_pdf(path, out_dir).await
    }
}

/// 图片转单页 PDF：强制 RGB，无损压缩，页面尺寸 = 像素 × 72 / dpi
pub async fn image_to_pdf(path: &Path, dpi: u32) -> Result<PathBuf, ConversionError> {
    let source = path.to_path_buf();
    let target = pdf_sibling_in(path.parent().unwrap_or_else(|| Path::new(".")), path);
    let output = target.clone();

    tokio::task::spawn_blocking(move || -> Result<(), ConversionError> {
        let rgb = image::open(&source)?.to_rgb8();
        let doc = image_page(&rgb, dpi)?;
        write_document(doc, &output)?;
        Ok(())
    })
    .await??;

    info!("图片已转为PDF: {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lopdf::Document;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConverter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentConverter for CountingConverter {
        async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, ConversionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let target = pdf_sibling_in(out_dir, input);
            write_document(crate::pdf::separator_document("converted")?, &target)?;
            Ok(target)
        }
    }

    fn counting() -> Arc<CountingConverter> {
        Arc::new(CountingConverter {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_image_becomes_single_page_at_100_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001_passport.png");
        image::RgbaImage::from_pixel(300, 150, image::Rgba([200, 10, 10, 128]))
            .save(&path)
            .unwrap();

        let normalizer = FormatNormalizer::new(ConversionConfig::default());
        let converted = normalizer.normalize_to_page_oriented(&path).await;
        assert_eq!(converted, dir.path().join("001_passport.pdf"));
        assert!(path.exists());

        let doc = Document::load(&converted).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let media_box = doc
            .get_dictionary(pages[&1])
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(media_box[2].as_i64().unwrap(), 216);
        assert_eq!(media_box[3].as_i64().unwrap(), 108);
    }

    #[tokio::test]
    async fn test_pdf_passes_through_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-130.pdf");
        std::fs::write(&path, b"whatever bytes").unwrap();

        let converter = counting();
        let normalizer = FormatNormalizer::with_converter(ConversionConfig::default(), converter.clone());
        assert_eq!(normalizer.normalize_to_page_oriented(&path).await, path);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"whatever bytes");
    }

    #[tokio::test]
    async fn test_undecodable_image_returns_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let normalizer = FormatNormalizer::new(ConversionConfig::default());
        assert_eq!(normalizer.normalize_to_page_oriented(&path).await, path);
        assert!(!dir.path().join("broken.pdf").exists());
    }

    #[tokio::test]
    async fn test_word_documents_are_delegated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002_letter.docx");
        std::fs::write(&path, b"docx").unwrap();

        let converter = counting();
        let normalizer = FormatNormalizer::with_converter(ConversionConfig::default(), converter.clone());
        let artifact = normalizer.normalize(&Artifact::from_local(&path)).await;
        assert_eq!(artifact.local_path, dir.path().join("002_letter.pdf"));
        assert_eq!(artifact.media_kind, MediaKind::PageOriented);
        assert_eq!(artifact.display_name, "002_letter.docx");
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spreadsheets_respect_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.xlsx");
        std::fs::write(&path, b"xlsx").unwrap();

        let config = ConversionConfig {
            convert_spreadsheets: false,
            ..ConversionConfig::default()
        };
        let converter = counting();
        let normalizer = FormatNormalizer::with_converter(config, converter.clone());
        assert_eq!(normalizer.normalize_to_page_oriented(&path).await, path);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
    }
}
