use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::artifact::MediaKind;
use crate::config::ConversionConfig;
use crate::pdf::PdfError;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("无法启动转换程序 {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("转换超时 ({0:?})")]
    Timeout(Duration),

    #[error("转换失败: {0}")]
    Failed(String),

    #[error("转换没有生成文件: {}", .0.display())]
    NoOutput(PathBuf),

    #[error("不支持的格式: {0:?}")]
    Unsupported(MediaKind),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图片解码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("后台任务失败: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 外部文档转换器（办公套件之类）
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input` to PDF inside `out_dir` and return the new file.
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, ConversionError>;
}

/// `soffice --headless --convert-to pdf`
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: String,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(config.soffice_binary.clone(), config.timeout())
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, ConversionError> {
        debug!("调用 {} 转换: {}", self.binary, input.display());

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ConversionError::Timeout(self.timeout))?
            .map_err(|source| ConversionError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::Failed(stderr.trim().to_string()));
        }

        let produced = pdf_sibling_in(out_dir, input);
        if !produced.is_file() {
            return Err(ConversionError::NoOutput(produced));
        }
        info!("文档转换完成: {}", produced.display());
        Ok(produced)
    }
}

/// `<dir>/<stem>.pdf`
pub(crate) fn pdf_sibling_in(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "converted".to_string());
    dir.join(format!("{}.pdf", stem))
}
