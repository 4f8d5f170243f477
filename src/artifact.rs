use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::utils::digest;

/// 按扩展名识别的文件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    PageOriented,
    PageFlow,
    Spreadsheet,
    Markup,
    Unknown,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "bmp" | "gif" | "tif" | "tiff" | "webp" => MediaKind::Image,
            "pdf" => MediaKind::PageOriented,
            "docx" | "doc" | "odt" | "rtf" => MediaKind::PageFlow,
            "xls" | "xlsx" | "ods" | "csv" => MediaKind::Spreadsheet,
            "txt" | "md" | "markdown" | "html" | "htm" => MediaKind::Markup,
            _ => MediaKind::Unknown,
        }
    }
}

/// 请求中输入文件的分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// supporting evidence
    Files,
    Forms,
    /// named documents, the composite DOCX is built from these
    Docs,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Files => "files",
            Role::Forms => "forms",
            Role::Docs => "docs",
        };
        f.write_str(name)
    }
}

/// 会话内的单个输入或中间文件
///
/// `local_path` 只在所属的工作会话存活期间有效。
#[derive(Debug, Clone)]
pub struct Artifact {
    pub display_name: String,
    pub source: String,
    pub local_path: PathBuf,
    pub media_kind: MediaKind,
    content_hash: OnceLock<String>,
}

impl Artifact {
    pub fn new(
        display_name: impl Into<String>,
        source: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        let local_path = local_path.into();
        let media_kind = MediaKind::from_path(&local_path);
        Self {
            display_name: display_name.into(),
            source: source.into(),
            local_path,
            media_kind,
            content_hash: OnceLock::new(),
        }
    }

    /// 为本地已存在的文件建档，展示名取文件名
    pub fn from_local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let source = path.display().to_string();
        Self::new(name, source, path)
    }

    /// 同一来源换成另一个本地文件（比如转换后的 PDF）
    pub fn with_local_path(&self, path: impl Into<PathBuf>) -> Self {
        Self::new(self.display_name.clone(), self.source.clone(), path)
    }

    pub fn exists(&self) -> bool {
        self.local_path.is_file()
    }

    /// Computed on first use, then cached.
    pub fn content_hash(&self) -> std::io::Result<&str> {
        if let Some(hash) = self.content_hash.get() {
            return Ok(hash);
        }
        let hash = digest::sha256_file(&self.local_path)?;
        Ok(self.content_hash.get_or_init(|| hash))
    }
}
