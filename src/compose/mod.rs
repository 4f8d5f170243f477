//! 合成 DOCX：把若干命名文档按顺序放进一个文档，每个文档前有标签，文档之间分页

pub mod cover;
pub mod package;
pub mod splice;
pub mod writer;

pub use cover::{cover_document, PageGeometry};
pub use package::Package;
pub use splice::Splicer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::report::{ItemOutcome, ItemStatus};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("DOCX打包失败: {0}")]
    Package(String),

    #[error("ZIP读写失败: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML处理失败: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("图片处理失败: {0}")]
    Image(#[from] image::ImageError),

    #[error("缺少部件: {0}")]
    MissingPart(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    /// heading plus `URL: <source>`, nothing embedded
    #[default]
    ReferenceOnly,
    TextExtraction,
    /// full-page cover before each spliced document
    NativeCovers,
    /// separator paragraph before each spliced document
    NativeSeparators,
}

impl CompositeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CompositeStrategy::ReferenceOnly => "reference_only",
            CompositeStrategy::TextExtraction => "text_extraction",
            CompositeStrategy::NativeCovers => "native_covers",
            CompositeStrategy::NativeSeparators => "native_separators",
        }
    }

    /// Whether the builder reads the documents themselves.
    pub fn needs_content(self) -> bool {
        self != CompositeStrategy::ReferenceOnly
    }
}

impl fmt::Display for CompositeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompositeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reference_only" | "reference" => Ok(CompositeStrategy::ReferenceOnly),
            "text_extraction" | "text" => Ok(CompositeStrategy::TextExtraction),
            "native_covers" | "covers" => Ok(CompositeStrategy::NativeCovers),
            "native_separators" | "native" => Ok(CompositeStrategy::NativeSeparators),
            other => Err(format!("unknown composite strategy: {}", other)),
        }
    }
}

/// 合成计划中的一项
#[derive(Debug, Clone)]
pub struct CompositeEntry {
    pub label: String,
    pub source: String,
    /// local copy, absent when the document was not materialized
    pub path: Option<PathBuf>,
}

impl CompositeEntry {
    pub fn new(label: impl Into<String>, source: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            path,
        }
    }

    pub fn reference(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(label, source, None)
    }

    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self::new(
            &artifact.display_name,
            &artifact.source,
            Some(artifact.local_path.clone()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CompositeOutcome {
    pub output: PathBuf,
    pub items: Vec<ItemOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct CompositeBuilder {
    template: Option<PathBuf>,
}

impl CompositeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原生拼接时以该 DOCX 作为基础文档（页面尺寸、页边距、样式）
    pub fn with_template(mut self, template: Option<PathBuf>) -> Self {
        self.template = template;
        self
    }

    /// Single entries never fail the build; only writing the output can.
    pub fn build(
        &self,
        entries: &[CompositeEntry],
        output: &Path,
        strategy: CompositeStrategy,
    ) -> Result<CompositeOutcome, ComposeError> {
        let items = match strategy {
            CompositeStrategy::ReferenceOnly | CompositeStrategy::TextExtraction => {
                writer::build_flow(entries, output, strategy)?
            }
            CompositeStrategy::NativeCovers | CompositeStrategy::NativeSeparators => {
                self.build_native(entries, output, strategy)?
            }
        };
        info!(
            "合成文档完成 ({}): {} 项 -> {}",
            strategy,
            entries.len(),
            output.display()
        );
        Ok(CompositeOutcome {
            output: output.to_path_buf(),
            items,
        })
    }

    fn base_package(&self) -> Result<Package, ComposeError> {
        if let Some(template) = &self.template {
            match Package::open(template) {
                Ok(package) => return Ok(package),
                Err(e) => warn!("模板无法读取，使用空白文档 {}: {}", template.display(), e),
            }
        }
        Package::blank()
    }

    fn build_native(
        &self,
        entries: &[CompositeEntry],
        output: &Path,
        strategy: CompositeStrategy,
    ) -> Result<Vec<ItemOutcome>, ComposeError> {
        let mut splicer = Splicer::new(self.base_package()?)?;
        let geometry = splicer.geometry();
        let mut items = Vec::with_capacity(entries.len());

        for entry in entries {
            let source = match load_source(entry) {
                Ok(package) => package,
                Err(reason) => {
                    warn!("跳过 {}: {}", entry.label, reason);
                    items.push(ItemOutcome::new(
                        &entry.label,
                        &entry.source,
                        ItemStatus::Skipped { reason },
                    ));
                    continue;
                }
            };

            let mut opener = String::new();
            if splicer.spliced() > 0 {
                opener.push_str(cover::page_break_paragraph());
            }
            match strategy {
                CompositeStrategy::NativeCovers => {
                    opener.push_str(&cover::cover_paragraph(&entry.label, &geometry))
                }
                _ => opener.push_str(&cover::separator_paragraph(&entry.label)),
            }
            opener.push_str(cover::page_break_paragraph());

            if let Err(e) = splicer.splice_after(&opener, &source) {
                warn!("拼接失败，跳过 {}: {}", entry.label, e);
                items.push(ItemOutcome::new(
                    &entry.label,
                    &entry.source,
                    ItemStatus::Skipped {
                        reason: e.to_string(),
                    },
                ));
                continue;
            }
            items.push(ItemOutcome::new(&entry.label, &entry.source, ItemStatus::Included));
        }

        splicer.finish(output)?;
        Ok(items)
    }
}

fn load_source(entry: &CompositeEntry) -> Result<Package, String> {
    let path = entry
        .path
        .as_deref()
        .ok_or_else(|| "document was not available".to_string())?;
    let is_docx = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("docx"))
        .unwrap_or(false);
    if !is_docx {
        return Err("only DOCX documents can be spliced".to_string());
    }
    Package::open(path).map_err(|e| e.to_string())
}

/// 按策略生成合成文档，返回输出路径
pub fn build(
    entries: &[CompositeEntry],
    output: &Path,
    strategy: CompositeStrategy,
) -> Result<PathBuf, ComposeError> {
    CompositeBuilder::new()
        .build(entries, output, strategy)
        .map(|outcome| outcome.output)
}
