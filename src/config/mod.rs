pub mod manifest;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::artifact::Role;
use crate::compose::CompositeStrategy;

pub use manifest::{Manifest, ManifestEntry};

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
const ENV_PREFIX: &str = "FINALCOPY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置加载失败: {0}")]
    Load(#[from] config::ConfigError),

    #[error("配置序列化失败: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("配置写入失败: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub conversion: ConversionConfig,
    pub assembly: AssemblyConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_concurrent: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// 是否调用外部办公套件转换文档
    pub enabled: bool,
    pub soffice_binary: String,
    pub timeout_secs: u64,
    pub convert_spreadsheets: bool,
    pub convert_markup: bool,
    pub image_dpi: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub separator_label: String,
    /// 只有这些分组会做格式转换
    pub convert_roles: Vec<Role>,
    pub composite_strategy: CompositeStrategy,
    /// 封面页几何尺寸参照的 DOCX 模板，空表示使用默认 A4
    pub template_path: String,
    /// 会话临时目录的父目录，空表示系统临时目录
    pub work_root: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub media_root: String,
    pub generated_dir: String,
    pub base_url: String,
    pub pdf_file_name: String,
    pub docx_file_name: String,
    /// 每次请求使用独立文件名，避免并发请求互相覆盖
    pub session_scoped_names: bool,
}

impl AppConfig {
    /// 默认值 → settings.toml → FINALCOPY__* 环境变量，后者覆盖前者
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl AssemblyConfig {
    pub fn template(&self) -> Option<PathBuf> {
        let trimmed = self.template_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    pub fn work_root(&self) -> Option<PathBuf> {
        let trimmed = self.work_root.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

impl StorageConfig {
    pub fn generated_path(&self) -> PathBuf {
        Path::new(&self.media_root).join(&self.generated_dir)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            max_concurrent: 4,
            user_agent: "finalcopy/0.1".to_string(),
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            soffice_binary: "soffice".to_string(),
            timeout_secs: 120,
            convert_spreadsheets: true,
            convert_markup: true,
            image_dpi: 100,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            separator_label: "--- Supporting Documents ---".to_string(),
            convert_roles: vec![Role::Files],
            composite_strategy: CompositeStrategy::ReferenceOnly,
            template_path: String::new(),
            work_root: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: "./media".to_string(),
            generated_dir: "generated".to_string(),
            base_url: "http://localhost:8000/media".to_string(),
            pdf_file_name: "final_copy.pdf".to_string(),
            docx_file_name: "final_copy.docx".to_string(),
            session_scoped_names: false,
        }
    }
}
