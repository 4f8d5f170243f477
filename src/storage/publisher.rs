use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("无法创建发布目录 {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("发布 {} -> {} 失败: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 已发布的成品
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub path: PathBuf,
    pub url: String,
}

/// 成品发布位置，由配置构造后显式传给组装流程
#[derive(Debug, Clone)]
pub struct Publisher {
    dir: PathBuf,
    url_prefix: String,
    pdf_file_name: String,
    docx_file_name: String,
    session_scoped: bool,
}

impl Publisher {
    pub fn from_config(config: &StorageConfig) -> Self {
        let url_prefix = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.generated_dir.trim_matches('/')
        );
        Self {
            dir: config.generated_path(),
            url_prefix,
            pdf_file_name: config.pdf_file_name.clone(),
            docx_file_name: config.docx_file_name.clone(),
            session_scoped: config.session_scoped_names,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.url_prefix, file_name)
    }

    pub fn pdf_name(&self, session_id: &str) -> String {
        self.scoped(&self.pdf_file_name, session_id)
    }

    pub fn docx_name(&self, session_id: &str) -> String {
        self.scoped(&self.docx_file_name, session_id)
    }

    /// `final_copy.pdf` -> `final_copy_<session>.pdf` when session-scoped names are on
    fn scoped(&self, file_name: &str, session_id: &str) -> String {
        if !self.session_scoped {
            return file_name.to_string();
        }
        match file_name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}_{}.{}", stem, session_id, ext),
            None => format!("{}_{}", file_name, session_id),
        }
    }

    /// 把会话里的文件移动到发布目录，覆盖同名旧文件
    pub async fn publish(&self, file: &Path, file_name: &str) -> Result<Published, PublishError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PublishError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let target = self.dir.join(file_name);
        if let Err(e) = fs::rename(file, &target).await {
            // rename fails across filesystems; stage a copy next to the target
            debug!("rename 失败，改为复制: {}", e);
            let staging = self.dir.join(format!(".{}.partial", file_name));
            let staged = async {
                fs::copy(file, &staging).await?;
                fs::rename(&staging, &target).await
            }
            .await;
            if let Err(source) = staged {
                let _ = fs::remove_file(&staging).await;
                return Err(PublishError::Move {
                    from: file.to_path_buf(),
                    to: target,
                    source,
                });
            }
        }

        let published = Published {
            url: self.url_for(file_name),
            path: target,
        };
        info!("已发布: {} -> {}", published.path.display(), published.url);
        Ok(published)
    }

    pub async fn publish_pdf(&self, file: &Path, session_id: &str) -> Result<Published, PublishError> {
        self.publish(file, &self.pdf_name(session_id)).await
    }

    pub async fn publish_docx(&self, file: &Path, session_id: &str) -> Result<Published, PublishError> {
        self.publish(file, &self.docx_name(session_id)).await
    }

    fn is_deliverable(&self, name: &str) -> bool {
        [&self.pdf_file_name, &self.docx_file_name].iter().any(|base| {
            if name == base.as_str() {
                return true;
            }
            match base.rsplit_once('.') {
                Some((stem, ext)) => {
                    name.starts_with(&format!("{}_", stem)) && name.ends_with(&format!(".{}", ext))
                }
                None => false,
            }
        })
    }

    /// 删除发布目录中的成品文件，返回删除数量
    pub async fn clean(&self) -> Result<usize, PublishError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.file_type().await?.is_file() || !self.is_deliverable(&name) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("删除失败 {}: {}", name, e),
            }
        }
        info!("已清理 {} 个成品文件", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(root: &Path, scoped: bool) -> Publisher {
        Publisher::from_config(&StorageConfig {
            media_root: root.display().to_string(),
            base_url: "https://files.example.com/media/".to_string(),
            session_scoped_names: scoped,
            ..StorageConfig::default()
        })
    }

    #[tokio::test]
    async fn test_publish_overwrites_fixed_name() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let publisher = publisher(root.path(), false);

        for content in ["first", "second"] {
            let file = work.path().join("merged.pdf");
            std::fs::write(&file, content).unwrap();
            let published = publisher.publish_pdf(&file, "ignored").await.unwrap();
            assert_eq!(published.url, "https://files.example.com/media/generated/final_copy.pdf");
            assert!(!file.exists());
        }
        let target = root.path().join("generated/final_copy.pdf");
        assert_eq!(std::fs::read_to_string(target).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_session_scoped_names_and_clean() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let publisher = publisher(root.path(), true);

        let file = work.path().join("merged.docx");
        std::fs::write(&file, "docx").unwrap();
        let published = publisher.publish_docx(&file, "20240101_ab12").await.unwrap();
        assert!(published.url.ends_with("/generated/final_copy_20240101_ab12.docx"));

        std::fs::write(publisher.dir().join("unrelated.txt"), "keep").unwrap();
        assert_eq!(publisher.clean().await.unwrap(), 1);
        assert!(publisher.dir().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_clean_without_directory() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(publisher(&root.path().join("nothing"), false).clean().await.unwrap(), 0);
    }
}
