//! 输入获取：下载 URL 或复制本地文件到会话目录

pub mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, Role};
use crate::config::manifest::name_from_source;
use crate::utils::sanitize_file_name;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("请求失败: {0}")]
    Request(#[from] reqwest::Error),

    #[error("服务器返回 {status}: {url}")]
    Status { status: u16, url: String },

    #[error("本地文件不存在: {}", .0.display())]
    MissingLocal(PathBuf),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("获取任务中断: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Client errors other than 429 are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// 远程下载器
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into `dest_dir` as `{index:03}_{name}` and return the path.
    async fn download(&self, url: &str, dest_dir: &Path, index: usize) -> Result<PathBuf, FetchError>;
}

/// 一个待获取的输入
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// position across the whole manifest; also the file name prefix
    pub index: usize,
    pub role: Role,
    pub source: String,
    /// explicit name from the manifest
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct Materialized {
    pub request: FetchRequest,
    pub result: Result<Artifact, FetchError>,
}

impl FetchRequest {
    pub fn new(index: usize, role: Role, source: impl Into<String>, name: Option<String>) -> Self {
        Self {
            index,
            role,
            source: source.into(),
            name,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| name_from_source(&self.source))
    }
}

pub fn is_url(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn local_file_name(index: usize, name: &str) -> String {
    format!("{:03}_{}", index, sanitize_file_name(name))
}

async fn copy_local(source: &str, dest_dir: &Path, index: usize) -> Result<PathBuf, FetchError> {
    let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
    if !path.is_file() {
        return Err(FetchError::MissingLocal(path));
    }
    let target = dest_dir.join(local_file_name(index, &name_from_source(source)));
    tokio::fs::copy(&path, &target).await?;
    Ok(target)
}

async fn materialize_one(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    dest_dir: &Path,
) -> Result<Artifact, FetchError> {
    let path = if is_url(&request.source) {
        fetcher.download(request.source.trim(), dest_dir, request.index).await?
    } else {
        copy_local(&request.source, dest_dir, request.index).await?
    };

    // bare URLs take the name the server gave the file
    let display_name = match &request.name {
        Some(name) => name.clone(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .map(|n| match n.split_once('_') {
                Some((_, rest)) if !rest.is_empty() => rest.to_string(),
                _ => n,
            })
            .unwrap_or_else(|| request.display_name()),
    };
    debug!("已获取 #{} {} -> {}", request.index, display_name, path.display());
    Ok(Artifact::new(display_name, request.source.clone(), path))
}

/// 并发获取所有输入，结果按原始顺序返回
///
/// Every request yields exactly one `Materialized`, failed ones included.
pub async fn materialize_all(
    requests: Vec<FetchRequest>,
    dest_dir: &Path,
    fetcher: Arc<dyn Fetcher>,
    max_concurrent: usize,
) -> Vec<Materialized> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for request in requests.iter().cloned() {
        let semaphore = semaphore.clone();
        let fetcher = fetcher.clone();
        let dir = dest_dir.to_path_buf();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => materialize_one(fetcher.as_ref(), &request, &dir).await,
                Err(e) => Err(FetchError::Aborted(e.to_string())),
            };
            Materialized { request, result }
        });
    }

    let mut done = Vec::with_capacity(requests.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(materialized) => {
                if let Err(e) = &materialized.result {
                    warn!("获取失败，已跳过 {}: {}", materialized.request.source, e);
                }
                done.push(materialized);
            }
            Err(e) => warn!("获取任务异常退出: {}", e),
        }
    }

    let finished: HashSet<usize> = done.iter().map(|m| m.request.index).collect();
    for request in requests {
        if !finished.contains(&request.index) {
            done.push(Materialized {
                request,
                result: Err(FetchError::Aborted("task did not complete".to_string())),
            });
        }
    }

    done.sort_by_key(|m| m.request.index);
    let ok = done.iter().filter(|m| m.result.is_ok()).count();
    info!("输入获取完成: {}/{}", ok, done.len());
    done
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoNetwork;

    #[async_trait]
    impl Fetcher for NoNetwork {
        async fn download(&self, url: &str, _dest_dir: &Path, _index: usize) -> Result<PathBuf, FetchError> {
            Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    #[test]
    fn test_retry_classification() {
        let status = |status| FetchError::Status {
            status,
            url: "https://example.com".into(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::MissingLocal(PathBuf::from("x")).is_retryable());
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://cdn.example.com/a.pdf"));
        assert!(is_url("HTTP://example.com"));
        assert!(!is_url("/srv/uploads/a.pdf"));
        assert!(!is_url("file:///srv/a.pdf"));
    }

    #[tokio::test]
    async fn test_local_paths_are_copied_with_index_prefix() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let original = src.path().join("birth certificate.pdf");
        std::fs::write(&original, b"%PDF-1.4").unwrap();

        let requests = vec![
            FetchRequest::new(0, Role::Files, original.display().to_string(), None),
            FetchRequest::new(1, Role::Files, "https://example.com/gone.pdf", None),
            FetchRequest::new(2, Role::Forms, src.path().join("absent.pdf").display().to_string(), None),
        ];
        let results = materialize_all(requests, dest.path(), Arc::new(NoNetwork), 2).await;

        assert_eq!(results.len(), 3);
        let first = results[0].result.as_ref().unwrap();
        assert_eq!(first.local_path, dest.path().join("000_birth certificate.pdf"));
        assert_eq!(first.display_name, "birth certificate.pdf");
        assert!(original.exists());
        assert!(matches!(results[1].result, Err(FetchError::Status { status: 404, .. })));
        assert!(matches!(results[2].result, Err(FetchError::MissingLocal(_))));
    }
}
