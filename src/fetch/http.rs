use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use super::{local_file_name, FetchError, Fetcher};
use crate::config::manifest::name_from_source;
use crate::config::FetchConfig;

/// reqwest 下载器，带超时和指数退避重试
pub struct HttpFetcher {
    client: Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
        })
    }

    async fn download_once(&self, url: &str, dest_dir: &Path, index: usize) -> Result<PathBuf, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let header_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let file_name = resolve_file_name(header_name.as_deref(), url);

        let bytes = response.bytes().await?;
        let path = dest_dir.join(local_file_name(index, &file_name));
        tokio::fs::write(&path, &bytes).await?;
        info!("下载完成: {} ({} 字节)", path.display(), bytes.len());
        Ok(path)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str, dest_dir: &Path, index: usize) -> Result<PathBuf, FetchError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.pow(attempt - 1);
                info!("下载重试 ({}/{})，等待 {}ms: {}", attempt + 1, self.max_attempts, delay.as_millis(), url);
                tokio::time::sleep(delay).await;
            }

            match self.download_once(url, dest_dir, index).await {
                Ok(path) => return Ok(path),
                Err(e) if !e.is_retryable() => {
                    warn!("下载失败，不再重试: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("下载失败 (尝试 {}/{}): {}", attempt + 1, self.max_attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Aborted(format!("no attempts made for {}", url))))
    }
}

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)filename(\*)?\s*=\s*(?:UTF-8'[^']*')?"?([^";]+)"?"#).expect("disposition pattern is valid")
    })
}

/// Content-Disposition 中的文件名，`filename*` 优先
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for caps in disposition_pattern().captures_iter(header) {
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }
        if caps.get(1).is_some() {
            return Some(percent_decode_str(value).decode_utf8_lossy().into_owned());
        }
        plain.get_or_insert_with(|| value.to_string());
    }
    plain
}

/// 服务器给的名字优先；没有扩展名时补上 URL 里的扩展名
pub fn resolve_file_name(header_name: Option<&str>, url: &str) -> String {
    let url_name = name_from_source(url);
    let mut name = match header_name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => url_name.clone(),
    };
    if name.is_empty() {
        name = "download".to_string();
    }

    let has_extension = Path::new(&name).extension().is_some();
    if !has_extension {
        if let Some(ext) = Path::new(&url_name).extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="I-797 Notice.pdf""#).unwrap(),
            "I-797 Notice.pdf"
        );
        assert_eq!(filename_from_disposition("inline; filename=scan.jpg").unwrap(), "scan.jpg");
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="fallback.pdf"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"#).unwrap(),
            "résumé.pdf"
        );
        assert!(filename_from_disposition("inline").is_none());
    }

    #[test]
    fn test_resolve_file_name_appends_url_suffix() {
        assert_eq!(resolve_file_name(Some("tax_return"), "https://x.io/files/2023.pdf?sig=1"), "tax_return.pdf");
        assert_eq!(resolve_file_name(Some("photo.png"), "https://x.io/f/abc.pdf"), "photo.png");
        assert_eq!(resolve_file_name(None, "https://x.io/files/lease.docx"), "lease.docx");
        assert_eq!(resolve_file_name(Some("  "), "https://x.io/files/lease.docx"), "lease.docx");
    }

    #[test]
    fn test_extended_filename_keeps_bad_escapes() {
        let decoded = |v: &str| filename_from_disposition(&format!("attachment; filename*=UTF-8''{}", v));
        assert_eq!(decoded("100%.pdf").unwrap(), "100%.pdf");
        assert_eq!(decoded("a%2Fb.pdf").unwrap(), "a/b.pdf");
        assert_eq!(decoded("%zz.pdf").unwrap(), "%zz.pdf");
    }

    /// 本地 HTTP 桩：按顺序回应给定状态码（用完后重复最后一个），并记录连接数
    async fn serve_statuses(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(500);
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let body: &[u8] = b"%PDF-1.4 stub";
                let head = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/files/i-94.pdf", addr), hits)
    }

    fn stub_fetcher(max_attempts: u32) -> HttpFetcher {
        HttpFetcher {
            client: Client::builder().no_proxy().build().unwrap(),
            max_attempts,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_download_retries_server_errors_until_success() {
        let (url, hits) = serve_statuses(vec![503, 503, 200]).await;
        let dir = tempfile::tempdir().unwrap();

        let path = stub_fetcher(3).download(&url, dir.path(), 2).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(path, dir.path().join(local_file_name(2, "i-94.pdf")));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 stub");
    }

    #[tokio::test]
    async fn test_download_does_not_retry_not_found() {
        let (url, hits) = serve_statuses(vec![404, 200]).await;
        let dir = tempfile::tempdir().unwrap();

        let err = stub_fetcher(3).download(&url, dir.path(), 0).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_gives_up_after_max_attempts() {
        let (url, hits) = serve_statuses(vec![500]).await;
        let dir = tempfile::tempdir().unwrap();

        let err = stub_fetcher(3).download(&url, dir.path(), 0).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
