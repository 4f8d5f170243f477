pub mod digest;
pub mod logger;

use serde::Serialize;
use thiserror::Error;

use crate::compose::ComposeError;
use crate::pdf::{MergeError, PdfError};
use crate::pipeline::SessionState;
use crate::storage::PublishError;

/// 一次组装请求的整体失败（单个条目的失败不会走到这里）
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("no valid inputs: none of the {requested} requested files or forms could be materialized")]
    NoInputs { requested: usize },

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("separator page failed: {0}")]
    Pdf(#[from] PdfError),

    #[error("composite build failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("session error: {0}")]
    Session(String),

    #[error("aborted during {stage:?}: {reason}")]
    Aborted { stage: SessionState, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 返回给调用方的结构化错误
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub status: u16,
    pub kind: &'static str,
    pub message: String,
}

impl AssemblyError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AssemblyError::NoInputs { .. } | AssemblyError::Merge(MergeError::NoValidPages)
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        let kind = match self {
            AssemblyError::NoInputs { .. } => "no_valid_inputs",
            AssemblyError::Merge(MergeError::NoValidPages) => "no_valid_pages",
            _ => "internal",
        };
        let status = if self.is_client_error() { 400 } else { 500 };
        ErrorPayload {
            status,
            kind,
            message: self.to_string(),
        }
    }
}

/// 按字符截断，保证不会切断多字节字符
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// 把任意名称变成安全的文件名片段
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars(&"x".repeat(150), 100).len(), 100);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("I-94 record.pdf"), "I-94 record.pdf");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn test_payload_distinguishes_client_and_server_errors() {
        let no_inputs = AssemblyError::NoInputs { requested: 3 }.payload();
        assert_eq!(no_inputs.status, 400);
        assert_eq!(no_inputs.kind, "no_valid_inputs");

        let empty = AssemblyError::Merge(MergeError::NoValidPages).payload();
        assert_eq!(empty.status, 400);
        assert!(empty.message.contains("no valid pages to merge"));

        let internal = AssemblyError::Session("boom".into()).payload();
        assert_eq!(internal.status, 500);
        assert_eq!(internal.kind, "internal");
    }
}
