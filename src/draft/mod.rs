//! 模型输出 → 文档：提取代码围栏中的正文并渲染成 DOCX

pub mod markdown;

pub use markdown::render_markdown_docx;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::{sanitize_file_name, truncate_chars};

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("no fenced document block found in model output")]
    NoFencedBlock,

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("DOCX打包失败: {0}")]
    Package(String),
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(.*?)```").expect("fence pattern is valid"))
}

/// 提取模型输出里所有 ``` 围栏块，去掉公共缩进和语言标记
///
/// Zero blocks is `DraftError::NoFencedBlock`, never an empty document.
pub fn extract_document_bodies(raw: &str) -> Result<Vec<String>, DraftError> {
    let bodies: Vec<String> = fence_pattern()
        .captures_iter(raw)
        .map(|c| dedent(strip_info_string(&c[1])).trim().to_string())
        .filter(|body| !body.is_empty())
        .collect();
    if bodies.is_empty() {
        return Err(DraftError::NoFencedBlock);
    }
    Ok(bodies)
}

/// All fenced blocks joined into one markdown document.
pub fn extract_document_body(raw: &str) -> Result<String, DraftError> {
    Ok(extract_document_bodies(raw)?.join("\n\n"))
}

/// An info string sits on the opening fence line itself, e.g. ```markdown
fn strip_info_string(block: &str) -> &str {
    if block.starts_with('\n') || block.starts_with("\r\n") {
        return block;
    }
    match block.split_once('\n') {
        Some((first, rest)) => {
            let first = first.trim();
            let is_tag = !first.is_empty()
                && first
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'));
            if is_tag {
                rest
            } else {
                block
            }
        }
        None => block,
    }
}

/// 去掉所有非空行的公共前导空白；只含空白的行变成空行
pub fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                // margin counts leading whitespace bytes, all ASCII or at least char-aligned
                line.get(margin..).unwrap_or_else(|| line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `<doc type with spaces>` -> `<doc_type_with_spaces>.docx`
pub fn output_file_name(doc_type: &str) -> String {
    format!("{}.docx", sanitize_file_name(&doc_type.trim().replace(' ', "_")))
}

/// 从模型输出生成一个文档，返回写出的路径
///
/// Existing files in `out_dir` are left alone.
pub fn draft_document(doc_type: &str, raw_output: &str, out_dir: &Path) -> Result<PathBuf, DraftError> {
    let body = match extract_document_body(raw_output) {
        Ok(body) => body,
        Err(e) => {
            warn!("模型输出中没有文档内容: {}", doc_type);
            return Err(e);
        }
    };
    info!("{} 的文档内容: {}...", doc_type, truncate_chars(&body, 100));

    std::fs::create_dir_all(out_dir)?;
    let output = out_dir.join(output_file_name(doc_type));
    render_markdown_docx(&body, &output)?;
    info!("文档已生成: {}", output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fence_is_typed_outcome() {
        let result = extract_document_bodies("I'm sorry, I could not draft that letter.");
        assert!(matches!(result, Err(DraftError::NoFencedBlock)));
    }

    #[test]
    fn test_info_string_and_indentation_removed() {
        let raw = "Here you go:\n```markdown\n    # Cover Letter\n\n    Dear Officer,\n      indented more\n```\nThanks";
        let bodies = extract_document_bodies(raw).unwrap();
        assert_eq!(bodies, vec!["# Cover Letter\n\nDear Officer,\n  indented more"]);
    }

    #[test]
    fn test_multiple_blocks_are_joined() {
        let raw = "```\n# Part One\n```\nand\n```md\n# Part Two\n```";
        let body = extract_document_body(raw).unwrap();
        assert_eq!(body, "# Part One\n\n# Part Two");
    }

    #[test]
    fn test_first_line_kept_without_info_string() {
        let raw = "```\nPetition\nbody\n```";
        assert_eq!(extract_document_body(raw).unwrap(), "Petition\nbody");
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("petition cover letter"), "petition_cover_letter.docx");
        assert_eq!(output_file_name("I-130/supplement"), "I-130_supplement.docx");
    }

    #[test]
    fn test_draft_document_writes_docx() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("older.docx"), b"keep me").unwrap();

        let raw = "```markdown\n# Employer Support Letter\n\nWe **strongly** support this petition.\n```";
        let path = draft_document("employer support letter", raw, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("employer_support_letter.docx"));
        assert!(path.is_file());
        assert!(dir.path().join("older.docx").is_file());
    }
}
