pub mod fonts;
pub mod merge;
pub mod page;
pub mod validator;

pub use merge::{MergeEngine, MergeError, MergeOutcome, MergePlan, PlanEntry};
pub use page::{
    make_separator_page, placeholder_document, separator_document, write_document, TextLine, A4,
};
pub use validator::{inspect, validate_or_substitute, Validation};

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF处理错误: {0}")]
    Lopdf(#[from] lopdf::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图片解码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("文件不存在: {}", .0.display())]
    MissingFile(PathBuf),
}

/// 用空用户密码解密（只设了所有者密码的表单就是这样分发的）
///
/// Unencrypted documents are left untouched. The encryption dictionary is
/// dropped so it is not carried into merged output.
pub fn unlock(doc: &mut Document) -> Result<(), lopdf::Error> {
    if !doc.is_encrypted() {
        return Ok(());
    }
    let encrypt_id = doc
        .trailer
        .get(b"Encrypt")
        .and_then(|o| o.as_reference())
        .ok();
    doc.decrypt("")?;
    doc.trailer.remove(b"Encrypt");
    if let Some(id) = encrypt_id {
        doc.objects.remove(&id);
    }
    Ok(())
}

/// 读取某页内容流中直接绘制的字符串（按 Latin-1 解码）
pub fn page_strings(doc: &Document, page_id: ObjectId) -> Vec<String> {
    let mut strings = Vec::new();
    for content_id in doc.get_page_contents(page_id) {
        let stream = match doc.get_object(content_id).and_then(|o| o.as_stream()) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let content = match Content::decode(&data) {
            Ok(c) => c,
            Err(_) => continue,
        };
        for op in content.operations {
            match op.operator.as_str() {
                "Tj" | "'" | "\"" => {
                    for operand in &op.operands {
                        if let Object::String(bytes, _) = operand {
                            strings.push(latin1(bytes));
                        }
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        let joined: String = items
                            .iter()
                            .filter_map(|item| match item {
                                Object::String(bytes, _) => Some(latin1(bytes)),
                                _ => None,
                            })
                            .collect();
                        strings.push(joined);
                    }
                }
                _ => {}
            }
        }
    }
    strings
}

pub fn page_text_contains(doc: &Document, page_id: ObjectId, needle: &str) -> bool {
    page_strings(doc, page_id).iter().any(|s| s.contains(needle))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
