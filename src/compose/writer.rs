use docx_rs::{AlignmentType, BreakType, Docx, Paragraph, Pic, Run};
use image::{GenericImageView, ImageFormat};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use super::cover::LABEL_HALF_POINTS;
use super::{ComposeError, CompositeEntry, CompositeStrategy};
use crate::artifact::MediaKind;
use crate::extract::{extract_text, ExtractError, UNSUPPORTED_MARKER};
use crate::report::{ItemOutcome, ItemStatus};

/// 6 inches of printable width, in EMU.
pub const IMAGE_WIDTH_EMU: u32 = 6 * 914_400;

/// 引用型 / 文本提取型合成文档
pub fn build_flow(
    entries: &[CompositeEntry],
    output: &Path,
    strategy: CompositeStrategy,
) -> Result<Vec<ItemOutcome>, ComposeError> {
    let mut docx = Docx::new();
    let mut items = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        docx = docx.add_paragraph(heading(&entry.label));

        let (paragraphs, status) = match strategy {
            CompositeStrategy::TextExtraction => text_body(entry),
            _ => (
                vec![plain(&format!("URL: {}", entry.source))],
                ItemStatus::Included,
            ),
        };
        for paragraph in paragraphs {
            docx = docx.add_paragraph(paragraph);
        }
        if i + 1 < entries.len() {
            docx = docx.add_paragraph(page_break());
        }
        items.push(ItemOutcome::new(&entry.label, &entry.source, status));
    }

    let file = File::create(output)?;
    docx.build()
        .pack(file)
        .map_err(|e| ComposeError::Package(e.to_string()))?;
    Ok(items)
}

pub fn heading(label: &str) -> Paragraph {
    Paragraph::new().add_run(
        Run::new()
            .add_text(clean_text(label))
            .bold()
            .size(LABEL_HALF_POINTS as usize),
    )
}

pub fn plain(text: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(clean_text(text)))
}

pub fn page_break() -> Paragraph {
    Paragraph::new().add_run(Run::new().add_break(BreakType::Page))
}

/// XML 1.0 不允许的控制字符
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

fn text_body(entry: &CompositeEntry) -> (Vec<Paragraph>, ItemStatus) {
    let Some(path) = entry.path.as_deref() else {
        let reason = "document was not available".to_string();
        return (
            vec![plain(&format!("[{}: {}]", reason, entry.source))],
            ItemStatus::Substituted { reason },
        );
    };

    if MediaKind::from_path(path) == MediaKind::Image {
        return match image_paragraph(path) {
            Ok(paragraph) => (vec![paragraph], ItemStatus::Included),
            Err(e) => {
                warn!("图片无法嵌入 {}: {}", entry.label, e);
                let reason = format!("image could not be embedded: {}", e);
                (vec![plain(&format!("[{}]", reason))], ItemStatus::Substituted { reason })
            }
        };
    }

    match extract_text(path) {
        Ok(text) => {
            debug!("提取到 {} 字符: {}", text.len(), entry.label);
            let paragraphs = text.lines().map(plain).collect();
            (paragraphs, ItemStatus::Included)
        }
        Err(ExtractError::Unsupported(kind)) => (
            vec![plain(UNSUPPORTED_MARKER)],
            ItemStatus::Substituted {
                reason: format!("unsupported file type ({:?})", kind),
            },
        ),
        Err(e) => {
            warn!("文本提取失败 {}: {}", entry.label, e);
            let reason = format!("text extraction failed: {}", e);
            (vec![plain(&format!("[{}]", reason))], ItemStatus::Substituted { reason })
        }
    }
}

/// Re-encode as PNG first; docx-rs assumes decodable input.
fn image_paragraph(path: &Path) -> Result<Paragraph, ComposeError> {
    let image = image::open(path)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ComposeError::Package("empty image".to_string()));
    }
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let emu_height = (u64::from(IMAGE_WIDTH_EMU) * u64::from(height) / u64::from(width)) as u32;
    let pic = Pic::new(&png).size(IMAGE_WIDTH_EMU, emu_height);
    Ok(Paragraph::new()
        .add_run(Run::new().add_image(pic))
        .align(AlignmentType::Center))
}
