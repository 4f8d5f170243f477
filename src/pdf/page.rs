use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::path::Path;

use super::fonts::{encode_win_ansi, wrap_text, Font};
use super::PdfError;
use crate::artifact::Artifact;
use crate::utils::truncate_chars;

/// A4 in points, the size reportlab-style separators were always drawn on.
pub const A4: (i64, i64) = (595, 842);

const SIDE_MARGIN: i64 = 56;
pub const MAX_ERROR_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct TextLine {
    pub text: String,
    pub font: Font,
    pub size: u16,
}

impl TextLine {
    pub fn new(text: impl Into<String>, font: Font, size: u16) -> Self {
        Self {
            text: text.into(),
            font,
            size,
        }
    }
}

/// 生成单页 PDF，文本块整体水平、垂直居中，过宽的行自动折行
pub fn centered_text_page(lines: &[TextLine], page_size: (i64, i64)) -> Result<Document, PdfError> {
    let (width, height) = page_size;
    let max_width = (width - 2 * SIDE_MARGIN) as f32;

    let mut laid_out: Vec<TextLine> = Vec::new();
    for line in lines {
        for wrapped in wrap_text(&line.text, line.font, f32::from(line.size), max_width) {
            laid_out.push(TextLine::new(wrapped, line.font, line.size));
        }
    }

    let leading = |line: &TextLine| (f32::from(line.size) * 1.4).round() as i64;
    let block_height: i64 = laid_out.iter().map(leading).sum();
    let mut baseline = height / 2 + block_height / 2;

    let mut operations = Vec::new();
    for line in &laid_out {
        baseline -= leading(line);
        let text_width = line.font.text_width(&line.text, f32::from(line.size));
        let x = ((width as f32 - text_width) / 2.0).round().max(0.0) as i64;
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(line.font.resource_name().as_bytes().to_vec()),
                    Object::Integer(i64::from(line.size)),
                ],
            ),
            Operation::new("Td", vec![Object::Integer(x), Object::Integer(baseline)]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(&line.text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    let mut doc = Document::with_version("1.5");
    let fonts = font_resources(&mut doc);
    let resources = dictionary! { "Font" => fonts };
    finish_single_page(doc, page_size, resources, Content { operations })
}

/// 把 RGB 图片编码成单页 PDF，页面按给定 dpi 取图片原始尺寸
pub fn image_page(image: &RgbImage, dpi: u32) -> Result<Document, PdfError> {
    let (px_width, px_height) = image.dimensions();
    let dpi = dpi.max(1) as f64;
    let page_width = ((f64::from(px_width) * 72.0 / dpi).round() as i64).max(1);
    let page_height = ((f64::from(px_height) * 72.0 / dpi).round() as i64).max(1);

    // Flate keeps the re-encode lossless.
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(image.as_raw())?;
    let compressed = encoder.finish()?;

    let mut doc = Document::with_version("1.5");
    let image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(i64::from(px_width)),
            "Height" => Object::Integer(i64::from(px_height)),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "FlateDecode",
        },
        compressed,
    );
    let image_id = doc.add_object(image_stream);

    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Integer(page_width),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(page_height),
                Object::Integer(0),
                Object::Integer(0),
            ],
        ),
        Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
        Operation::new("Q", vec![]),
    ];
    let resources = dictionary! {
        "XObject" => dictionary! { "Im1" => Object::Reference(image_id) },
    };
    finish_single_page(doc, (page_width, page_height), resources, Content { operations })
}

/// 分隔页：粗体标签居中于空白 A4 页
pub fn separator_document(label: &str) -> Result<Document, PdfError> {
    centered_text_page(&[TextLine::new(label, Font::Bold, 18)], A4)
}

/// 占位页：原文件名 + 截断后的错误信息
pub fn placeholder_document(display_name: &str, error: &str) -> Result<Document, PdfError> {
    let error = truncate_chars(error.trim(), MAX_ERROR_CHARS);
    centered_text_page(
        &[
            TextLine::new("Document could not be included", Font::Bold, 18),
            TextLine::new(display_name, Font::Bold, 14),
            TextLine::new(format!("Error: {}", error), Font::Regular, 11),
        ],
        A4,
    )
}

/// 写出分隔页并作为一个输入条目返回
pub fn make_separator_page(label: &str, path: &Path) -> Result<Artifact, PdfError> {
    write_document(separator_document(label)?, path)?;
    Ok(Artifact::new(label, "separator", path))
}

pub fn write_document(mut doc: Document, path: &Path) -> Result<(), PdfError> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn font_resources(doc: &mut Document) -> Dictionary {
    let mut fonts = Dictionary::new();
    for font in [Font::Regular, Font::Bold] {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource_name(), Object::Reference(font_id));
    }
    fonts
}

fn finish_single_page(
    mut doc: Document,
    (width, height): (i64, i64),
    resources: Dictionary,
    content: Content,
) -> Result<Document, PdfError> {
    let pages_id: ObjectId = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));
    let resources_id = doc.add_object(resources);
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "Contents" => Object::Reference(content_id),
        "Resources" => Object::Reference(resources_id),
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::page_text_contains;

    fn roundtrip(mut doc: Document) -> Document {
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        Document::load_mem(&bytes).unwrap()
    }

    #[test]
    fn test_separator_is_single_centered_page() {
        let doc = roundtrip(separator_document("--- Supporting Documents ---").unwrap());
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        assert!(page_text_contains(&doc, pages[&1], "Supporting Documents"));
    }

    #[test]
    fn test_placeholder_truncates_error() {
        let long_error = "x".repeat(500);
        let doc = roundtrip(placeholder_document("bad-upload.pdf", &long_error).unwrap());
        let page_id = doc.get_pages()[&1];
        assert!(page_text_contains(&doc, page_id, "bad-upload.pdf"));
        assert!(!page_text_contains(&doc, page_id, &"x".repeat(MAX_ERROR_CHARS + 1)));
    }

    #[test]
    fn test_image_page_uses_native_size_at_dpi() {
        let image = RgbImage::from_pixel(200, 100, image::Rgb([10, 20, 30]));
        let doc = roundtrip(image_page(&image, 100).unwrap());
        let page_id = doc.get_pages()[&1];
        let page = doc.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2].as_i64().unwrap(), 144);
        assert_eq!(media_box[3].as_i64().unwrap(), 72);
    }
}
