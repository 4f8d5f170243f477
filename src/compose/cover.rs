use quick_xml::escape::escape;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use super::package::{Package, DOCUMENT_PART};
use super::splice::Splicer;
use super::ComposeError;

/// Bold label size in half-points (20 pt).
pub const LABEL_HALF_POINTS: u32 = 40;
const LABEL_LINE_TWIPS: i64 = 460;
const LABEL_CHAR_TWIPS: i64 = 220;

/// 页面几何尺寸，单位 twip（1/20 pt）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub width: i64,
    pub height: i64,
    pub top: i64,
    pub bottom: i64,
    pub left: i64,
    pub right: i64,
}

impl Default for PageGeometry {
    /// A4 with one-inch margins.
    fn default() -> Self {
        Self {
            width: 11906,
            height: 16838,
            top: 1440,
            bottom: 1440,
            left: 1440,
            right: 1440,
        }
    }
}

impl PageGeometry {
    /// Read `w:pgSz` / `w:pgMar` from a section properties element; missing
    /// values keep their A4 defaults.
    pub fn from_sect_pr(sect_pr: &str) -> Self {
        let mut geometry = Self::default();
        let size = tag_attrs(sect_pr, "w:pgSz");
        if let Some(v) = size.get("w") {
            geometry.width = *v;
        }
        if let Some(v) = size.get("h") {
            geometry.height = *v;
        }
        let margins = tag_attrs(sect_pr, "w:pgMar");
        for (key, slot) in [
            ("top", &mut geometry.top),
            ("bottom", &mut geometry.bottom),
            ("left", &mut geometry.left),
            ("right", &mut geometry.right),
        ] {
            if let Some(v) = margins.get(key) {
                *slot = v.abs();
            }
        }
        geometry
    }

    /// 从模板文档读取最后一节的页面设置
    pub fn from_template(path: &Path) -> Result<Self, ComposeError> {
        let package = Package::open(path)?;
        let xml = package.part_str(DOCUMENT_PART)?;
        let geometry = match xml.rfind("<w:sectPr") {
            Some(at) => Self::from_sect_pr(&xml[at..]),
            None => Self::default(),
        };
        Ok(geometry)
    }

    pub fn usable_width(&self) -> i64 {
        (self.width - self.left - self.right).max(LABEL_CHAR_TWIPS)
    }

    pub fn usable_height(&self) -> i64 {
        (self.height - self.top - self.bottom).max(0)
    }

    /// Space above the label so it sits at the vertical middle of the page.
    pub fn cover_spacing_before(&self, label: &str) -> i64 {
        let chars = label.chars().count().max(1) as i64;
        let per_line = (self.usable_width() / LABEL_CHAR_TWIPS).max(1);
        let lines = (chars + per_line - 1) / per_line;
        (self.usable_height() / 2 - lines * LABEL_LINE_TWIPS / 2).max(0)
    }
}

fn element_pattern() -> &'static Regex {
    static ELEMENT: OnceLock<Regex> = OnceLock::new();
    ELEMENT.get_or_init(|| Regex::new(r"<(w:\w+)\b[^>]*>").expect("element pattern is valid"))
}

fn twips_attr_pattern() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| Regex::new(r#"w:(\w+)="(-?\d+)""#).expect("attribute pattern is valid"))
}

/// First `tag` element's numeric attributes.
fn tag_attrs(xml: &str, tag: &str) -> HashMap<String, i64> {
    let mut found = HashMap::new();
    let element = element_pattern()
        .captures_iter(xml)
        .find(|c| &c[1] == tag)
        .and_then(|c| c.get(0));
    if let Some(m) = element {
        for c in twips_attr_pattern().captures_iter(m.as_str()) {
            if let Ok(value) = c[2].parse() {
                found.insert(c[1].to_string(), value);
            }
        }
    }
    found
}

fn label_run(label: &str) -> String {
    format!(
        r#"<w:r><w:rPr><w:b/><w:bCs/><w:sz w:val="{size}"/><w:szCs w:val="{size}"/></w:rPr><w:t xml:space="preserve">{text}</w:t></w:r>"#,
        size = LABEL_HALF_POINTS,
        text = escape(label)
    )
}

/// 整页封面：标签水平、垂直居中
pub fn cover_paragraph(label: &str, geometry: &PageGeometry) -> String {
    format!(
        r#"<w:p><w:pPr><w:spacing w:before="{}" w:after="0"/><w:jc w:val="center"/></w:pPr>{}</w:p>"#,
        geometry.cover_spacing_before(label),
        label_run(label)
    )
}

pub fn separator_paragraph(label: &str) -> String {
    format!(r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr>{}</w:p>"#, label_run(label))
}

pub fn page_break_paragraph() -> &'static str {
    r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#
}

/// 单页 DOCX 封面，几何尺寸取自模板（没有模板时为 A4）
pub fn cover_document(label: &str, template: Option<&Path>, output: &Path) -> Result<PathBuf, ComposeError> {
    let base = match template {
        Some(path) => Package::open(path)?,
        None => Package::blank()?,
    };
    let mut splicer = Splicer::new(base)?;
    let geometry = splicer.geometry();
    splicer.push_raw(&cover_paragraph(label, &geometry));
    splicer.finish(output)?;
    info!("封面已生成: {}", output.display());
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_from_letter_sect_pr() {
        let sect = r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1000" w:right="1200" w:bottom="1000" w:left="1200" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr>"#;
        let geometry = PageGeometry::from_sect_pr(sect);
        assert_eq!(geometry.width, 12240);
        assert_eq!(geometry.height, 15840);
        assert_eq!(geometry.top, 1000);
        assert_eq!(geometry.left, 1200);
        assert_eq!(geometry.usable_height(), 13840);
    }

    #[test]
    fn test_geometry_reads_only_named_elements() {
        let sect = r#"<w:sectPr><w:cols w:space="720"/><w:pgMar w:top="900" w:right="800" w:bottom="900" w:left="800"/><w:pgSz w:w="11906" w:h="16838" w:orient="portrait"/><w:pgSzExtra w:w="1"/></w:sectPr>"#;
        let geometry = PageGeometry::from_sect_pr(sect);
        assert_eq!(geometry.width, 11906);
        assert_eq!(geometry.height, 16838);
        assert_eq!(geometry.right, 800);
        // repeated lookups share the compiled patterns
        assert_eq!(PageGeometry::from_sect_pr(sect), geometry);
    }

    #[test]
    fn test_missing_sect_pr_values_default_to_a4() {
        let geometry = PageGeometry::from_sect_pr("<w:sectPr/>");
        assert_eq!(geometry, PageGeometry::default());
    }

    #[test]
    fn test_cover_sits_mid_page() {
        let geometry = PageGeometry::default();
        let before = geometry.cover_spacing_before("Exhibit A");
        assert_eq!(before, geometry.usable_height() / 2 - LABEL_LINE_TWIPS / 2);
        // long labels wrap and start higher
        assert!(geometry.cover_spacing_before(&"Supporting ".repeat(20)) < before);
    }

    #[test]
    fn test_cover_escapes_label() {
        let xml = cover_paragraph("Tax <2023> & W-2", &PageGeometry::default());
        assert!(xml.contains("Tax &lt;2023&gt; &amp; W-2"));
        assert!(xml.contains(r#"<w:jc w:val="center"/>"#));
    }

    #[test]
    fn test_cover_document_uses_template_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("letter.docx");
        let mut package = Package::blank().unwrap();
        let xml = package.part_str(DOCUMENT_PART).unwrap();
        let at = xml.rfind("<w:sectPr").unwrap();
        let letter = format!(
            r#"{}<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440"/></w:sectPr></w:body></w:document>"#,
            &xml[..at]
        );
        package.set_part(DOCUMENT_PART, letter.into_bytes());
        package.write(&template).unwrap();

        let output = dir.path().join("cover.docx");
        cover_document("Form I-864", Some(&template), &output).unwrap();
        let written = Package::open(&output).unwrap().part_str(DOCUMENT_PART).unwrap();
        assert!(written.contains("Form I-864"));
        assert!(written.contains(r#"w:w="12240""#));
        let expected = PageGeometry::from_sect_pr(r#"<w:pgSz w:w="12240" w:h="15840"/>"#)
            .cover_spacing_before("Form I-864");
        assert!(written.contains(&format!(r#"w:before="{}""#, expected)));
    }
}
