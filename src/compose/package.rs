//! DOCX 包（zip）级别的读写：部件、关系、内容类型

use docx_rs::Docx;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ComposeError;

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
pub const STYLES_PART: &str = "word/styles.xml";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const NUMBERING_PART: &str = "word/numbering.xml";

pub const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const REL_NUMBERING_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering";
pub const NUMBERING_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const REL_IMAGE: &str = "/image";
const REL_NUMBERING: &str = "/numbering";

#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<(String, Vec<u8>)>,
}

impl Package {
    pub fn open(path: &Path) -> Result<Self, ComposeError> {
        Self::read(File::open(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ComposeError> {
        Self::read(Cursor::new(bytes))
    }

    /// 空白文档包（docx-rs 默认页面）
    pub fn blank() -> Result<Self, ComposeError> {
        let mut buffer = Cursor::new(Vec::new());
        Docx::new()
            .build()
            .pack(&mut buffer)
            .map_err(|e| ComposeError::Package(e.to_string()))?;
        Self::from_bytes(buffer.into_inner())
    }

    fn read<R: Read + Seek>(reader: R) -> Result<Self, ComposeError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            parts.push((file.name().to_string(), bytes));
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn part_str(&self, name: &str) -> Result<String, ComposeError> {
        let bytes = self
            .part(name)
            .ok_or_else(|| ComposeError::MissingPart(name.to_string()))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.part(name).is_some()
    }

    pub fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        match self.parts.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = bytes,
            None => self.parts.push((name.to_string(), bytes)),
        }
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(n, _)| n.as_str())
    }

    pub fn write(&self, path: &Path) -> Result<(), ComposeError> {
        let mut zip = ZipWriter::new(File::create(path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // [Content_Types].xml goes first
        let ordered = self
            .parts
            .iter()
            .filter(|(n, _)| n == CONTENT_TYPES_PART)
            .chain(self.parts.iter().filter(|(n, _)| n != CONTENT_TYPES_PART));
        for (name, bytes) in ordered {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    pub fn is_image(&self) -> bool {
        !self.external && self.rel_type.ends_with(REL_IMAGE)
    }

    pub fn is_numbering(&self) -> bool {
        !self.external && self.rel_type.ends_with(REL_NUMBERING)
    }

    pub fn to_xml(&self) -> String {
        let mode = if self.external {
            r#" TargetMode="External""#
        } else {
            ""
        };
        format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
            quick_xml::escape::escape(&self.id),
            quick_xml::escape::escape(&self.rel_type),
            quick_xml::escape::escape(&self.target),
            mode
        )
    }
}

pub fn parse_relationships(xml: &str) -> Result<Vec<Relationship>, ComposeError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let mut rel = Relationship {
                    id: String::new(),
                    rel_type: String::new(),
                    target: String::new(),
                    external: false,
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let value = attr.unescape_value()?.into_owned();
                    match attr.key.as_ref() {
                        b"Id" => rel.id = value,
                        b"Type" => rel.rel_type = value,
                        b"Target" => rel.target = value,
                        b"TargetMode" => rel.external = value.eq_ignore_ascii_case("External"),
                        _ => {}
                    }
                }
                if !rel.id.is_empty() {
                    rels.push(rel);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Insert `snippets` right before the closing tag `close`.
pub fn insert_before_close(xml: &str, close: &str, snippets: &[String]) -> Result<String, ComposeError> {
    if snippets.is_empty() {
        return Ok(xml.to_string());
    }
    let at = xml
        .rfind(close)
        .ok_or_else(|| ComposeError::MissingPart(format!("closing tag {}", close)))?;
    let mut out = String::with_capacity(xml.len() + snippets.iter().map(String::len).sum::<usize>());
    out.push_str(&xml[..at]);
    for snippet in snippets {
        out.push_str(snippet);
    }
    out.push_str(&xml[at..]);
    Ok(out)
}

/// Resolve a relationship target of `word/document.xml` to a part name.
pub fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = vec!["word"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn default_pattern() -> &'static Regex {
    static DEFAULT: OnceLock<Regex> = OnceLock::new();
    DEFAULT.get_or_init(|| Regex::new(r#"<Default[^>]*/>"#).expect("default pattern is valid"))
}

fn override_pattern() -> &'static Regex {
    static OVERRIDE: OnceLock<Regex> = OnceLock::new();
    OVERRIDE.get_or_init(|| Regex::new(r#"<Override[^>]*/>"#).expect("override pattern is valid"))
}

fn type_attr_pattern() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"(PartName|ContentType|Extension)="([^"]+)""#).expect("attribute pattern is valid")
    })
}

/// (PartName or Extension, ContentType) of one `<Default>`/`<Override>` tag
fn type_entry(tag: &str) -> (Option<String>, Option<String>) {
    let mut key = None;
    let mut ctype = None;
    for c in type_attr_pattern().captures_iter(tag) {
        match &c[1] {
            "ContentType" => ctype = Some(c[2].to_string()),
            _ => key = Some(c[2].to_string()),
        }
    }
    (key, ctype)
}

/// 已声明的扩展名（小写）
pub fn default_extensions(content_types: &str) -> HashSet<String> {
    default_pattern()
        .find_iter(content_types)
        .filter_map(|m| type_entry(m.as_str()).0)
        .map(|ext| ext.to_ascii_lowercase())
        .collect()
}

/// Content type for `part` as declared by the package, by override or extension.
pub fn declared_content_type(content_types: &str, part: &str) -> Option<String> {
    let part_name = format!("/{}", part);
    for m in override_pattern().find_iter(content_types) {
        if let (Some(name), Some(ctype)) = type_entry(m.as_str()) {
            if name == part_name {
                return Some(ctype);
            }
        }
    }
    let ext = part.rsplit('.').next()?.to_ascii_lowercase();
    for m in default_pattern().find_iter(content_types) {
        if let (Some(found), Some(ctype)) = type_entry(m.as_str()) {
            if found.eq_ignore_ascii_case(&ext) {
                return Some(ctype);
            }
        }
    }
    None
}

pub fn media_content_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
