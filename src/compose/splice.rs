//! 原生拼接：把源 DOCX 的正文按包级别复制进目标文档
//!
//! Body XML is copied verbatim apart from relationship ids, drawing ids and
//! numbering ids. Images, external links and other parts referenced from the
//! body are re-keyed into the target package; referenced styles come along
//! with their `basedOn` chains, and the list definitions they or the body use
//! are copied into the target numbering part under fresh ids. Header/footer
//! parts and picture bullets are not carried over.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::{Captures, NoExpand, Regex};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::cover::PageGeometry;
use super::package::{
    declared_content_type, default_extensions, insert_before_close, media_content_type,
    parse_relationships, resolve_target, Package, Relationship, CONTENT_TYPES_PART, DOCUMENT_PART,
    DOCUMENT_RELS_PART, NUMBERING_CONTENT_TYPE, NUMBERING_PART, REL_NUMBERING_TYPE, STYLES_PART,
    WORDML_NS, XML_DECLARATION,
};
use super::ComposeError;

const STYLE_REF_ELEMENTS: [&[u8]; 3] = [b"w:pStyle", b"w:rStyle", b"w:tblStyle"];
const FIRST_DOC_PR_ID: u32 = 1000;
const NUMBERING_CLOSE: &str = "</w:numbering>";
const NUM_CLEANUP: &str = "<w:numIdMacAtCleanup";

/// 文档部件的切分位置
struct DocumentLayout {
    root: Range<usize>,
    root_name: String,
    body: Range<usize>,
    sect_pr: Option<Range<usize>>,
}

impl DocumentLayout {
    fn scan(xml: &str) -> Result<Self, ComposeError> {
        let mut reader = Reader::from_str(xml);
        let mut depth = 0usize;
        let mut root = None;
        let mut root_name = String::new();
        let mut body_start = None;
        let mut body_end = None;
        let mut sect_pr = None;

        loop {
            let before = reader.buffer_position();
            match reader.read_event()? {
                Event::Start(e) => {
                    let after = reader.buffer_position();
                    if depth == 2 && e.name().as_ref() == b"w:sectPr" {
                        reader.read_to_end(e.name())?;
                        sect_pr = Some(before..reader.buffer_position());
                        continue;
                    }
                    depth += 1;
                    match depth {
                        1 => {
                            root = Some(before..after);
                            root_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        }
                        2 if e.name().as_ref() == b"w:body" => body_start = Some(after),
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    let after = reader.buffer_position();
                    if depth == 2 && e.name().as_ref() == b"w:sectPr" {
                        sect_pr = Some(before..after);
                    } else if depth == 1 && e.name().as_ref() == b"w:body" {
                        body_start = Some(after);
                        body_end = Some(after);
                    }
                }
                Event::End(e) => {
                    if depth == 2 && e.name().as_ref() == b"w:body" {
                        body_end = Some(before);
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match (root, body_start, body_end) {
            (Some(root), Some(start), Some(end)) => Ok(Self {
                root,
                root_name,
                body: start..end,
                sect_pr,
            }),
            _ => Err(ComposeError::MissingPart("w:body".to_string())),
        }
    }

    /// Body children with the section properties cut out.
    fn content(&self, xml: &str) -> String {
        match &self.sect_pr {
            Some(sect) if sect.start >= self.body.start && sect.end <= self.body.end => {
                format!("{}{}", &xml[self.body.start..sect.start], &xml[sect.end..self.body.end])
            }
            _ => xml[self.body.clone()].to_string(),
        }
    }
}

fn root_attributes(tag: &str) -> Result<Vec<(String, String)>, ComposeError> {
    let mut reader = Reader::from_str(tag);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let mut attrs = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    attrs.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        attr.unescape_value()?.into_owned(),
                    ));
                }
                return Ok(attrs);
            }
            Event::Eof => return Ok(Vec::new()),
            _ => {}
        }
    }
}

/// id -> 原始元素文本，例如 styleId -> `<w:style>`、numId -> `<w:num>`
fn elements_by_id(xml: &str, tag: &[u8], id_attr: &[u8]) -> Result<HashMap<String, String>, ComposeError> {
    let mut reader = Reader::from_str(xml);
    let mut elements = HashMap::new();
    loop {
        let before = reader.buffer_position();
        let (event, closed) = match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == tag => (e, false),
            Event::Empty(e) if e.name().as_ref() == tag => (e, true),
            Event::Eof => break,
            _ => continue,
        };
        let mut id = None;
        for attr in event.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.as_ref() == id_attr {
                id = Some(attr.unescape_value()?.into_owned());
            }
        }
        if !closed {
            reader.read_to_end(event.name())?;
        }
        if let Some(id) = id {
            elements.insert(id, xml[before..reader.buffer_position()].to_string());
        }
    }
    Ok(elements)
}

fn style_id_pattern() -> &'static Regex {
    static STYLE_ID: OnceLock<Regex> = OnceLock::new();
    STYLE_ID.get_or_init(|| Regex::new(r#"w:styleId="([^"]+)""#).expect("style id pattern is valid"))
}

fn based_on_pattern() -> &'static Regex {
    static BASED_ON: OnceLock<Regex> = OnceLock::new();
    BASED_ON.get_or_init(|| Regex::new(r#"<w:basedOn\s+w:val="([^"]+)""#).expect("basedOn pattern is valid"))
}

/// `<w:numId w:val="..">` references in body or style XML
fn num_ref_pattern() -> &'static Regex {
    static NUM_REF: OnceLock<Regex> = OnceLock::new();
    NUM_REF.get_or_init(|| {
        Regex::new(r#"(<w:numId\s+w:val=["'])(\d+)(["'])"#).expect("numId pattern is valid")
    })
}

/// `<w:abstractNumId w:val="..">` inside a `<w:num>`
fn abstract_ref_pattern() -> &'static Regex {
    static ABSTRACT_REF: OnceLock<Regex> = OnceLock::new();
    ABSTRACT_REF.get_or_init(|| {
        Regex::new(r#"(<w:abstractNumId\s+w:val=["'])(\d+)(["'])"#).expect("abstractNumId pattern is valid")
    })
}

fn num_id_attr_pattern() -> &'static Regex {
    static NUM_ID: OnceLock<Regex> = OnceLock::new();
    NUM_ID.get_or_init(|| Regex::new(r#"w:numId=["']\d+["']"#).expect("numId attribute pattern is valid"))
}

fn abstract_id_attr_pattern() -> &'static Regex {
    static ABSTRACT_ID: OnceLock<Regex> = OnceLock::new();
    ABSTRACT_ID.get_or_init(|| {
        Regex::new(r#"w:abstractNumId=["']\d+["']"#).expect("abstractNumId attribute pattern is valid")
    })
}

/// `<w:num ` or `<w:num>`, not `<w:numbering` / `<w:numPicBullet`
fn num_open_pattern() -> &'static Regex {
    static NUM_OPEN: OnceLock<Regex> = OnceLock::new();
    NUM_OPEN.get_or_init(|| Regex::new(r"<w:num[\s>/]").expect("num pattern is valid"))
}

fn style_ids(xml: &str) -> HashSet<String> {
    style_id_pattern()
        .captures_iter(xml)
        .map(|c| c[1].to_string())
        .collect()
}

fn based_on(style: &str) -> Option<String> {
    based_on_pattern().captures(style).map(|c| c[1].to_string())
}

/// Referenced numIds in first-seen order; `0` means "no numbering".
fn num_refs<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for xml in sources {
        for c in num_ref_pattern().captures_iter(xml) {
            let id = c[2].to_string();
            if id != "0" && seen.insert(id.clone()) {
                refs.push(id);
            }
        }
    }
    refs
}

fn rewrite_num_refs(xml: &str, map: &HashMap<String, String>) -> String {
    num_ref_pattern()
        .replace_all(xml, |c: &Captures| match map.get(&c[2]) {
            Some(mapped) => format!("{}{}{}", &c[1], mapped, &c[3]),
            None => c[0].to_string(),
        })
        .into_owned()
}

fn next_id(ids: impl Iterator<Item = String>) -> u32 {
    ids.filter_map(|id| id.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

/// 把新的 abstractNum / num 插入编号部件；abstractNum 必须全部排在 num 之前
fn merge_numbering(existing: Option<&str>, abstracts: &[String], nums: &[String]) -> Result<String, ComposeError> {
    let xml = match existing {
        Some(xml) => xml.to_string(),
        None => format!(
            "{}\n<w:numbering xmlns:w=\"{}\">{}",
            XML_DECLARATION, WORDML_NS, NUMBERING_CLOSE
        ),
    };
    let close = xml
        .rfind(NUMBERING_CLOSE)
        .ok_or_else(|| ComposeError::MissingPart(format!("closing tag {}", NUMBERING_CLOSE)))?;
    let tail = xml.find(NUM_CLEANUP).filter(|at| *at < close).unwrap_or(close);
    let first_num = num_open_pattern()
        .find(&xml)
        .map(|m| m.start())
        .filter(|at| *at < tail)
        .unwrap_or(tail);

    let added = abstracts.iter().chain(nums).map(String::len).sum::<usize>();
    let mut out = String::with_capacity(xml.len() + added);
    out.push_str(&xml[..first_num]);
    abstracts.iter().for_each(|a| out.push_str(a));
    out.push_str(&xml[first_num..tail]);
    nums.iter().for_each(|n| out.push_str(n));
    out.push_str(&xml[tail..]);
    Ok(out)
}

/// 一次拼接产生的全部改动，成功后才提交
#[derive(Default)]
struct Import {
    body: String,
    parts: Vec<(String, Vec<u8>)>,
    rels: Vec<Relationship>,
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    styles: Vec<String>,
    abstract_nums: Vec<String>,
    nums: Vec<String>,
    namespaces: Vec<(String, String)>,
    ignorable: Vec<String>,
    next_doc_pr: u32,
    next_num_id: u32,
    next_abstract_id: u32,
}

/// 正在导入的源文档
struct SourceContext<'s> {
    tag: usize,
    source: &'s Package,
    rels: HashMap<String, Relationship>,
    content_types: String,
    id_map: HashMap<String, String>,
    styles: Vec<String>,
}

/// 目标文档：基础包（模板或空白文档）+ 逐段追加的正文
pub struct Splicer {
    base: Package,
    document: String,
    layout: DocumentLayout,
    root_attrs: Vec<(String, String)>,
    body: String,
    rels_xml: String,
    rel_ids: HashSet<String>,
    content_types: String,
    extensions: HashSet<String>,
    styles_xml: Option<String>,
    known_styles: HashSet<String>,
    numbering_part: String,
    numbering_xml: Option<String>,
    numbering_linked: bool,
    next_num_id: u32,
    next_abstract_id: u32,
    next_doc_pr: u32,
    spliced: usize,
}

impl Splicer {
    pub fn new(base: Package) -> Result<Self, ComposeError> {
        let document = base.part_str(DOCUMENT_PART)?;
        let layout = DocumentLayout::scan(&document)?;
        let root_attrs = root_attributes(&document[layout.root.clone()])?;
        let rels_xml = base.part_str(DOCUMENT_RELS_PART).unwrap_or_else(|_| {
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#
                .to_string()
        });
        let base_rels = parse_relationships(&rels_xml)?;
        let numbering_target = base_rels
            .iter()
            .find(|r| r.is_numbering())
            .map(|r| resolve_target(&r.target));
        let rel_ids = base_rels.into_iter().map(|r| r.id).collect();
        let content_types = base.part_str(CONTENT_TYPES_PART)?;
        let extensions = default_extensions(&content_types);
        let styles_xml = base.part_str(STYLES_PART).ok();
        let known_styles = styles_xml.as_deref().map(style_ids).unwrap_or_default();

        let numbering_linked = numbering_target.is_some();
        let numbering_part = numbering_target.unwrap_or_else(|| NUMBERING_PART.to_string());
        let numbering_xml = if numbering_linked {
            base.part_str(&numbering_part).ok()
        } else {
            None
        };
        let (next_num_id, next_abstract_id) = match &numbering_xml {
            Some(xml) => (
                next_id(elements_by_id(xml, b"w:num", b"w:numId")?.into_keys()),
                next_id(elements_by_id(xml, b"w:abstractNum", b"w:abstractNumId")?.into_keys()),
            ),
            None => (1, 1),
        };

        Ok(Self {
            base,
            document,
            layout,
            root_attrs,
            body: String::new(),
            rels_xml,
            rel_ids,
            content_types,
            extensions,
            styles_xml,
            known_styles,
            numbering_part,
            numbering_xml,
            numbering_linked,
            next_num_id,
            next_abstract_id,
            next_doc_pr: FIRST_DOC_PR_ID,
            spliced: 0,
        })
    }

    /// 基础包的页面几何
    pub fn geometry(&self) -> PageGeometry {
        match &self.layout.sect_pr {
            Some(range) => PageGeometry::from_sect_pr(&self.document[range.clone()]),
            None => PageGeometry::default(),
        }
    }

    pub fn push_raw(&mut self, xml: &str) {
        self.body.push_str(xml);
    }

    pub fn spliced(&self) -> usize {
        self.spliced
    }

    /// Append the body of `source`. On error nothing is appended.
    pub fn splice(&mut self, source: &Package) -> Result<(), ComposeError> {
        self.splice_after("", source)
    }

    /// Like `splice`, with raw body XML placed in front of the content.
    pub fn splice_after(&mut self, prefix: &str, source: &Package) -> Result<(), ComposeError> {
        let import = self.import(source)?;
        self.commit(prefix, import)
    }

    fn import(&self, source: &Package) -> Result<Import, ComposeError> {
        let tag = self.spliced + 1;
        let xml = source.part_str(DOCUMENT_PART)?;
        let layout = DocumentLayout::scan(&xml)?;
        let content = layout.content(&xml);

        let rels = match source.part_str(DOCUMENT_RELS_PART) {
            Ok(rels) => parse_relationships(&rels)?
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
            Err(_) => HashMap::new(),
        };
        let mut ctx = SourceContext {
            tag,
            source,
            rels,
            content_types: source.part_str(CONTENT_TYPES_PART).unwrap_or_default(),
            id_map: HashMap::new(),
            styles: Vec::new(),
        };
        let mut import = Import {
            next_doc_pr: self.next_doc_pr,
            next_num_id: self.next_num_id,
            next_abstract_id: self.next_abstract_id,
            ..Import::default()
        };

        let mut reader = Reader::from_str(&content);
        let mut writer = Writer::new(Vec::with_capacity(content.len()));
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) => {
                    let e = self.rewrite(e, &mut ctx, &mut import)?;
                    writer.write_event(Event::Start(e))?;
                }
                Event::Empty(e) => {
                    let e = self.rewrite(e, &mut ctx, &mut import)?;
                    writer.write_event(Event::Empty(e))?;
                }
                event => writer.write_event(event)?,
            }
        }
        import.body = String::from_utf8(writer.into_inner())
            .map_err(|e| ComposeError::Package(e.to_string()))?;

        let referenced = std::mem::take(&mut ctx.styles);
        self.import_styles(source, referenced, &mut import)?;
        self.import_numbering(&ctx, &mut import)?;
        self.import_namespaces(&xml[layout.root.clone()], &mut import)?;
        Ok(import)
    }

    fn rewrite<'a>(
        &self,
        element: BytesStart<'a>,
        ctx: &mut SourceContext<'_>,
        import: &mut Import,
    ) -> Result<BytesStart<'a>, ComposeError> {
        let name = element.name();
        let is_doc_pr = name.as_ref() == b"wp:docPr";
        let is_style_ref = STYLE_REF_ELEMENTS.contains(&name.as_ref());

        let mut needs_rewrite = is_doc_pr;
        for attr in element.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.as_ref().starts_with(b"r:") {
                needs_rewrite = true;
            }
            if is_style_ref && attr.key.as_ref() == b"w:val" {
                ctx.styles.push(attr.unescape_value()?.into_owned());
            }
        }
        if !needs_rewrite {
            return Ok(element);
        }

        let mut rewritten = BytesStart::new(String::from_utf8_lossy(name.as_ref()).into_owned());
        for attr in element.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();

            let value = if is_doc_pr && key == "id" {
                import.next_doc_pr += 1;
                import.next_doc_pr.to_string()
            } else if key.starts_with("r:") {
                match ctx.id_map.get(&value) {
                    Some(mapped) => mapped.clone(),
                    None => match ctx.rels.get(&value) {
                        Some(rel) => {
                            let seq = ctx.id_map.len() + 1;
                            let mapped = self.import_relationship(rel, seq, ctx, import)?;
                            ctx.id_map.insert(value, mapped.clone());
                            mapped
                        }
                        None => {
                            debug!("未知的关系 id {}，原样保留", value);
                            value
                        }
                    },
                }
            } else {
                value
            };
            rewritten.push_attribute((key.as_str(), value.as_str()));
        }
        Ok(rewritten)
    }

    fn import_relationship(
        &self,
        rel: &Relationship,
        seq: usize,
        ctx: &SourceContext<'_>,
        import: &mut Import,
    ) -> Result<String, ComposeError> {
        let tag = ctx.tag;
        let mut id = format!("rIdSp{}x{}", tag, seq);
        while self.rel_ids.contains(&id) {
            id.push('_');
        }

        if rel.external {
            import.rels.push(Relationship {
                id: id.clone(),
                ..rel.clone()
            });
            return Ok(id);
        }

        let part = resolve_target(&rel.target);
        let bytes = ctx
            .source
            .part(&part)
            .ok_or_else(|| ComposeError::MissingPart(part.clone()))?
            .to_vec();
        let file_name = part.rsplit('/').next().unwrap_or("part").to_string();
        let ext = file_name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();

        let (new_part, target) = if rel.is_image() {
            let target = format!("media/spliced{}_{}", tag, file_name);
            (format!("word/{}", target), target)
        } else {
            let target = format!("spliced{}_{}", tag, file_name);
            (format!("word/{}", target), target)
        };

        if rel.is_image() {
            let known = self.extensions.contains(&ext) || import.defaults.iter().any(|(e, _)| *e == ext);
            if !known {
                let ctype = declared_content_type(&ctx.content_types, &part)
                    .unwrap_or_else(|| media_content_type(&ext).to_string());
                import.defaults.push((ext, ctype));
            }
        } else {
            match declared_content_type(&ctx.content_types, &part) {
                Some(ctype) => import.overrides.push((format!("/{}", new_part), ctype)),
                None => warn!("部件 {} 没有声明内容类型", part),
            }
        }

        import.parts.push((new_part, bytes));
        import.rels.push(Relationship {
            id: id.clone(),
            rel_type: rel.rel_type.clone(),
            target,
            external: false,
        });
        Ok(id)
    }

    fn import_styles(&self, source: &Package, referenced: Vec<String>, import: &mut Import) -> Result<(), ComposeError> {
        if referenced.is_empty() || self.styles_xml.is_none() {
            return Ok(());
        }
        let Ok(source_styles) = source.part_str(STYLES_PART) else {
            return Ok(());
        };
        let catalog = elements_by_id(&source_styles, b"w:style", b"w:styleId")?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut pending = referenced;
        while let Some(id) = pending.pop() {
            if self.known_styles.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            match catalog.get(&id) {
                Some(raw) => {
                    if let Some(parent) = based_on(raw) {
                        pending.push(parent);
                    }
                    import.styles.push(raw.clone());
                }
                None => debug!("源文档没有样式 {}", id),
            }
        }
        Ok(())
    }

    /// 复制正文和导入样式用到的列表定义，numId / abstractNumId 重新编号
    fn import_numbering(&self, ctx: &SourceContext<'_>, import: &mut Import) -> Result<(), ComposeError> {
        let sources = std::iter::once(import.body.as_str()).chain(import.styles.iter().map(String::as_str));
        let referenced = num_refs(sources);
        if referenced.is_empty() {
            return Ok(());
        }
        let part = ctx
            .rels
            .values()
            .find(|r| r.is_numbering())
            .map(|r| resolve_target(&r.target))
            .unwrap_or_else(|| NUMBERING_PART.to_string());
        let Ok(source_numbering) = ctx.source.part_str(&part) else {
            debug!("源文档引用了编号但没有 {}", part);
            return Ok(());
        };
        let nums = elements_by_id(&source_numbering, b"w:num", b"w:numId")?;
        let abstracts = elements_by_id(&source_numbering, b"w:abstractNum", b"w:abstractNumId")?;

        let mut num_map: HashMap<String, String> = HashMap::new();
        let mut abstract_map: HashMap<String, String> = HashMap::new();
        for id in referenced {
            let Some(num) = nums.get(&id) else {
                debug!("源文档没有编号 {}", id);
                continue;
            };
            let Some(abstract_id) = abstract_ref_pattern().captures(num).map(|c| c[2].to_string()) else {
                continue;
            };
            let Some(abstract_num) = abstracts.get(&abstract_id) else {
                debug!("源文档没有列表定义 {}", abstract_id);
                continue;
            };

            let new_abstract = match abstract_map.get(&abstract_id).cloned() {
                Some(mapped) => mapped,
                None => {
                    let mapped = import.next_abstract_id.to_string();
                    import.next_abstract_id += 1;
                    let attr = format!(r#"w:abstractNumId="{}""#, mapped);
                    import
                        .abstract_nums
                        .push(abstract_id_attr_pattern().replacen(abstract_num, 1, NoExpand(&attr)).into_owned());
                    abstract_map.insert(abstract_id, mapped.clone());
                    mapped
                }
            };
            let new_num = import.next_num_id.to_string();
            import.next_num_id += 1;
            let attr = format!(r#"w:numId="{}""#, new_num);
            let num = num_id_attr_pattern().replacen(num, 1, NoExpand(&attr));
            let num = abstract_ref_pattern().replacen(&num, 1, |c: &Captures| {
                format!("{}{}{}", &c[1], new_abstract, &c[3])
            });
            import.nums.push(num.into_owned());
            num_map.insert(id, new_num);
        }
        if num_map.is_empty() {
            return Ok(());
        }

        import.body = rewrite_num_refs(&import.body, &num_map);
        for style in &mut import.styles {
            *style = rewrite_num_refs(style, &num_map);
        }

        if !self.numbering_linked {
            let mut id = "rIdNumbering".to_string();
            while self.rel_ids.contains(&id) || import.rels.iter().any(|r| r.id == id) {
                id.push('_');
            }
            let target = self
                .numbering_part
                .strip_prefix("word/")
                .unwrap_or(&self.numbering_part)
                .to_string();
            import.rels.push(Relationship {
                id,
                rel_type: REL_NUMBERING_TYPE.to_string(),
                target,
                external: false,
            });
        }
        let part_name = format!("/{}", self.numbering_part);
        if !self.content_types.contains(&format!(r#"PartName="{}""#, part_name)) {
            import.overrides.push((part_name, NUMBERING_CONTENT_TYPE.to_string()));
        }
        debug!("导入 {} 个编号定义", import.nums.len());
        Ok(())
    }

    fn import_namespaces(&self, source_root: &str, import: &mut Import) -> Result<(), ComposeError> {
        let ignorable: HashSet<&str> = self
            .root_attrs
            .iter()
            .find(|(k, _)| k == "mc:Ignorable")
            .map(|(_, v)| v.split_whitespace().collect())
            .unwrap_or_default();

        for (key, value) in root_attributes(source_root)? {
            if key.starts_with("xmlns:") {
                if !self.root_attrs.iter().any(|(k, _)| *k == key) {
                    import.namespaces.push((key, value));
                }
            } else if key == "mc:Ignorable" {
                for prefix in value.split_whitespace() {
                    if !ignorable.contains(prefix) {
                        import.ignorable.push(prefix.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    /// 先算出所有新的部件文本，全部成功后才改动自身
    fn commit(&mut self, prefix: &str, import: Import) -> Result<(), ComposeError> {
        let rels_xml = if import.rels.is_empty() {
            None
        } else {
            let snippets: Vec<String> = import.rels.iter().map(Relationship::to_xml).collect();
            Some(insert_before_close(&self.rels_xml, "</Relationships>", &snippets)?)
        };

        let mut new_extensions: Vec<String> = Vec::new();
        let mut type_snippets = Vec::new();
        for (ext, ctype) in &import.defaults {
            if !self.extensions.contains(ext) && !new_extensions.contains(ext) {
                new_extensions.push(ext.clone());
                type_snippets.push(format!(
                    r#"<Default Extension="{}" ContentType="{}"/>"#,
                    escape(ext),
                    escape(ctype)
                ));
            }
        }
        for (part, ctype) in &import.overrides {
            type_snippets.push(format!(
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape(part),
                escape(ctype)
            ));
        }
        let content_types = insert_before_close(&self.content_types, "</Types>", &type_snippets)?;

        let styles_xml = match &self.styles_xml {
            Some(styles) => Some(insert_before_close(styles, "</w:styles>", &import.styles)?),
            None => None,
        };

        let numbering_xml = if import.nums.is_empty() {
            None
        } else {
            Some(merge_numbering(self.numbering_xml.as_deref(), &import.abstract_nums, &import.nums)?)
        };

        self.body.push_str(prefix);
        self.body.push_str(&import.body);
        self.next_doc_pr = import.next_doc_pr;
        self.next_num_id = import.next_num_id;
        self.next_abstract_id = import.next_abstract_id;
        for (name, bytes) in import.parts {
            self.base.set_part(&name, bytes);
        }
        if let Some(rels_xml) = rels_xml {
            if import.rels.iter().any(Relationship::is_numbering) {
                self.numbering_linked = true;
            }
            self.rels_xml = rels_xml;
            self.rel_ids.extend(import.rels.into_iter().map(|r| r.id));
        }
        self.extensions.extend(new_extensions);
        self.content_types = content_types;
        if let Some(styles) = styles_xml {
            self.known_styles.extend(style_ids(&styles));
            self.styles_xml = Some(styles);
        }
        if numbering_xml.is_some() {
            self.numbering_xml = numbering_xml;
        }

        for (key, value) in import.namespaces {
            if !self.root_attrs.iter().any(|(k, _)| *k == key) {
                self.root_attrs.push((key, value));
            }
        }
        if !import.ignorable.is_empty() {
            let declared: HashSet<String> = self
                .root_attrs
                .iter()
                .filter_map(|(k, _)| k.strip_prefix("xmlns:").map(str::to_string))
                .collect();
            let additions: Vec<String> = import
                .ignorable
                .into_iter()
                .filter(|p| declared.contains(p))
                .collect();
            if !additions.is_empty() {
                match self.root_attrs.iter_mut().find(|(k, _)| k == "mc:Ignorable") {
                    Some((_, value)) => {
                        for prefix in additions {
                            if !value.split_whitespace().any(|p| p == prefix) {
                                value.push(' ');
                                value.push_str(&prefix);
                            }
                        }
                    }
                    None if declared.contains("mc") => {
                        self.root_attrs.push(("mc:Ignorable".to_string(), additions.join(" ")));
                    }
                    None => {}
                }
            }
        }

        self.spliced += 1;
        Ok(())
    }

    fn root_tag(&self) -> String {
        let mut tag = format!("<{}", self.layout.root_name);
        for (key, value) in &self.root_attrs {
            tag.push_str(&format!(r#" {}="{}""#, key, escape(value)));
        }
        tag.push('>');
        tag
    }

    pub fn document_xml(&self) -> String {
        let sect_pr = self
            .layout
            .sect_pr
            .as_ref()
            .map(|r| &self.document[r.clone()])
            .unwrap_or_default();
        format!(
            "{}\n{}<w:body>{}{}</w:body></{}>",
            XML_DECLARATION,
            self.root_tag(),
            self.body,
            sect_pr,
            self.layout.root_name
        )
    }

    pub fn finish(mut self, output: &Path) -> Result<(), ComposeError> {
        let document = self.document_xml();
        self.base.set_part(DOCUMENT_PART, document.into_bytes());
        self.base.set_part(DOCUMENT_RELS_PART, self.rels_xml.clone().into_bytes());
        self.base.set_part(CONTENT_TYPES_PART, self.content_types.clone().into_bytes());
        if let Some(styles) = self.styles_xml.take() {
            self.base.set_part(STYLES_PART, styles.into_bytes());
        }
        if let Some(numbering) = self.numbering_xml.take() {
            self.base.set_part(&self.numbering_part, numbering.into_bytes());
        }
        self.base.write(output)
    }
}
