use lopdf::{dictionary, Bookmark, Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::page::{write_document, A4};
use super::validator::{validate_named, Validation};
use super::{unlock, PdfError};
use crate::artifact::Artifact;
use crate::report::ItemOutcome;

const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_TREE_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no valid pages to merge")]
    NoValidPages,

    #[error("failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: PdfError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: PdfError,
    },
}

/// 合并计划中的一项（已校验、已去重）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub display_name: String,
    pub path: PathBuf,
    pub content_hash: String,
    /// index in the caller's input list
    pub position: usize,
    pub substituted: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub entries: Vec<PlanEntry>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn display_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.display_name.as_str()).collect()
    }
}

/// 合并后每个输入在输出中的页范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageGroup {
    pub display_name: String,
    /// 1-based
    pub first_page: usize,
    pub pages: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub output: PathBuf,
    pub plan: MergePlan,
    pub groups: Vec<PageGroup>,
    pub page_count: usize,
    pub items: Vec<ItemOutcome>,
}

/// 合并引擎：去重、校验替换、按输入顺序拼接
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    placeholder_dir: Option<PathBuf>,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where placeholder pages are written; defaults to the output's directory.
    pub fn with_placeholder_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.placeholder_dir = Some(dir.into());
        self
    }

    /// 生成合并计划：缺失文件跳过，坏文件换占位页，重复内容只保留第一次出现
    pub fn plan(&self, artifacts: &[Artifact], placeholder_dir: &Path) -> (MergePlan, Vec<ItemOutcome>) {
        let mut plan = MergePlan::default();
        let mut items = Vec::with_capacity(artifacts.len());
        let mut first_seen: HashMap<String, String> = HashMap::new();

        for (position, artifact) in artifacts.iter().enumerate() {
            if !artifact.exists() {
                warn!("合并跳过缺失文件: {} ({})", artifact.display_name, artifact.local_path.display());
                items.push(ItemOutcome::skipped(artifact, "file not found"));
                continue;
            }

            let placeholder_path = placeholder_dir.join(format!("placeholder_{:03}.pdf", position));
            let validation =
                match validate_named(&artifact.local_path, &artifact.display_name, &placeholder_path) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("合并跳过 {}: {}", artifact.display_name, e);
                        items.push(ItemOutcome::skipped(artifact, e.to_string()));
                        continue;
                    }
                };

            let (candidate, substituted) = match validation {
                Validation::Valid { .. } => (artifact.clone(), None),
                Validation::Substituted { placeholder, reason } => {
                    (artifact.with_local_path(placeholder), Some(reason))
                }
            };

            let hash = match candidate.content_hash() {
                Ok(h) => h.to_string(),
                Err(e) => {
                    warn!("无法计算哈希 {}: {}", artifact.display_name, e);
                    items.push(ItemOutcome::skipped(artifact, e.to_string()));
                    continue;
                }
            };

            if let Some(first) = first_seen.get(&hash) {
                info!("重复内容，只保留第一次出现: {} (同 {})", artifact.display_name, first);
                items.push(ItemOutcome::skipped(artifact, format!("duplicate of {}", first)));
                continue;
            }
            first_seen.insert(hash.clone(), artifact.display_name.clone());

            items.push(match &substituted {
                Some(reason) => ItemOutcome::substituted(artifact, reason.clone()),
                None => ItemOutcome::included(artifact),
            });
            plan.entries.push(PlanEntry {
                display_name: artifact.display_name.clone(),
                path: candidate.local_path.clone(),
                content_hash: hash,
                position,
                substituted,
            });
        }

        (plan, items)
    }

    pub fn merge(&self, artifacts: &[Artifact], output: &Path) -> Result<MergeOutcome, MergeError> {
        let placeholder_dir = self
            .placeholder_dir
            .clone()
            .or_else(|| output.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let (plan, items) = self.plan(artifacts, &placeholder_dir);
        if plan.is_empty() {
            warn!("没有可合并的有效页面 ({} 个输入)", artifacts.len());
            return Err(MergeError::NoValidPages);
        }

        let groups = concatenate(&plan, output)?;
        let page_count = groups.iter().map(|g| g.pages).sum();
        info!(
            "PDF合并完成: {} 个文档, {} 页 -> {}",
            plan.entries.len(),
            page_count,
            output.display()
        );

        Ok(MergeOutcome {
            output: output.to_path_buf(),
            plan,
            groups,
            page_count,
            items,
        })
    }
}

/// 按顺序合并，返回输出路径
pub fn merge(ordered_artifacts: &[Artifact], output_path: &Path) -> Result<PathBuf, MergeError> {
    MergeEngine::new()
        .merge(ordered_artifacts, output_path)
        .map(|outcome| outcome.output)
}

fn concatenate(plan: &MergePlan, output: &Path) -> Result<Vec<PageGroup>, MergeError> {
    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut groups = Vec::with_capacity(plan.entries.len());
    let mut form_fields: Vec<Object> = Vec::new();
    let mut form_resources: Option<Object> = None;

    for entry in &plan.entries {
        let mut doc = Document::load(&entry.path).map_err(|e| MergeError::Read {
            name: entry.display_name.clone(),
            source: e.into(),
        })?;
        unlock(&mut doc).map_err(|e| MergeError::Read {
            name: entry.display_name.clone(),
            source: e.into(),
        })?;
        push_down_inherited(&mut doc);
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        collect_form_fields(&doc, &mut form_fields, &mut form_resources);

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let first_page = pages.len() + 1;
        for page_id in &page_ids {
            match doc.get_dictionary(*page_id) {
                Ok(dict) => pages.push((*page_id, dict.clone())),
                Err(e) => debug!("忽略无法读取的页面 {:?}: {}", page_id, e),
            }
        }
        if let Some(first) = page_ids.first() {
            let title = match entry.substituted {
                Some(_) => format!("{} (unavailable)", entry.display_name),
                None => entry.display_name.clone(),
            };
            merged.add_bookmark(Bookmark::new(title, [0.0, 0.0, 0.0], 0, *first), None);
        }
        groups.push(PageGroup {
            display_name: entry.display_name.clone(),
            first_page,
            pages: pages.len() + 1 - first_page,
        });

        for (object_id, object) in doc.objects {
            match object.type_name().unwrap_or("") {
                "Catalog" | "Pages" | "Page" | "Outlines" | "Outline" => {}
                _ => {
                    merged.objects.insert(object_id, object);
                }
            }
        }
    }

    if pages.is_empty() {
        return Err(MergeError::NoValidPages);
    }

    merged.max_id = next_id;
    let pages_id = merged.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    for (page_id, mut dict) in pages {
        dict.set("Parent", Object::Reference(pages_id));
        merged.objects.insert(page_id, Object::Dictionary(dict));
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    };
    if !form_fields.is_empty() {
        let mut acro_form = dictionary! {
            "Fields" => form_fields,
            "NeedAppearances" => Object::Boolean(true),
        };
        if let Some(resources) = form_resources {
            acro_form.set("DR", resources);
        }
        catalog.set("AcroForm", Object::Dictionary(acro_form));
    }
    if let Some(outline_id) = merged.build_outline() {
        catalog.set("Outlines", Object::Reference(outline_id));
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = merged.add_object(catalog);
    merged.trailer.set("Root", Object::Reference(catalog_id));

    write_document(merged, output).map_err(|source| MergeError::Write {
        path: output.to_path_buf(),
        source,
    })?;
    Ok(groups)
}

/// Copy attributes that pages inherit from the page tree onto each page,
/// since the source tree nodes are dropped during concatenation.
fn push_down_inherited(doc: &mut Document) {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in page_ids {
        let mut inherited: Vec<(&[u8], Object)> = Vec::new();
        if let Ok(page) = doc.get_dictionary(page_id) {
            for key in INHERITABLE {
                if page.has(key) {
                    continue;
                }
                if let Some(value) = find_inherited(doc, page, key) {
                    inherited.push((key, value));
                }
            }
            if !page.has(b"MediaBox") && !inherited.iter().any(|(k, _)| *k == b"MediaBox") {
                let (w, h) = A4;
                let media_box = vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(w),
                    Object::Integer(h),
                ];
                inherited.push((&b"MediaBox"[..], Object::Array(media_box)));
            }
        }
        if inherited.is_empty() {
            continue;
        }
        if let Ok(page) = doc.get_object_mut(page_id).and_then(|o| o.as_dict_mut()) {
            for (key, value) in inherited {
                page.set(key.to_vec(), value);
            }
        }
    }
}

fn find_inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    None
}

fn collect_form_fields(doc: &Document, fields: &mut Vec<Object>, resources: &mut Option<Object>) {
    let acro_form = doc
        .trailer
        .get(b"Root")
        .and_then(|r| r.as_reference())
        .and_then(|id| doc.get_dictionary(id))
        .and_then(|catalog| catalog.get(b"AcroForm"))
        .and_then(|form| match form {
            Object::Reference(id) => doc.get_dictionary(*id),
            other => other.as_dict(),
        });
    let Ok(acro_form) = acro_form else {
        return;
    };
    if let Ok(Object::Array(items)) = acro_form.get(b"Fields") {
        fields.extend(items.iter().cloned());
    }
    if resources.is_none() {
        if let Ok(dr) = acro_form.get(b"DR") {
            *resources = Some(dr.clone());
        }
    }
}
