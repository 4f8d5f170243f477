use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::artifact::Role;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("清单读取失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("清单格式错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 清单条目：裸 URL/路径，或带展示名的 `{name, url}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    Bare(String),
    Named { name: String, url: String },
}

impl ManifestEntry {
    pub fn source(&self) -> &str {
        match self {
            ManifestEntry::Bare(source) => source,
            ManifestEntry::Named { url, .. } => url,
        }
    }

    /// Explicit name, else the last path segment of the source.
    pub fn display_name(&self) -> String {
        match self {
            ManifestEntry::Named { name, .. } if !name.trim().is_empty() => name.trim().to_string(),
            _ => name_from_source(self.source()),
        }
    }
}

pub(crate) fn name_from_source(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    without_query
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(source)
        .to_string()
}

/// 一次组装请求的输入清单
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
    pub forms: Vec<ManifestEntry>,
    pub docs: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn entries(&self, role: Role) -> &[ManifestEntry] {
        match role {
            Role::Files => &self.files,
            Role::Forms => &self.forms,
            Role::Docs => &self.docs,
        }
    }

    /// 按请求顺序展开所有条目，顺序即最终拼接顺序
    pub fn ordered(&self) -> Vec<(Role, &ManifestEntry)> {
        [Role::Files, Role::Forms, Role::Docs]
            .into_iter()
            .flat_map(|role| self.entries(role).iter().map(move |e| (role, e)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.forms.is_empty() && self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_bare_and_named_entries() {
        let manifest = Manifest::from_json(
            r#"{
                "files": ["https://cdn.example.com/uploads/passport.jpg?sig=abc"],
                "forms": ["/tmp/i-131.pdf"],
                "docs": [{"name": "Cover Letter", "url": "https://cdn.example.com/cover.docx"}]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.files[0].display_name(), "passport.jpg");
        assert_eq!(manifest.forms[0].display_name(), "i-131.pdf");
        assert_eq!(manifest.docs[0].display_name(), "Cover Letter");
        assert_eq!(manifest.docs[0].source(), "https://cdn.example.com/cover.docx");
    }

    #[test]
    fn test_missing_roles_default_to_empty() {
        let manifest = Manifest::from_json(r#"{"files": ["a.pdf"]}"#).unwrap();
        assert!(manifest.forms.is_empty());
        assert!(manifest.docs.is_empty());
        assert!(!manifest.is_empty());
    }

    #[test]
    fn test_ordered_keeps_role_then_request_order() {
        let manifest = Manifest::from_json(
            r#"{"forms": ["f1.pdf"], "files": ["a.pdf", "b.pdf"], "docs": []}"#,
        )
        .unwrap();
        let order: Vec<(Role, String)> = manifest
            .ordered()
            .into_iter()
            .map(|(role, e)| (role, e.display_name()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Role::Files, "a.pdf".to_string()),
                (Role::Files, "b.pdf".to_string()),
                (Role::Forms, "f1.pdf".to_string()),
            ]
        );
    }

    #[test]
    fn test_blank_name_falls_back_to_source() {
        let entry = ManifestEntry::Named {
            name: "  ".into(),
            url: "https://x.test/docs/support-letter.docx".into(),
        };
        assert_eq!(entry.display_name(), "support-letter.docx");
    }
}
