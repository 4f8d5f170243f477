use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::{Artifact, Role};
use crate::compose::CompositeStrategy;
use crate::storage::Published;

/// 单个输入的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Included,
    Substituted { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub display_name: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn new(display_name: impl Into<String>, source: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            display_name: display_name.into(),
            source: source.into(),
            role: None,
            status,
        }
    }

    pub fn included(artifact: &Artifact) -> Self {
        Self::new(&artifact.display_name, &artifact.source, ItemStatus::Included)
    }

    pub fn substituted(artifact: &Artifact, reason: impl Into<String>) -> Self {
        Self::new(
            &artifact.display_name,
            &artifact.source,
            ItemStatus::Substituted {
                reason: reason.into(),
            },
        )
    }

    pub fn skipped(artifact: &Artifact, reason: impl Into<String>) -> Self {
        Self::new(
            &artifact.display_name,
            &artifact.source,
            ItemStatus::Skipped {
                reason: reason.into(),
            },
        )
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Substituted items still occupy their slot in the output.
    pub fn is_included(&self) -> bool {
        !matches!(self.status, ItemStatus::Skipped { .. })
    }
}

/// 一次组装的结果报告，CLI 以 JSON 输出
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub strategy: CompositeStrategy,
    pub final_pdf_url: String,
    pub final_docx_url: String,
    pub merged_pdf: Published,
    pub merged_docx: Published,
    pub page_count: usize,
    pub requested: usize,
    pub included: usize,
    pub summary: String,
    pub items: Vec<ItemOutcome>,
}

impl AssemblyReport {
    pub fn new(
        session_id: impl Into<String>,
        strategy: CompositeStrategy,
        merged_pdf: Published,
        merged_docx: Published,
        page_count: usize,
        items: Vec<ItemOutcome>,
    ) -> Self {
        let requested = items.len();
        let included = items.iter().filter(|i| i.is_included()).count();
        Self {
            session_id: session_id.into(),
            generated_at: Utc::now(),
            strategy,
            final_pdf_url: merged_pdf.url.clone(),
            final_docx_url: merged_docx.url.clone(),
            merged_pdf,
            merged_docx,
            page_count,
            requested,
            included,
            summary: format!("{} of {} inputs included", included, requested),
            items,
        }
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.is_included())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn published(name: &str) -> Published {
        Published {
            path: PathBuf::from(format!("/srv/media/generated/{}", name)),
            url: format!("http://localhost:8000/media/generated/{}", name),
        }
    }

    #[test]
    fn test_summary_counts_substitutions_as_included() {
        let ok = Artifact::new("passport.pdf", "https://x/passport.pdf", "/tmp/a.pdf");
        let bad = Artifact::new("scan.pdf", "https://x/scan.pdf", "/tmp/b.pdf");
        let gone = Artifact::new("lease.pdf", "https://x/lease.pdf", "/tmp/c.pdf");
        let items = vec![
            ItemOutcome::included(&ok).with_role(Role::Files),
            ItemOutcome::substituted(&bad, "missing %PDF header"),
            ItemOutcome::skipped(&gone, "download failed"),
        ];

        let report = AssemblyReport::new(
            "s1",
            CompositeStrategy::ReferenceOnly,
            published("final_copy.pdf"),
            published("final_copy.docx"),
            4,
            items,
        );
        assert_eq!(report.summary, "2 of 3 inputs included");
        assert_eq!(report.skipped().count(), 1);
        assert!(report.final_pdf_url.ends_with("/generated/final_copy.pdf"));
    }

    #[test]
    fn test_status_serializes_flat() {
        let artifact = Artifact::new("lease.pdf", "lease.pdf", "/tmp/lease.pdf");
        let json = serde_json::to_value(ItemOutcome::skipped(&artifact, "duplicate")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "duplicate");
        assert_eq!(json["display_name"], "lease.pdf");
    }
}
