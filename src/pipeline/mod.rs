//! 组装流程：获取 → 规范化 → 合并 → 合成 → 发布，会话目录在所有退出路径上清理

pub mod session;

pub use session::{LogObserver, SessionInput, SessionState, StageObserver, WorkSession};

use std::sync::Arc;
use tracing::{error, info};

use crate::artifact::{Artifact, Role};
use crate::compose::{CompositeBuilder, CompositeEntry, CompositeStrategy};
use crate::config::manifest::{Manifest, ManifestEntry};
use crate::config::AppConfig;
use crate::fetch::{materialize_all, FetchError, FetchRequest, Fetcher, HttpFetcher};
use crate::normalize::FormatNormalizer;
use crate::pdf::{make_separator_page, MergeEngine};
use crate::report::{AssemblyReport, ItemOutcome, ItemStatus};
use crate::storage::Publisher;
use crate::utils::AssemblyError;

/// 一次组装所需的全部协作者，由配置显式构造
pub struct Assembler {
    config: AppConfig,
    publisher: Publisher,
    fetcher: Arc<dyn Fetcher>,
    normalizer: FormatNormalizer,
    observer: Arc<dyn StageObserver>,
}

impl Assembler {
    pub fn new(config: AppConfig, publisher: Publisher, fetcher: Arc<dyn Fetcher>) -> Self {
        let normalizer = FormatNormalizer::new(config.conversion.clone());
        Self {
            config,
            publisher,
            fetcher,
            normalizer,
            observer: Arc::new(LogObserver),
        }
    }

    /// 使用 HTTP 下载器和配置中的发布目录
    pub fn from_config(config: AppConfig) -> Result<Self, FetchError> {
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        let publisher = Publisher::from_config(&config.storage);
        Ok(Self::new(config, publisher, fetcher))
    }

    pub fn with_normalizer(mut self, normalizer: FormatNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_strategy(mut self, strategy: CompositeStrategy) -> Self {
        self.config.assembly.composite_strategy = strategy;
        self
    }

    pub fn strategy(&self) -> CompositeStrategy {
        self.config.assembly.composite_strategy
    }

    /// 处理一个清单，返回两个成品的发布结果和逐项报告
    pub async fn assemble(&self, manifest: &Manifest) -> Result<AssemblyReport, AssemblyError> {
        let mut session = WorkSession::create(self.config.assembly.work_root().as_deref())?;
        info!(
            "开始组装 {}: {} 个文件, {} 个表格, {} 个文档",
            session.id(),
            manifest.files.len(),
            manifest.forms.len(),
            manifest.docs.len()
        );

        let result = self.run(&mut session, manifest).await;
        match &result {
            Ok(report) => info!("组装完成 {}: {}", session.id(), report.summary),
            Err(e) => {
                session.fail();
                error!("组装失败 {}: {}", session.id(), e);
            }
        }
        session.close();
        result
    }

    async fn run(
        &self,
        session: &mut WorkSession,
        manifest: &Manifest,
    ) -> Result<AssemblyReport, AssemblyError> {
        let observer = self.observer.as_ref();
        let strategy = self.strategy();
        let ordered = manifest.ordered();
        // (manifest index, outcome); sorted back into request order at the end
        let mut items: Vec<(usize, ItemOutcome)> = Vec::with_capacity(ordered.len());

        session.advance(SessionState::Materializing, observer)?;
        let requests: Vec<FetchRequest> = ordered
            .iter()
            .enumerate()
            .filter(|(_, (role, _))| *role != Role::Docs || strategy.needs_content())
            .map(|(index, (role, entry))| {
                FetchRequest::new(index, *role, entry.source(), explicit_name(entry))
            })
            .collect();
        let materialized = materialize_all(
            requests,
            &session.inputs_dir(),
            self.fetcher.clone(),
            self.config.fetch.max_concurrent,
        )
        .await;

        for m in materialized {
            let FetchRequest { index, role, .. } = m.request;
            match m.result {
                Ok(artifact) => session.push_input(index, role, artifact),
                // docs without content are reported by the composite builder
                Err(_) if role == Role::Docs => {}
                Err(e) => {
                    let outcome = ItemOutcome::new(
                        m.request.display_name(),
                        &m.request.source,
                        ItemStatus::Skipped {
                            reason: e.to_string(),
                        },
                    );
                    items.push((index, outcome.with_role(role)));
                }
            }
        }

        let requested = manifest.files.len() + manifest.forms.len();
        if session.inputs(Role::Files).count() + session.inputs(Role::Forms).count() == 0 {
            return Err(AssemblyError::NoInputs { requested });
        }

        session.advance(SessionState::Normalizing, observer)?;
        for role in [Role::Files, Role::Forms] {
            if !self.config.assembly.convert_roles.contains(&role) {
                continue;
            }
            for input in session.inputs_mut(role) {
                input.artifact = self.normalizer.normalize(&input.artifact).await;
            }
        }

        session.advance(SessionState::Merging, observer)?;
        let separator = make_separator_page(
            &self.config.assembly.separator_label,
            &session.path().join("separator.pdf"),
        )?;
        let mut positions: Vec<(usize, Role)> = Vec::new();
        let mut to_merge: Vec<Artifact> = Vec::new();
        for input in session.inputs(Role::Files) {
            positions.push((input.index, input.role));
            to_merge.push(input.artifact.clone());
        }
        let separator_slot = to_merge.len();
        to_merge.push(separator);
        for input in session.inputs(Role::Forms) {
            positions.push((input.index, input.role));
            to_merge.push(input.artifact.clone());
        }

        let placeholder_dir = session.path().join("placeholders");
        tokio::fs::create_dir_all(&placeholder_dir).await?;
        let merged_path = session.merged_pdf_path();
        let merged = tokio::task::spawn_blocking(move || {
            MergeEngine::new()
                .with_placeholder_dir(placeholder_dir)
                .merge(&to_merge, &merged_path)
        })
        .await
        .map_err(|e| AssemblyError::Session(format!("merge task failed: {}", e)))??;

        let mut merge_items = merged.items;
        if separator_slot < merge_items.len() {
            merge_items.remove(separator_slot);
        }
        for ((index, role), item) in positions.into_iter().zip(merge_items) {
            items.push((index, item.with_role(role)));
        }

        session.advance(SessionState::BuildingComposite, observer)?;
        let mut doc_indices = Vec::with_capacity(manifest.docs.len());
        let mut entries = Vec::with_capacity(manifest.docs.len());
        for (index, (role, entry)) in ordered.iter().enumerate() {
            if *role != Role::Docs {
                continue;
            }
            doc_indices.push(index);
            entries.push(match session.input_at(index) {
                Some(input) => CompositeEntry::from_artifact(&input.artifact),
                None if strategy.needs_content() => {
                    CompositeEntry::new(entry.display_name(), entry.source(), None)
                }
                None => CompositeEntry::reference(entry.display_name(), entry.source()),
            });
        }

        let builder = CompositeBuilder::new().with_template(self.config.assembly.template());
        let composite_path = session.merged_docx_path();
        let composite = tokio::task::spawn_blocking(move || {
            builder.build(&entries, &composite_path, strategy)
        })
        .await
        .map_err(|e| AssemblyError::Session(format!("composite task failed: {}", e)))??;
        for (index, item) in doc_indices.into_iter().zip(composite.items) {
            items.push((index, item.with_role(Role::Docs)));
        }

        session.advance(SessionState::Publishing, observer)?;
        let merged_pdf = self.publisher.publish_pdf(&merged.output, session.id()).await?;
        let merged_docx = self
            .publisher
            .publish_docx(&composite.output, session.id())
            .await?;

        session.advance(SessionState::Done, observer)?;
        items.sort_by_key(|(index, _)| *index);
        Ok(AssemblyReport::new(
            session.id(),
            strategy,
            merged_pdf,
            merged_docx,
            merged.page_count,
            items.into_iter().map(|(_, item)| item).collect(),
        ))
    }
}

fn explicit_name(entry: &ManifestEntry) -> Option<String> {
    match entry {
        ManifestEntry::Named { .. } => Some(entry.display_name()),
        ManifestEntry::Bare(_) => None,
    }
}
