use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, Role};
use crate::utils::AssemblyError;

/// 工作会话的状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Materializing,
    Normalizing,
    Merging,
    BuildingComposite,
    Publishing,
    Done,
    Failed,
}

impl SessionState {
    pub fn next(self) -> Option<SessionState> {
        match self {
            SessionState::Created => Some(SessionState::Materializing),
            SessionState::Materializing => Some(SessionState::Normalizing),
            SessionState::Normalizing => Some(SessionState::Merging),
            SessionState::Merging => Some(SessionState::BuildingComposite),
            SessionState::BuildingComposite => Some(SessionState::Publishing),
            SessionState::Publishing => Some(SessionState::Done),
            SessionState::Done | SessionState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    /// Forward by one step, or to `Failed` from any non-terminal state.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        if to == SessionState::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }
}

/// 阶段观察者，每次状态切换时调用；返回错误会中止会话
pub trait StageObserver: Send + Sync {
    fn entered(&self, stage: SessionState, workdir: &Path) -> Result<(), String>;
}

/// 默认观察者：只写日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StageObserver for LogObserver {
    fn entered(&self, stage: SessionState, workdir: &Path) -> Result<(), String> {
        debug!("会话进入阶段 {:?} ({})", stage, workdir.display());
        Ok(())
    }
}

/// 会话内的一个已获取输入
#[derive(Debug, Clone)]
pub struct SessionInput {
    /// position in the manifest
    pub index: usize,
    pub role: Role,
    pub artifact: Artifact,
}

/// 一次组装请求独占的临时目录和其中的输入
///
/// The directory is removed when the session is dropped, on every exit path.
pub struct WorkSession {
    id: String,
    state: SessionState,
    dir: Option<TempDir>,
    path: PathBuf,
    inputs: Vec<SessionInput>,
}

impl WorkSession {
    /// 在 `root` 下（默认系统临时目录）创建会话目录
    pub fn create(root: Option<&Path>) -> Result<Self, AssemblyError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("finalcopy-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();

        let suffix = path
            .file_name()
            .map(|n| n.to_string_lossy().trim_start_matches("finalcopy-").to_string())
            .unwrap_or_default();
        let id = format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), suffix);

        std::fs::create_dir_all(path.join("inputs"))?;
        info!("创建工作会话 {} ({})", id, path.display());
        Ok(Self {
            id,
            state: SessionState::Created,
            dir: Some(dir),
            path,
            inputs: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.path.join("inputs")
    }

    pub fn merged_pdf_path(&self) -> PathBuf {
        self.path.join("merged.pdf")
    }

    pub fn merged_docx_path(&self) -> PathBuf {
        self.path.join("merged.docx")
    }

    pub fn push_input(&mut self, index: usize, role: Role, artifact: Artifact) {
        self.inputs.push(SessionInput {
            index,
            role,
            artifact,
        });
    }

    pub fn inputs(&self, role: Role) -> impl Iterator<Item = &SessionInput> {
        self.inputs.iter().filter(move |input| input.role == role)
    }

    pub fn inputs_mut(&mut self, role: Role) -> impl Iterator<Item = &mut SessionInput> {
        self.inputs.iter_mut().filter(move |input| input.role == role)
    }

    pub fn input_at(&self, index: usize) -> Option<&SessionInput> {
        self.inputs.iter().find(|input| input.index == index)
    }

    /// 切换到下一个阶段并通知观察者
    pub fn advance(
        &mut self,
        to: SessionState,
        observer: &dyn StageObserver,
    ) -> Result<(), AssemblyError> {
        if !self.state.can_transition_to(to) {
            return Err(AssemblyError::Session(format!(
                "illegal transition {:?} -> {:?}",
                self.state, to
            )));
        }
        self.state = to;
        observer.entered(to, &self.path).map_err(|reason| {
            self.state = SessionState::Failed;
            AssemblyError::Aborted { stage: to, reason }
        })
    }

    pub fn fail(&mut self) {
        if self.state.can_transition_to(SessionState::Failed) {
            warn!("会话 {} 在 {:?} 阶段失败", self.id, self.state);
            self.state = SessionState::Failed;
        }
    }

    /// 删除会话目录；失败只记日志
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("已清理会话目录 {}", self.path.display()),
                Err(e) => warn!("会话目录清理失败 {}: {}", self.path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<SessionState>>);

    impl StageObserver for Recording {
        fn entered(&self, stage: SessionState, _workdir: &Path) -> Result<(), String> {
            self.0.lock().unwrap().push(stage);
            if stage == SessionState::Merging {
                return Err("stop here".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_transitions() {
        assert!(SessionState::Created.can_transition_to(SessionState::Materializing));
        assert!(!SessionState::Created.can_transition_to(SessionState::Merging));
        assert!(SessionState::Publishing.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Done.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Failed.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut session = WorkSession::create(Some(root.path())).unwrap();
        let result = session.advance(SessionState::Publishing, &LogObserver);
        assert!(matches!(result, Err(AssemblyError::Session(_))));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_observer_error_fails_session() {
        let root = tempfile::tempdir().unwrap();
        let observer = Recording(Mutex::new(Vec::new()));
        let mut session = WorkSession::create(Some(root.path())).unwrap();

        session.advance(SessionState::Materializing, &observer).unwrap();
        session.advance(SessionState::Normalizing, &observer).unwrap();
        let err = session.advance(SessionState::Merging, &observer).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::Aborted { stage: SessionState::Merging, .. }
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(observer.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_directory_removed_on_close_and_drop() {
        let root = tempfile::tempdir().unwrap();

        let session = WorkSession::create(Some(root.path())).unwrap();
        let closed = session.path().to_path_buf();
        assert!(closed.join("inputs").is_dir());
        session.close();
        assert!(!closed.exists());

        let dropped = {
            let session = WorkSession::create(Some(root.path())).unwrap();
            session.path().to_path_buf()
        };
        assert!(!dropped.exists());
    }

    #[test]
    fn test_session_id_has_timestamp_prefix() {
        let session = WorkSession::create(None).unwrap();
        let (stamp, suffix) = session.id().split_once('_').unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(!suffix.is_empty());
    }
}
