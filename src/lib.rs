//! finalcopy：把一次申请的输入材料组装成一份合并 PDF 和一份合成 DOCX

pub mod artifact;
pub mod compose;
pub mod config;
pub mod draft;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod pdf;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod utils;

pub use artifact::{Artifact, MediaKind, Role};
pub use pipeline::Assembler;
pub use report::{AssemblyReport, ItemOutcome, ItemStatus};
pub use utils::AssemblyError;
