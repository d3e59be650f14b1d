//! 基础设施层（Infrastructure Layer）
//!
//! 持有外部协作方（blob 存储、LLM、关系存储）的客户端，只暴露能力，不包含业务流程。
//! 所有客户端都以显式对象的形式注入到各阶段函数中。

pub mod blob_store;
pub mod llm_client;
pub mod memory_repository;
pub mod repository;

pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use llm_client::{Attachment, LlmClient, LlmReply, MediaType, OpenAiLlmClient, ScriptedLlmClient};
pub use memory_repository::MemoryRepository;
pub use repository::{ChecklistRepository, ReviewRepository};

use std::sync::Arc;

use crate::config::Config;

/// 各阶段共享的协作方集合
#[derive(Clone)]
pub struct Collaborators {
    pub config: Config,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<dyn LlmClient>,
    pub checklists: Arc<dyn ChecklistRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
}
