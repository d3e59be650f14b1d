//! 清单抽取流程
//!
//! 定义"一份文档"的完整处理流程：
//!
//! ```text
//! 文档 → PROCESSING
//!   → 拆分页面
//!   → 逐页抽取（有界并发）
//!   → 跨页合并
//!   → 写入清单集合
//! 文档 → COMPLETED（任一步失败则 FAILED，并记录原因）
//! ```
//!
//! 各步骤也单独导出，供外部编排器逐步调用。

use serde::Serialize;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::infrastructure::{ChecklistRepository, Collaborators};
use crate::models::{DocumentStatus, PageDrafts};
use crate::orchestrator::batch_processor::run_bounded;
use crate::services::tree_reconciler::{self, DanglingReference};
use crate::services::{checklist_writer, page_extractor, page_splitter, PageRef};

/// 抽取流程的输入
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub document_id: String,
    pub set_id: String,
    /// 源文档在 blob 存储中的键
    pub source_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub document_id: String,
    pub set_id: String,
    pub page_count: u32,
    pub item_count: usize,
    pub dangling: Vec<DanglingReference>,
}

/// 在进程内跑完整个抽取流程，并维护文档状态
pub async fn extract_document(
    collaborators: &Collaborators,
    request: &ExtractionRequest,
) -> Result<ExtractionSummary, PipelineError> {
    let checklists = collaborators.checklists.as_ref();
    checklists
        .update_document_status(&request.document_id, DocumentStatus::Processing, None)
        .await?;

    match run_extraction(collaborators, request).await {
        Ok(summary) => {
            complete_document(checklists, &request.document_id).await?;
            info!(
                "[文档 {}] ✅ 抽取完成: {} 页，{} 个项目",
                request.document_id, summary.page_count, summary.item_count
            );
            Ok(summary)
        }
        Err(e) => {
            handle_checklist_error(checklists, &request.document_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn run_extraction(
    collaborators: &Collaborators,
    request: &ExtractionRequest,
) -> Result<ExtractionSummary, PipelineError> {
    let pages = page_splitter::split_document(
        collaborators.blobs.as_ref(),
        &request.document_id,
        &request.source_key,
    )
    .await?;
    let page_count = pages.len() as u32;

    extract_pages(collaborators, &request.document_id, pages).await?;

    let reconciliation = tree_reconciler::reconcile_document(
        collaborators.blobs.as_ref(),
        &request.set_id,
        &request.document_id,
        page_count,
    )
    .await?;

    let item_count = checklist_writer::store_checklist(
        collaborators.checklists.as_ref(),
        &request.set_id,
        &reconciliation.items,
    )
    .await?;

    Ok(ExtractionSummary {
        document_id: request.document_id.clone(),
        set_id: request.set_id.clone(),
        page_count,
        item_count,
        dangling: reconciliation.dangling,
    })
}

/// 并发抽取所有页面；任一页失败则整份文档失败
pub async fn extract_pages(
    collaborators: &Collaborators,
    document_id: &str,
    pages: Vec<PageRef>,
) -> Result<Vec<PageDrafts>, PipelineError> {
    let label = format!("文档 {} 页面抽取", document_id);
    let report = run_bounded(&label, pages, collaborators.config.max_concurrent_pages, |page| {
        let blobs = collaborators.blobs.clone();
        let llm = collaborators.llm.clone();
        let language = collaborators.config.output_language.clone();
        let document_id = document_id.to_string();
        async move { page_extractor::extract_page(blobs.as_ref(), llm.as_ref(), &language, &document_id, &page).await }
    })
    .await;
    report.into_all()
}

/// 写入成功后由调用方把文档标记为完成
pub async fn complete_document(checklists: &dyn ChecklistRepository, document_id: &str) -> Result<(), PipelineError> {
    checklists
        .update_document_status(document_id, DocumentStatus::Completed, None)
        .await?;
    Ok(())
}

/// 错误处理阶段：文档标记为 FAILED，已写入的数据保留以便人工检查
pub async fn handle_checklist_error(
    checklists: &dyn ChecklistRepository,
    document_id: &str,
    detail: &str,
) -> Result<(), PipelineError> {
    error!("[文档 {}] ❌ 抽取失败: {}", document_id, detail);
    checklists
        .update_document_status(document_id, DocumentStatus::Failed, Some(detail))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::infrastructure::{BlobStore, MemoryBlobStore, MemoryRepository, ScriptedLlmClient};
    use std::sync::Arc;

    fn collaborators(llm: ScriptedLlmClient) -> (Collaborators, Arc<MemoryRepository>, Arc<MemoryBlobStore>) {
        let repo = Arc::new(MemoryRepository::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let config = Config {
            max_concurrent_pages: 1,
            ..Config::default()
        };
        let collaborators = Collaborators {
            config,
            blobs: blobs.clone(),
            llm: Arc::new(llm),
            checklists: repo.clone(),
            reviews: repo.clone(),
        };
        (collaborators, repo, blobs)
    }

    #[tokio::test]
    async fn test_image_document_end_to_end() {
        let llm = ScriptedLlmClient::new([r#"[{"id": 0, "name": "root"}, {"id": 1, "name": "child", "parent_id": 0}]"#]);
        let (collaborators, repo, blobs) = collaborators(llm);
        blobs.put("checklist/original/d1/scan.png", vec![0x89, b'P', b'N', b'G'], "image/png").await.unwrap();

        let request = ExtractionRequest {
            document_id: "d1".to_string(),
            set_id: "s1".to_string(),
            source_key: "checklist/original/d1/scan.png".to_string(),
        };
        let summary = extract_document(&collaborators, &request).await.unwrap();

        assert_eq!(summary.page_count, 1);
        assert_eq!(summary.item_count, 2);
        assert_eq!(repo.count_items("s1").await.unwrap(), 2);
        assert_eq!(repo.document_status("d1").await.unwrap(), Some(DocumentStatus::Completed));
    }

    #[tokio::test]
    async fn test_parse_failure_marks_document_failed() {
        let llm = ScriptedLlmClient::new(["oops", "oops again"]);
        let (collaborators, repo, blobs) = collaborators(llm);
        blobs.put("scan.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg").await.unwrap();

        let request = ExtractionRequest {
            document_id: "d2".to_string(),
            set_id: "s2".to_string(),
            source_key: "scan.jpg".to_string(),
        };
        let err = extract_document(&collaborators, &request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExtractionParseFailed);
        assert_eq!(repo.document_status("d2").await.unwrap(), Some(DocumentStatus::Failed));
        assert!(repo.document_error("d2").await.is_some());
        assert_eq!(repo.count_items("s2").await.unwrap(), 0);
    }
}
