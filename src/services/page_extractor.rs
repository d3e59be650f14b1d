//! 单页清单抽取服务
//!
//! ## 流程
//!
//! 1. 从 blob 存储读取单页文档
//! 2. 调用 LLM 抽取清单（解析失败时带着错误重试一次）
//! 3. 把草稿写到 `(documentId, pageNumber)` 对应的键，重跑时覆盖

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::infrastructure::{Attachment, BlobStore, LlmClient, MediaType};
use crate::models::storage_keys::{checklist_drafts_key, content_type_for_key};
use crate::models::PageDrafts;
use crate::services::artifacts;
use crate::services::page_splitter::PageRef;
use crate::services::prompts;
use crate::services::reply_parser::parse_checklist_drafts;
use crate::services::structured_call::{call_with_one_retry, StructuredCallError};
use crate::workflow::PageCtx;

/// 抽取一页并持久化草稿
pub async fn extract_page(
    blobs: &dyn BlobStore,
    llm: &dyn LlmClient,
    output_language: &str,
    document_id: &str,
    page: &PageRef,
) -> Result<PageDrafts, PipelineError> {
    let ctx = PageCtx::new(document_id, page.page_number);
    let attachment = load_page_attachment(blobs, document_id, page).await?;

    let prompt = format!(
        "{}\n\nThis is page {} of the source document. Extract the checklist from it.",
        prompts::checklist_extraction_prompt(output_language),
        page.page_number
    );

    let drafts = call_with_one_retry(llm, &ctx, &prompt, &[attachment], "array", parse_checklist_drafts)
        .await
        .map_err(|e| match e {
            StructuredCallError::Llm(inner) => PipelineError::Llm(inner),
            StructuredCallError::Unparseable(reason) => {
                warn!("{} ❌ 抽取结果重试后仍无法解析", ctx);
                PipelineError::ExtractionParseFailed {
                    document_id: document_id.to_string(),
                    page_number: page.page_number,
                    reason: reason.to_string(),
                }
            }
        })?;

    let page_drafts = PageDrafts {
        page_number: page.page_number,
        drafts,
    };
    artifacts::store_json(blobs, &checklist_drafts_key(document_id, page.page_number), &page_drafts).await?;

    info!("{} ✓ 抽取到 {} 个清单项目", ctx, page_drafts.drafts.len());
    Ok(page_drafts)
}

/// 读取某页已持久化的草稿
pub async fn load_page_drafts(
    blobs: &dyn BlobStore,
    document_id: &str,
    page_number: u32,
) -> Result<PageDrafts, PipelineError> {
    artifacts::load_json(blobs, &checklist_drafts_key(document_id, page_number)).await
}

async fn load_page_attachment(
    blobs: &dyn BlobStore,
    document_id: &str,
    page: &PageRef,
) -> Result<Attachment, PipelineError> {
    let media_type =
        MediaType::from_content_type(content_type_for_key(&page.blob_key)).ok_or_else(|| {
            PipelineError::UnreadableDocument {
                document_id: document_id.to_string(),
                reason: format!("不支持的页面格式: {}", page.blob_key),
            }
        })?;
    let bytes = blobs.get(&page.blob_key).await?;

    Ok(Attachment {
        name: format!("page_{}.{}", page.page_number, media_type.extension()),
        media_type,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::{MemoryBlobStore, ScriptedLlmClient};

    async fn blobs_with_page() -> (MemoryBlobStore, PageRef) {
        let blobs = MemoryBlobStore::new();
        let page = PageRef {
            page_number: 2,
            blob_key: "checklist/pages/d1/page_2.png".to_string(),
        };
        blobs.put(&page.blob_key, vec![0x89, b'P', b'N', b'G'], "image/png").await.unwrap();
        (blobs, page)
    }

    #[tokio::test]
    async fn test_extract_page_persists_drafts() {
        let (blobs, page) = blobs_with_page().await;
        let llm = ScriptedLlmClient::new([r#"[{"id": 0, "name": "Root"}, {"id": 1, "name": "Child", "parent_id": 0}]"#]);

        let drafts = extract_page(&blobs, &llm, "English", "d1", &page).await.unwrap();
        assert_eq!(drafts.page_number, 2);
        assert_eq!(drafts.drafts.len(), 2);

        let stored = load_page_drafts(&blobs, "d1", 2).await.unwrap();
        assert_eq!(stored, drafts);
        assert!(llm.prompts()[0].contains("page 2"));
    }

    #[tokio::test]
    async fn test_extract_page_fails_after_one_retry() {
        let (blobs, page) = blobs_with_page().await;
        let llm = ScriptedLlmClient::new([r#"{"name": "A"}"#, r#"{"name": "A"}"#]);

        let err = extract_page(&blobs, &llm, "English", "d1", &page).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionParseFailed);
        assert_eq!(llm.call_count(), 2);
        assert!(load_page_drafts(&blobs, "d1", 2).await.is_err());
    }

    #[tokio::test]
    async fn test_rerun_overwrites_drafts() {
        let (blobs, page) = blobs_with_page().await;
        let llm = ScriptedLlmClient::new([r#"[{"name": "First"}]"#, r#"[{"name": "Second"}]"#]);

        extract_page(&blobs, &llm, "English", "d1", &page).await.unwrap();
        extract_page(&blobs, &llm, "English", "d1", &page).await.unwrap();

        let stored = load_page_drafts(&blobs, "d1", 2).await.unwrap();
        assert_eq!(stored.drafts[0].name, "Second");
        assert_eq!(
            blobs.keys().await.iter().filter(|k| k.starts_with("checklist/drafts/")).count(),
            1
        );
    }
}
