//! 阶段请求分发 - 编排层
//!
//! 外部编排器以 JSON 请求调用单个阶段，这里把请求分发到对应的流程函数，
//! 成功返回 JSON 结果，失败返回带错误类别的 `StageFailure`。
//! 重试、退避和按文档大小分支都由外部编排器负责。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{ErrorKind, PipelineError};
use crate::infrastructure::Collaborators;
use crate::models::{ItemId, Verdict};
use crate::services::{
    checklist_writer, page_extractor, page_splitter, tree_reconciler, CascadeAggregator, PageRef, ReviewExecutor,
};
use crate::workflow::{extraction_flow, review_flow, ExtractionRequest, NewReviewJob};

/// 阶段请求
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StageRequest {
    SplitDocument {
        document_id: String,
        source_key: String,
    },
    ExtractPage {
        document_id: String,
        page_number: u32,
        blob_key: String,
    },
    ReconcileDocument {
        document_id: String,
        set_id: String,
        page_count: u32,
    },
    StoreChecklist {
        document_id: String,
        set_id: String,
    },
    HandleChecklistError {
        document_id: String,
        error: String,
    },
    /// 进程内跑完整个抽取流程（小文档）
    ExtractDocument {
        document_id: String,
        set_id: String,
        source_key: String,
    },
    DeleteChecklistItem {
        item_id: ItemId,
    },
    CreateReviewJob(NewReviewJob),
    PrepareReview {
        review_job_id: String,
    },
    ReviewItem {
        review_job_id: String,
        check_id: ItemId,
    },
    FinalizeReview {
        review_job_id: String,
    },
    HandleReviewError {
        review_job_id: String,
        error: String,
    },
    /// 进程内跑完整个审查任务
    RunReview {
        review_job_id: String,
    },
    OverrideResult {
        review_job_id: String,
        check_id: ItemId,
        result: Verdict,
        comment: Option<String>,
    },
    JobStats {
        review_job_id: String,
    },
}

impl StageRequest {
    pub fn action(&self) -> &'static str {
        match self {
            StageRequest::SplitDocument { .. } => "splitDocument",
            StageRequest::ExtractPage { .. } => "extractPage",
            StageRequest::ReconcileDocument { .. } => "reconcileDocument",
            StageRequest::StoreChecklist { .. } => "storeChecklist",
            StageRequest::HandleChecklistError { .. } => "handleChecklistError",
            StageRequest::ExtractDocument { .. } => "extractDocument",
            StageRequest::DeleteChecklistItem { .. } => "deleteChecklistItem",
            StageRequest::CreateReviewJob(_) => "createReviewJob",
            StageRequest::PrepareReview { .. } => "prepareReview",
            StageRequest::ReviewItem { .. } => "reviewItem",
            StageRequest::FinalizeReview { .. } => "finalizeReview",
            StageRequest::HandleReviewError { .. } => "handleReviewError",
            StageRequest::RunReview { .. } => "runReview",
            StageRequest::OverrideResult { .. } => "overrideResult",
            StageRequest::JobStats { .. } => "jobStats",
        }
    }
}

/// 对外报告的失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for StageFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// 阶段响应
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageResponse {
    Succeeded { result: JsonValue },
    Failed { error: StageFailure },
}

pub struct StageHandler {
    collaborators: Collaborators,
    cascade: Arc<CascadeAggregator>,
    executor: ReviewExecutor,
}

impl StageHandler {
    pub fn new(collaborators: Collaborators) -> Self {
        let cascade = Arc::new(CascadeAggregator::new(collaborators.reviews.clone()));
        let executor = ReviewExecutor::new(&collaborators, cascade.clone());
        Self {
            collaborators,
            cascade,
            executor,
        }
    }

    /// 处理一条原始 JSON 请求
    pub async fn handle_json(&self, raw: JsonValue) -> StageResponse {
        match serde_json::from_value::<StageRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let err = PipelineError::InvalidRequest(e.to_string());
                error!("❌ 无法解析阶段请求: {}", e);
                StageResponse::Failed {
                    error: StageFailure::from(&err),
                }
            }
        }
    }

    pub async fn handle(&self, request: StageRequest) -> StageResponse {
        let action = request.action();
        info!("▶ 执行阶段 {}", action);
        match self.dispatch(request).await {
            Ok(result) => StageResponse::Succeeded { result },
            Err(e) => {
                error!("❌ 阶段 {} 失败 ({:?}): {}", action, e.kind(), e);
                StageResponse::Failed {
                    error: StageFailure::from(&e),
                }
            }
        }
    }

    pub async fn dispatch(&self, request: StageRequest) -> Result<JsonValue, PipelineError> {
        let c = &self.collaborators;
        match request {
            StageRequest::SplitDocument {
                document_id,
                source_key,
            } => to_json(&page_splitter::split_document(c.blobs.as_ref(), &document_id, &source_key).await?),
            StageRequest::ExtractPage {
                document_id,
                page_number,
                blob_key,
            } => {
                let page = PageRef { page_number, blob_key };
                let drafts = page_extractor::extract_page(
                    c.blobs.as_ref(),
                    c.llm.as_ref(),
                    &c.config.output_language,
                    &document_id,
                    &page,
                )
                .await?;
                to_json(&drafts)
            }
            StageRequest::ReconcileDocument {
                document_id,
                set_id,
                page_count,
            } => {
                let reconciliation =
                    tree_reconciler::reconcile_document(c.blobs.as_ref(), &set_id, &document_id, page_count).await?;
                Ok(serde_json::json!({
                    "itemCount": reconciliation.items.len(),
                    "dangling": to_json(&reconciliation.dangling)?,
                }))
            }
            StageRequest::StoreChecklist { document_id, set_id } => {
                let reconciliation = tree_reconciler::load_reconciliation(c.blobs.as_ref(), &document_id).await?;
                let stored =
                    checklist_writer::store_checklist(c.checklists.as_ref(), &set_id, &reconciliation.items).await?;
                extraction_flow::complete_document(c.checklists.as_ref(), &document_id).await?;
                Ok(serde_json::json!({ "itemCount": stored }))
            }
            StageRequest::HandleChecklistError { document_id, error } => {
                extraction_flow::handle_checklist_error(c.checklists.as_ref(), &document_id, &error).await?;
                Ok(JsonValue::Null)
            }
            StageRequest::ExtractDocument {
                document_id,
                set_id,
                source_key,
            } => {
                let request = ExtractionRequest {
                    document_id,
                    set_id,
                    source_key,
                };
                to_json(&extraction_flow::extract_document(c, &request).await?)
            }
            StageRequest::DeleteChecklistItem { item_id } => {
                let deleted = checklist_writer::delete_subtree(c.checklists.as_ref(), &item_id).await?;
                Ok(serde_json::json!({ "deleted": deleted }))
            }
            StageRequest::CreateReviewJob(request) => to_json(&review_flow::create_review_job(c, request).await?),
            StageRequest::PrepareReview { review_job_id } => {
                to_json(&review_flow::prepare_review(c, &review_job_id).await?)
            }
            StageRequest::ReviewItem {
                review_job_id,
                check_id,
            } => to_json(&self.executor.execute(&review_job_id, check_id).await?),
            StageRequest::FinalizeReview { review_job_id } => {
                to_json(&review_flow::finalize_review(c, &self.cascade, &review_job_id).await?)
            }
            StageRequest::HandleReviewError { review_job_id, error } => {
                review_flow::handle_review_error(c.reviews.as_ref(), &review_job_id, &error).await?;
                Ok(JsonValue::Null)
            }
            StageRequest::RunReview { review_job_id } => {
                to_json(&review_flow::run_review(c, self.cascade.clone(), &review_job_id).await?)
            }
            StageRequest::OverrideResult {
                review_job_id,
                check_id,
                result,
                comment,
            } => to_json(
                &self
                    .cascade
                    .override_result(&review_job_id, check_id, result, comment)
                    .await?,
            ),
            StageRequest::JobStats { review_job_id } => {
                to_json(&review_flow::job_stats(c.reviews.as_ref(), &review_job_id).await?)
            }
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, PipelineError> {
    serde_json::to_value(value).map_err(|e| PipelineError::Task {
        task: "serialize".to_string(),
        reason: e.to_string(),
    })
}
