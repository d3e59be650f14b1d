//! 单项目审查服务
//!
//! ## 流程
//!
//! 1. 结果置为 PROCESSING
//! 2. 读取任务的全部待审文档作为附件
//! 3. 按项目名称和说明构建提示词，调用 LLM（解析失败重试一次）
//! 4. 成功：结果置为 COMPLETED 并触发级联聚合
//! 5. 重试后仍无法解析：结果和整个任务都置为 FAILED

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::infrastructure::{Attachment, BlobStore, ChecklistRepository, Collaborators, LlmClient, MediaType, ReviewRepository};
use crate::models::storage_keys::content_type_for_key;
use crate::models::{ItemId, ReviewDocument, ReviewFileType, ReviewJob, ReviewJobStatus, ReviewResult, ReviewResultStatus};
use crate::services::cascade::CascadeAggregator;
use crate::services::prompts;
use crate::services::reply_parser::parse_verdict;
use crate::services::structured_call::{call_with_one_retry, StructuredCallError};
use crate::workflow::ReviewCtx;

/// 单项目审查的产出
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReview {
    pub result: ReviewResult,
    /// 级联时缺少审查结果的祖先项目
    pub missing_ancestors: Vec<ItemId>,
}

pub struct ReviewExecutor {
    blobs: Arc<dyn BlobStore>,
    llm: Arc<dyn LlmClient>,
    checklists: Arc<dyn ChecklistRepository>,
    reviews: Arc<dyn ReviewRepository>,
    cascade: Arc<CascadeAggregator>,
    output_language: String,
}

impl ReviewExecutor {
    pub fn new(collaborators: &Collaborators, cascade: Arc<CascadeAggregator>) -> Self {
        Self {
            blobs: collaborators.blobs.clone(),
            llm: collaborators.llm.clone(),
            checklists: collaborators.checklists.clone(),
            reviews: collaborators.reviews.clone(),
            cascade,
            output_language: collaborators.config.output_language.clone(),
        }
    }

    /// 审查任务 `review_job_id` 中的项目 `check_id`
    pub async fn execute(&self, review_job_id: &str, check_id: ItemId) -> Result<ItemReview, PipelineError> {
        let ctx = ReviewCtx::new(review_job_id, check_id);

        let job = self
            .reviews
            .find_job(review_job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("ReviewJob", review_job_id))?;
        let item = self
            .checklists
            .find_item(&check_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("ChecklistItem", check_id.to_string()))?;
        let mut result = self
            .reviews
            .find_result(review_job_id, &check_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("ReviewResult", ctx.to_string()))?;

        result.status = ReviewResultStatus::Processing;
        result.updated_at = chrono::Utc::now();
        self.reviews.update_result(&result).await?;

        let attachments = match self.load_attachments(&job).await {
            Ok(attachments) => attachments,
            Err(e) => {
                error!("{} ❌ 读取待审文档失败: {}", ctx, e);
                self.mark_result_failed(&mut result, &e.to_string()).await?;
                return Err(e);
            }
        };
        let prompt = prompts::review_prompt(
            &self.output_language,
            &item.name,
            &item.description,
            dominant_file_type(&job.documents),
        );
        debug!("{} 开始审查「{}」，附件 {} 个", ctx, item.name, attachments.len());

        let verdict = match call_with_one_retry(
            self.llm.as_ref(),
            &ctx,
            &prompt,
            &attachments,
            "object",
            parse_verdict,
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(StructuredCallError::Llm(inner)) => {
                self.mark_result_failed(&mut result, &inner.to_string()).await?;
                return Err(inner.into());
            }
            Err(StructuredCallError::Unparseable(reason)) => {
                let failure = PipelineError::ReviewParseFailed {
                    review_job_id: review_job_id.to_string(),
                    check_id: check_id.to_string(),
                    reason: reason.to_string(),
                };
                error!("{} ❌ {}", ctx, failure);
                self.mark_result_failed(&mut result, &reason.to_string()).await?;
                self.reviews
                    .update_job_status(review_job_id, ReviewJobStatus::Failed, Some(&failure.to_string()))
                    .await?;
                return Err(failure);
            }
        };

        result.status = ReviewResultStatus::Completed;
        result.result = Some(verdict.result);
        result.confidence_score = Some(verdict.confidence);
        result.explanation = Some(verdict.explanation);
        result.short_explanation = verdict.short_explanation;
        result.extracted_text = verdict.extracted_text;
        result.page_number = verdict.page_number;
        result.updated_at = chrono::Utc::now();

        let outcome = self.cascade.apply(&result).await?;
        info!(
            "{} ✓ 判定 {:?} (置信度 {:.2})，级联更新 {} 个祖先",
            ctx,
            verdict.result,
            verdict.confidence,
            outcome.changed.len()
        );
        Ok(ItemReview {
            result,
            missing_ancestors: outcome.missing,
        })
    }

    async fn load_attachments(&self, job: &ReviewJob) -> Result<Vec<Attachment>, PipelineError> {
        if job.documents.is_empty() {
            return Err(PipelineError::InvalidRequest(format!("审查任务 {} 没有待审文档", job.id)));
        }

        let mut attachments = Vec::with_capacity(job.documents.len());
        for document in &job.documents {
            let media_type = media_type_for(document).ok_or_else(|| {
                PipelineError::UnreadableDocument {
                    document_id: document.id.clone(),
                    reason: format!("不支持的文档格式: {}", document.filename),
                }
            })?;
            attachments.push(Attachment {
                name: document.filename.clone(),
                media_type,
                bytes: self.blobs.get(&document.blob_key).await?,
            });
        }
        Ok(attachments)
    }

    async fn mark_result_failed(&self, result: &mut ReviewResult, reason: &str) -> Result<(), PipelineError> {
        result.status = ReviewResultStatus::Failed;
        result.explanation = Some(reason.to_string());
        result.updated_at = chrono::Utc::now();
        self.reviews.update_result(result).await?;
        Ok(())
    }
}

fn media_type_for(document: &ReviewDocument) -> Option<MediaType> {
    match document.file_type {
        ReviewFileType::Pdf => Some(MediaType::Pdf),
        ReviewFileType::Image => MediaType::from_content_type(content_type_for_key(&document.blob_key))
            .filter(|media_type| *media_type != MediaType::Pdf),
    }
}

/// 全部是图片时使用图片审查提示词
fn dominant_file_type(documents: &[ReviewDocument]) -> ReviewFileType {
    if !documents.is_empty() && documents.iter().all(|d| d.file_type == ReviewFileType::Image) {
        ReviewFileType::Image
    } else {
        ReviewFileType::Pdf
    }
}
