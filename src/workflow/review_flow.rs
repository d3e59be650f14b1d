//! 审查流程
//!
//! ```text
//! create_review_job   一次写入任务和每个项目的 PENDING 结果
//!   → prepare_review  任务 → PROCESSING，返回需要审查的叶子项目
//!   → 逐项审查（有界并发，顺序无关）
//!   → finalize_review 对全部结果再级联一次，决定任务最终状态
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::infrastructure::{Collaborators, ReviewRepository};
use crate::models::{ItemId, ReviewDocument, ReviewJob, ReviewJobStats, ReviewJobStatus, ReviewResult};
use crate::orchestrator::batch_processor::run_bounded;
use crate::services::{CascadeAggregator, ReviewExecutor};
use crate::utils::logging::print_review_stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReviewJob {
    pub name: String,
    pub set_id: String,
    pub documents: Vec<ReviewDocument>,
}

/// 任务收尾结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub review_job_id: String,
    pub status: ReviewJobStatus,
    pub stats: ReviewJobStats,
    pub error_detail: Option<String>,
    /// 级联时缺少审查结果的祖先项目（AGGREGATION_INCONSISTENT）
    pub missing_ancestors: Vec<ItemId>,
}

/// 创建审查任务，为清单集合中每个项目创建一条 PENDING 结果
pub async fn create_review_job(collaborators: &Collaborators, request: NewReviewJob) -> Result<ReviewJob, PipelineError> {
    let items = collaborators.checklists.find_items(&request.set_id).await?;
    if items.is_empty() {
        return Err(PipelineError::not_found("ChecklistSet", request.set_id));
    }

    let now = Utc::now();
    let job = ReviewJob {
        id: Uuid::now_v7().to_string(),
        name: request.name,
        set_id: request.set_id,
        status: ReviewJobStatus::Pending,
        documents: request.documents,
        error_detail: None,
        created_at: now,
        updated_at: now,
    };
    let results: Vec<ReviewResult> = items.iter().map(|item| ReviewResult::pending(&job.id, item.id)).collect();

    collaborators.reviews.create_job(&job, &results).await?;
    info!("[审查 {}] ✓ 创建任务，{} 个项目", job.id, results.len());
    Ok(job)
}

/// 任务 → PROCESSING，返回没有子项目的项目
///
/// 已失败的任务不会被重新启动，原有失败原因保持不变。
pub async fn prepare_review(collaborators: &Collaborators, review_job_id: &str) -> Result<Vec<ItemId>, PipelineError> {
    let job = find_job(collaborators.reviews.as_ref(), review_job_id).await?;
    if job.status == ReviewJobStatus::Failed {
        return Err(PipelineError::InvalidRequest(format!(
            "审查任务 {} 已失败，不能重新开始: {}",
            review_job_id,
            job.error_detail.as_deref().unwrap_or("未知原因")
        )));
    }
    if job.documents.is_empty() {
        return Err(PipelineError::InvalidRequest(format!("审查任务 {} 没有待审文档", review_job_id)));
    }

    collaborators
        .reviews
        .update_job_status(review_job_id, ReviewJobStatus::Processing, None)
        .await?;

    let items = collaborators.checklists.find_items(&job.set_id).await?;
    let parents: HashSet<ItemId> = items.iter().filter_map(|item| item.parent_id).collect();
    let leaves: Vec<ItemId> = items
        .iter()
        .map(|item| item.id)
        .filter(|id| !parents.contains(id))
        .collect();

    info!("[审查 {}] 开始审查 {} 个叶子项目（共 {} 个）", review_job_id, leaves.len(), items.len());
    Ok(leaves)
}

/// 收尾：再做一次全量级联，然后决定任务状态
///
/// 只有任务未被标记失败且所有结果都已完成时，任务才置为 COMPLETED。
pub async fn finalize_review(
    collaborators: &Collaborators,
    cascade: &CascadeAggregator,
    review_job_id: &str,
) -> Result<ReviewSummary, PipelineError> {
    let job = find_job(collaborators.reviews.as_ref(), review_job_id).await?;
    let outcome = cascade.recompute_job(review_job_id).await?;

    let details = collaborators.reviews.find_result_details(review_job_id).await?;
    let stats = ReviewJobStats::from_results(details.iter().map(|detail| &detail.result));
    let unfinished = details.iter().filter(|detail| !detail.result.is_completed()).count();

    let (status, error_detail) = if job.status == ReviewJobStatus::Failed {
        (ReviewJobStatus::Failed, job.error_detail.clone())
    } else if unfinished > 0 {
        let cause = format!("{} 个项目未完成审查", unfinished);
        warn!("[审查 {}] ⚠️ {}", review_job_id, cause);
        collaborators
            .reviews
            .update_job_status(review_job_id, ReviewJobStatus::Failed, Some(&cause))
            .await?;
        (ReviewJobStatus::Failed, Some(cause))
    } else {
        collaborators
            .reviews
            .update_job_status(review_job_id, ReviewJobStatus::Completed, None)
            .await?;
        (ReviewJobStatus::Completed, None)
    };

    print_review_stats(review_job_id, &stats);
    Ok(ReviewSummary {
        review_job_id: review_job_id.to_string(),
        status,
        stats,
        error_detail,
        missing_ancestors: outcome.missing,
    })
}

/// 在进程内跑完整个审查任务
pub async fn run_review(
    collaborators: &Collaborators,
    cascade: Arc<CascadeAggregator>,
    review_job_id: &str,
) -> Result<ReviewSummary, PipelineError> {
    let leaves = match prepare_review(collaborators, review_job_id).await {
        Ok(leaves) => leaves,
        Err(e) => {
            if !matches!(e, PipelineError::NotFound { .. }) {
                handle_review_error(collaborators.reviews.as_ref(), review_job_id, &e.to_string()).await?;
            }
            return Err(e);
        }
    };

    let executor = Arc::new(ReviewExecutor::new(collaborators, cascade.clone()));
    let label = format!("审查任务 {}", review_job_id);
    // 单项失败已记录在结果和任务状态上，由收尾统一判定
    run_bounded(&label, leaves, collaborators.config.max_concurrent_reviews, |check_id| {
        let executor = executor.clone();
        let review_job_id = review_job_id.to_string();
        async move { executor.execute(&review_job_id, check_id).await }
    })
    .await;

    finalize_review(collaborators, &cascade, review_job_id).await
}

/// 错误处理阶段：任务标记为 FAILED
///
/// 任务已经失败时保留第一次记录的原因。
pub async fn handle_review_error(
    reviews: &dyn ReviewRepository,
    review_job_id: &str,
    detail: &str,
) -> Result<(), PipelineError> {
    let job = find_job(reviews, review_job_id).await?;
    if job.status == ReviewJobStatus::Failed {
        warn!("[审查 {}] 任务已是 FAILED，保留原因，忽略: {}", review_job_id, detail);
        return Ok(());
    }
    error!("[审查 {}] ❌ 任务失败: {}", review_job_id, detail);
    reviews
        .update_job_status(review_job_id, ReviewJobStatus::Failed, Some(detail))
        .await?;
    Ok(())
}

/// 任务统计
pub async fn job_stats(reviews: &dyn ReviewRepository, review_job_id: &str) -> Result<ReviewJobStats, PipelineError> {
    find_job(reviews, review_job_id).await?;
    let details = reviews.find_result_details(review_job_id).await?;
    Ok(ReviewJobStats::from_results(details.iter().map(|detail| &detail.result)))
}

async fn find_job(reviews: &dyn ReviewRepository, review_job_id: &str) -> Result<ReviewJob, PipelineError> {
    reviews
        .find_job(review_job_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("ReviewJob", review_job_id))
}
