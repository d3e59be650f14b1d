//! 审查数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::checklist::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewResultStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// 判定结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewFileType {
    Pdf,
    Image,
}

/// 被审查的文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDocument {
    pub id: String,
    pub filename: String,
    pub blob_key: String,
    pub file_type: ReviewFileType,
}

/// 审查任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewJob {
    pub id: String,
    pub name: String,
    pub set_id: String,
    pub status: ReviewJobStatus,
    pub documents: Vec<ReviewDocument>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 单个清单项目在某个审查任务中的结果
///
/// 每个 (review_job_id, check_id) 只存在一条，创建后原地更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub id: Uuid,
    pub review_job_id: String,
    pub check_id: ItemId,
    pub status: ReviewResultStatus,
    pub result: Option<Verdict>,
    pub confidence_score: Option<f64>,
    pub explanation: Option<String>,
    pub short_explanation: Option<String>,
    pub extracted_text: Option<String>,
    pub page_number: Option<u32>,
    pub user_override: bool,
    pub user_comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewResult {
    /// 任务创建时的初始结果
    pub fn pending(review_job_id: impl Into<String>, check_id: ItemId) -> Self {
        Self {
            id: Uuid::now_v7(),
            review_job_id: review_job_id.into(),
            check_id,
            status: ReviewResultStatus::Pending,
            result: None,
            confidence_score: None,
            explanation: None,
            short_explanation: None,
            extracted_text: None,
            page_number: None,
            user_override: false,
            user_comment: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ReviewResultStatus::Completed
    }

    /// 判定字段是否相同（忽略时间戳）
    pub fn same_verdict_fields(&self, other: &ReviewResult) -> bool {
        self.status == other.status
            && self.result == other.result
            && self.confidence_score == other.confidence_score
            && self.explanation == other.explanation
    }
}

/// 审查结果与其清单项目的联合视图（一次批量读取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResultDetail {
    pub result: ReviewResult,
    pub parent_id: Option<ItemId>,
    pub check_name: String,
}

/// LLM 给出的判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewVerdict {
    pub result: Verdict,
    pub confidence: f64,
    pub explanation: String,
    pub short_explanation: Option<String>,
    pub extracted_text: Option<String>,
    pub page_number: Option<u32>,
}

/// 审查任务统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewJobStats {
    pub total: usize,
    pub passed: usize,
    /// 结论为 FAIL
    pub failed: usize,
    /// 审查本身出错（结果状态 FAILED），不计入不合格
    pub errored: usize,
    pub pending: usize,
}

impl ReviewJobStats {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ReviewResult>) -> Self {
        let mut stats = Self::default();
        for result in results {
            stats.total += 1;
            match (result.status, result.result) {
                (ReviewResultStatus::Completed, Some(Verdict::Pass)) => stats.passed += 1,
                (ReviewResultStatus::Completed, Some(Verdict::Fail)) => stats.failed += 1,
                (ReviewResultStatus::Failed, _) => stats.errored += 1,
                _ => stats.pending += 1,
            }
        }
        stats
    }
}
