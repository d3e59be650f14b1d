//! 关系存储契约
//!
//! 具体存储引擎不在本 crate 范围内，这里只定义流水线需要的读写能力。

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    ChecklistItem, DocumentStatus, ItemId, ReviewJob, ReviewJobStatus, ReviewResult, ReviewResultDetail,
};

#[async_trait]
pub trait ChecklistRepository: Send + Sync {
    async fn count_items(&self, set_id: &str) -> Result<usize, StoreError>;

    /// 一次批量插入整个集合
    ///
    /// 集合非空的检查与插入是同一个原子步骤，集合已有数据时返回 `SetPopulated`
    async fn insert_set(&self, set_id: &str, items: &[ChecklistItem]) -> Result<(), StoreError>;

    async fn find_items(&self, set_id: &str) -> Result<Vec<ChecklistItem>, StoreError>;

    async fn find_item(&self, item_id: &ItemId) -> Result<Option<ChecklistItem>, StoreError>;

    /// 按给定顺序删除
    async fn delete_items(&self, item_ids: &[ItemId]) -> Result<(), StoreError>;

    async fn update_document_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>, StoreError>;
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// 创建任务并批量写入初始结果
    async fn create_job(&self, job: &ReviewJob, results: &[ReviewResult]) -> Result<(), StoreError>;

    async fn find_job(&self, job_id: &str) -> Result<Option<ReviewJob>, StoreError>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: ReviewJobStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn find_result(&self, job_id: &str, check_id: &ItemId) -> Result<Option<ReviewResult>, StoreError>;

    /// 以 (review_job_id, check_id) 为键整行替换
    async fn update_result(&self, result: &ReviewResult) -> Result<(), StoreError>;

    async fn bulk_update_results(&self, results: &[ReviewResult]) -> Result<(), StoreError>;

    /// 一次读取任务的全部结果，并联结各自清单项目的 parent_id 与名称
    async fn find_result_details(&self, job_id: &str) -> Result<Vec<ReviewResultDetail>, StoreError>;
}
