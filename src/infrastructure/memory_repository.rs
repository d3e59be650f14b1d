//! 内存关系存储
//!
//! 同时实现 `ChecklistRepository` 和 `ReviewRepository`，用于本地运行和测试。

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::infrastructure::repository::{ChecklistRepository, ReviewRepository};
use crate::models::{
    ChecklistItem, DocumentStatus, ItemId, ReviewJob, ReviewJobStatus, ReviewResult, ReviewResultDetail,
};

#[derive(Default)]
struct State {
    items: Vec<ChecklistItem>,
    documents: HashMap<String, (DocumentStatus, Option<String>)>,
    jobs: HashMap<String, ReviewJob>,
    results: HashMap<String, Vec<ReviewResult>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
    bulk_rows_written: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通过 `bulk_update_results` 写入的累计行数
    pub fn bulk_rows_written(&self) -> usize {
        self.bulk_rows_written.load(Ordering::SeqCst)
    }

    pub async fn document_error(&self, document_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .documents
            .get(document_id)
            .and_then(|(_, detail)| detail.clone())
    }
}

fn replace_result(state: &mut State, result: &ReviewResult) -> Result<(), StoreError> {
    let slot = state
        .results
        .get_mut(&result.review_job_id)
        .and_then(|rows| rows.iter_mut().find(|row| row.check_id == result.check_id))
        .ok_or_else(|| StoreError::NotFound {
            entity: "ReviewResult",
            id: format!("{}/{}", result.review_job_id, result.check_id),
        })?;
    *slot = result.clone();
    Ok(())
}

#[async_trait]
impl ChecklistRepository for MemoryRepository {
    async fn count_items(&self, set_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|item| item.set_id == set_id)
            .count())
    }

    async fn insert_set(&self, set_id: &str, items: &[ChecklistItem]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let existing = state.items.iter().filter(|item| item.set_id == set_id).count();
        if existing > 0 {
            return Err(StoreError::SetPopulated {
                set_id: set_id.to_string(),
                existing,
            });
        }
        let existing: HashSet<ItemId> = state.items.iter().map(|item| item.id).collect();
        if let Some(duplicate) = items.iter().find(|item| existing.contains(&item.id)) {
            return Err(StoreError::Duplicate(format!("ChecklistItem {}", duplicate.id)));
        }
        state.items.extend_from_slice(items);
        Ok(())
    }

    async fn find_items(&self, set_id: &str) -> Result<Vec<ChecklistItem>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|item| item.set_id == set_id)
            .cloned()
            .collect())
    }

    async fn find_item(&self, item_id: &ItemId) -> Result<Option<ChecklistItem>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .items
            .iter()
            .find(|item| &item.id == item_id)
            .cloned())
    }

    async fn delete_items(&self, item_ids: &[ItemId]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for item_id in item_ids {
            // 外键约束：仍被引用为父项目时不能删除
            if state.items.iter().any(|item| item.parent_id.as_ref() == Some(item_id)) {
                return Err(StoreError::Backend(format!("项目 {} 仍有子项目，无法删除", item_id)));
            }
            state.items.retain(|item| &item.id != item_id);
        }
        Ok(())
    }

    async fn update_document_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .documents
            .insert(document_id.to_string(), (status, error_detail.map(str::to_string)));
        Ok(())
    }

    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .documents
            .get(document_id)
            .map(|(status, _)| *status))
    }
}

#[async_trait]
impl ReviewRepository for MemoryRepository {
    async fn create_job(&self, job: &ReviewJob, results: &[ReviewResult]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(format!("ReviewJob {}", job.id)));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        state.results.insert(job.id.clone(), results.to_vec());
        Ok(())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<ReviewJob>, StoreError> {
        Ok(self.state.read().await.jobs.get(job_id).cloned())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: ReviewJobStatus,
        error_detail: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(job_id).ok_or_else(|| StoreError::NotFound {
            entity: "ReviewJob",
            id: job_id.to_string(),
        })?;
        job.status = status;
        job.error_detail = error_detail.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn find_result(&self, job_id: &str, check_id: &ItemId) -> Result<Option<ReviewResult>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .results
            .get(job_id)
            .and_then(|rows| rows.iter().find(|row| &row.check_id == check_id))
            .cloned())
    }

    async fn update_result(&self, result: &ReviewResult) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        replace_result(&mut state, result)
    }

    async fn bulk_update_results(&self, results: &[ReviewResult]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for result in results {
            replace_result(&mut state, result)?;
        }
        self.bulk_rows_written.fetch_add(results.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn find_result_details(&self, job_id: &str) -> Result<Vec<ReviewResultDetail>, StoreError> {
        let state = self.state.read().await;
        let items: HashMap<&ItemId, &ChecklistItem> = state.items.iter().map(|item| (&item.id, item)).collect();
        let rows = state.results.get(job_id).map(Vec::as_slice).unwrap_or_default();

        Ok(rows
            .iter()
            .filter_map(|row| {
                items.get(&row.check_id).map(|item| ReviewResultDetail {
                    result: row.clone(),
                    parent_id: item.parent_id,
                    check_name: item.name.clone(),
                })
            })
            .collect())
    }
}
