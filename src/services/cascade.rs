//! 审查结果级联聚合
//!
//! ## 算法
//!
//! 1. 持久化刚更新的结果
//! 2. 一次读出任务的全部结果（联结 parent_id）
//! 3. 从该结果的父项目开始向上：只有全部直接子项目都 COMPLETED 时父项目才可更新，
//!    否则停止上行
//! 4. 父项目结论 = 子项目全部 PASS 则 PASS，否则 FAIL；置信度取子项目最小值
//! 5. 所有变化的祖先一次批量写回
//!
//! 重算只读取当前子项目状态，不累积增量，所以重复执行结果不变。

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::infrastructure::ReviewRepository;
use crate::models::{ItemId, ReviewResult, ReviewResultDetail, ReviewResultStatus, Verdict};

pub const ALL_CHILDREN_PASS: &str = "所有子项目均通过";

/// 一次级联的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeOutcome {
    /// 需要写回的祖先结果
    pub changed: Vec<ReviewResult>,
    /// 缺少审查结果的祖先项目，对应分支的聚合被跳过
    pub missing: Vec<ItemId>,
}

/// 任务结果树的内存快照
struct ResultTree {
    results: HashMap<ItemId, ReviewResult>,
    parents: HashMap<ItemId, Option<ItemId>>,
    names: HashMap<ItemId, String>,
    children: HashMap<ItemId, Vec<ItemId>>,
    changed: BTreeMap<ItemId, ReviewResult>,
    missing: Vec<ItemId>,
}

impl ResultTree {
    fn new(details: &[ReviewResultDetail]) -> Self {
        let mut tree = ResultTree {
            results: HashMap::with_capacity(details.len()),
            parents: HashMap::with_capacity(details.len()),
            names: HashMap::with_capacity(details.len()),
            children: HashMap::new(),
            changed: BTreeMap::new(),
            missing: Vec::new(),
        };
        for detail in details {
            let check_id = detail.result.check_id;
            tree.results.insert(check_id, detail.result.clone());
            tree.parents.insert(check_id, detail.parent_id);
            tree.names.insert(check_id, detail.check_name.clone());
            if let Some(parent) = detail.parent_id {
                tree.children.entry(parent).or_default().push(check_id);
            }
        }
        tree
    }

    /// 从 `start` 的父项目开始向上重算
    fn ascend_from(&mut self, start: ItemId) {
        let mut visited = HashSet::from([start]);
        let mut current = start;

        while let Some(parent) = self.parents.get(&current).copied().flatten() {
            if !visited.insert(parent) {
                warn!("检测到父链成环，停止上行: {}", parent);
                return;
            }
            let Some(existing) = self.results.get(&parent) else {
                if !self.missing.contains(&parent) {
                    self.missing.push(parent);
                }
                return;
            };

            let Some(aggregate) = self.aggregate_children(parent) else {
                return;
            };

            // 用户手动修改过的结果保持不变，继续以其当前值向上
            if !existing.user_override {
                let mut updated = existing.clone();
                updated.status = ReviewResultStatus::Completed;
                updated.result = Some(aggregate.result);
                updated.confidence_score = Some(aggregate.confidence);
                updated.explanation = Some(aggregate.explanation);

                if !updated.same_verdict_fields(existing) {
                    updated.updated_at = chrono::Utc::now();
                    self.changed.insert(parent, updated.clone());
                    self.results.insert(parent, updated);
                }
            }
            current = parent;
        }
    }

    /// 有未完成的子项目时返回 None
    fn aggregate_children(&self, parent: ItemId) -> Option<Aggregate> {
        let kids = self.children.get(&parent)?;
        let mut failing = Vec::new();
        let mut confidence = f64::INFINITY;

        for kid in kids {
            let result = self.results.get(kid)?;
            if !result.is_completed() {
                return None;
            }
            if result.result != Some(Verdict::Pass) {
                failing.push(self.names.get(kid).map(String::as_str).unwrap_or_default());
            }
            confidence = confidence.min(result.confidence_score.unwrap_or(0.0));
        }

        Some(if failing.is_empty() {
            Aggregate {
                result: Verdict::Pass,
                confidence,
                explanation: ALL_CHILDREN_PASS.to_string(),
            }
        } else {
            Aggregate {
                result: Verdict::Fail,
                confidence,
                explanation: format!("以下子项目不合格: {}", failing.join("、")),
            }
        })
    }

    fn into_outcome(self) -> CascadeOutcome {
        CascadeOutcome {
            changed: self.changed.into_values().collect(),
            missing: self.missing,
        }
    }
}

struct Aggregate {
    result: Verdict,
    confidence: f64,
    explanation: String,
}

/// 纯函数：在快照上从 `start` 向上重算
pub fn recompute_ancestors(details: &[ReviewResultDetail], start: ItemId) -> CascadeOutcome {
    let mut tree = ResultTree::new(details);
    tree.ascend_from(start);
    tree.into_outcome()
}

/// 纯函数：从每个已完成的结果出发重算，用于任务收尾
pub fn recompute_all(details: &[ReviewResultDetail]) -> CascadeOutcome {
    let mut tree = ResultTree::new(details);
    let completed: Vec<ItemId> = details
        .iter()
        .filter(|detail| detail.result.is_completed())
        .map(|detail| detail.result.check_id)
        .collect();
    for start in completed {
        tree.ascend_from(start);
    }
    tree.into_outcome()
}

/// 级联聚合器
///
/// 同一任务内的级联在进程内串行执行。任务锁在最后一个持有者用完后移除。
pub struct CascadeAggregator {
    reviews: Arc<dyn ReviewRepository>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CascadeAggregator {
    pub fn new(reviews: Arc<dyn ReviewRepository>) -> Self {
        Self {
            reviews,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn job_lock(&self, review_job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(review_job_id.to_string()).or_default().clone()
    }

    /// 映射表和调用方各持有一份时没有其他等待者，可以移除
    fn release_lock(&self, review_job_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(review_job_id);
        }
    }

    #[cfg(test)]
    fn tracked_jobs(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// 持久化 `updated` 并向上级联
    pub async fn apply(&self, updated: &ReviewResult) -> Result<CascadeOutcome, PipelineError> {
        let lock = self.job_lock(&updated.review_job_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_locked(updated).await
        };
        self.release_lock(&updated.review_job_id, lock);
        outcome
    }

    async fn apply_locked(&self, updated: &ReviewResult) -> Result<CascadeOutcome, PipelineError> {
        self.reviews.update_result(updated).await?;
        let details = self.reviews.find_result_details(&updated.review_job_id).await?;
        let outcome = recompute_ancestors(&details, updated.check_id);
        self.persist(&updated.review_job_id, &outcome).await?;
        Ok(outcome)
    }

    /// 对任务的全部已完成结果重算一次
    pub async fn recompute_job(&self, review_job_id: &str) -> Result<CascadeOutcome, PipelineError> {
        let lock = self.job_lock(review_job_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.recompute_locked(review_job_id).await
        };
        self.release_lock(review_job_id, lock);
        outcome
    }

    async fn recompute_locked(&self, review_job_id: &str) -> Result<CascadeOutcome, PipelineError> {
        let details = self.reviews.find_result_details(review_job_id).await?;
        let outcome = recompute_all(&details);
        self.persist(review_job_id, &outcome).await?;
        Ok(outcome)
    }

    /// 用户手动修改某个项目的结论，然后向上级联
    pub async fn override_result(
        &self,
        review_job_id: &str,
        check_id: ItemId,
        verdict: Verdict,
        comment: Option<String>,
    ) -> Result<ReviewResult, PipelineError> {
        let mut result = self
            .reviews
            .find_result(review_job_id, &check_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("ReviewResult", format!("{}/{}", review_job_id, check_id)))?;

        result.status = ReviewResultStatus::Completed;
        result.result = Some(verdict);
        result.user_override = true;
        result.user_comment = comment;
        result.updated_at = chrono::Utc::now();

        self.apply(&result).await?;
        info!("[审查 {} 项目 {}] ✓ 用户修改结论为 {:?}", review_job_id, check_id, verdict);
        Ok(result)
    }

    async fn persist(&self, review_job_id: &str, outcome: &CascadeOutcome) -> Result<(), PipelineError> {
        for check_id in &outcome.missing {
            let inconsistency = PipelineError::AggregationInconsistent {
                review_job_id: review_job_id.to_string(),
                check_id: check_id.to_string(),
            };
            warn!("⚠️ {}，跳过该分支的聚合", inconsistency);
        }

        if outcome.changed.is_empty() {
            return Ok(());
        }
        self.reviews.bulk_update_results(&outcome.changed).await?;
        debug!("[审查 {}] 级联更新 {} 个祖先项目", review_job_id, outcome.changed.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{ChecklistRepository, MemoryRepository};
    use crate::models::{ChecklistItem, ItemType, ReviewJob, ReviewJobStatus};

    fn detail(check_id: ItemId, parent_id: Option<ItemId>, name: &str) -> ReviewResultDetail {
        ReviewResultDetail {
            result: ReviewResult::pending("job", check_id),
            parent_id,
            check_name: name.to_string(),
        }
    }

    fn complete(detail: &mut ReviewResultDetail, verdict: Verdict, confidence: f64) {
        detail.result.status = ReviewResultStatus::Completed;
        detail.result.result = Some(verdict);
        detail.result.confidence_score = Some(confidence);
    }

    /// parent 下挂三个子项目: PASS(0.9)、PASS(0.7)、FAIL(0.95)
    fn family() -> (ItemId, Vec<ReviewResultDetail>) {
        let parent = ItemId::generate();
        let mut details = vec![detail(parent, None, "parent")];
        for (name, verdict, confidence) in [
            ("c1", Verdict::Pass, 0.9),
            ("c2", Verdict::Pass, 0.7),
            ("c3", Verdict::Fail, 0.95),
        ] {
            let mut child = detail(ItemId::generate(), Some(parent), name);
            complete(&mut child, verdict, confidence);
            details.push(child);
        }
        (parent, details)
    }

    #[test]
    fn test_fail_with_min_confidence_in_any_order() {
        let (parent, details) = family();
        let children: Vec<ItemId> = details[1..].iter().map(|d| d.result.check_id).collect();

        for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
            let mut snapshot = vec![details[0].clone()];
            snapshot.extend(order.iter().map(|&i| details[i + 1].clone()));

            let outcome = recompute_ancestors(&snapshot, children[order[2]]);
            assert_eq!(outcome.changed.len(), 1);
            let aggregated = &outcome.changed[0];
            assert_eq!(aggregated.check_id, parent);
            assert_eq!(aggregated.status, ReviewResultStatus::Completed);
            assert_eq!(aggregated.result, Some(Verdict::Fail));
            assert_eq!(aggregated.confidence_score, Some(0.7));
            assert_eq!(aggregated.explanation.as_deref(), Some("以下子项目不合格: c3"));
        }
    }

    #[test]
    fn test_pending_child_withholds_parent() {
        let parent = ItemId::generate();
        let mut done = detail(ItemId::generate(), Some(parent), "done");
        complete(&mut done, Verdict::Pass, 0.8);
        let mut running = detail(ItemId::generate(), Some(parent), "running");
        running.result.status = ReviewResultStatus::Processing;
        let details = vec![detail(parent, None, "parent"), done.clone(), running];

        for _ in 0..3 {
            let outcome = recompute_ancestors(&details, done.result.check_id);
            assert!(outcome.changed.is_empty());
        }
        assert!(recompute_all(&details).changed.is_empty());
    }

    #[test]
    fn test_pass_propagates_to_root() {
        let root = ItemId::generate();
        let mid = ItemId::generate();
        let mut leaf = detail(ItemId::generate(), Some(mid), "leaf");
        complete(&mut leaf, Verdict::Pass, 0.6);
        let details = vec![detail(root, None, "root"), detail(mid, Some(root), "mid"), leaf.clone()];

        let outcome = recompute_ancestors(&details, leaf.result.check_id);
        let ids: Vec<ItemId> = outcome.changed.iter().map(|r| r.check_id).collect();
        assert_eq!(outcome.changed.len(), 2);
        assert!(ids.contains(&root) && ids.contains(&mid));
        assert!(outcome
            .changed
            .iter()
            .all(|r| r.result == Some(Verdict::Pass) && r.explanation.as_deref() == Some(ALL_CHILDREN_PASS)));
    }

    #[test]
    fn test_missing_confidence_counts_as_zero() {
        let parent = ItemId::generate();
        let mut child = detail(ItemId::generate(), Some(parent), "child");
        complete(&mut child, Verdict::Pass, 0.9);
        child.result.confidence_score = None;
        let details = vec![detail(parent, None, "parent"), child.clone()];

        let outcome = recompute_ancestors(&details, child.result.check_id);
        assert_eq!(outcome.changed[0].confidence_score, Some(0.0));
    }

    #[test]
    fn test_missing_parent_result_is_reported() {
        let ghost = ItemId::generate();
        let mut child = detail(ItemId::generate(), Some(ghost), "child");
        complete(&mut child, Verdict::Pass, 0.9);

        let outcome = recompute_ancestors(&[child.clone()], child.result.check_id);
        assert!(outcome.changed.is_empty());
        assert_eq!(outcome.missing, vec![ghost]);
    }

    #[test]
    fn test_overridden_ancestor_is_kept() {
        let root = ItemId::generate();
        let mid = ItemId::generate();
        let mut mid_detail = detail(mid, Some(root), "mid");
        complete(&mut mid_detail, Verdict::Pass, 1.0);
        mid_detail.result.user_override = true;
        let mut leaf = detail(ItemId::generate(), Some(mid), "leaf");
        complete(&mut leaf, Verdict::Fail, 0.9);
        let details = vec![detail(root, None, "root"), mid_detail, leaf.clone()];

        let outcome = recompute_ancestors(&details, leaf.result.check_id);
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].check_id, root);
        assert_eq!(outcome.changed[0].result, Some(Verdict::Pass));
    }

    async fn seeded_repo(details: &[ReviewResultDetail]) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        let items: Vec<ChecklistItem> = details
            .iter()
            .map(|d| ChecklistItem {
                id: d.result.check_id,
                set_id: "set".to_string(),
                parent_id: d.parent_id,
                name: d.check_name.clone(),
                description: String::new(),
                item_type: ItemType::Simple,
                is_conclusion: false,
                flow_data: None,
            })
            .collect();
        repo.insert_set("set", &items).await.unwrap();

        let now = chrono::Utc::now();
        let job = ReviewJob {
            id: "job".to_string(),
            name: "job".to_string(),
            set_id: "set".to_string(),
            status: ReviewJobStatus::Processing,
            documents: vec![],
            error_detail: None,
            created_at: now,
            updated_at: now,
        };
        let results: Vec<ReviewResult> = details.iter().map(|d| d.result.clone()).collect();
        repo.create_job(&job, &results).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let (parent, details) = family();
        let repo = seeded_repo(&details).await;
        let aggregator = CascadeAggregator::new(repo.clone());

        let first = aggregator.recompute_job("job").await.unwrap();
        assert_eq!(first.changed.len(), 1);
        let written = repo.bulk_rows_written();
        assert_eq!(written, 1);

        let second = aggregator.recompute_job("job").await.unwrap();
        assert!(second.changed.is_empty());
        assert_eq!(repo.bulk_rows_written(), written);

        let stored = repo.find_result("job", &parent).await.unwrap().unwrap();
        assert_eq!(stored.result, Some(Verdict::Fail));
    }

    #[tokio::test]
    async fn test_override_cascades() {
        let (parent, details) = family();
        let failing_child = details[3].result.check_id;
        let repo = seeded_repo(&details).await;
        let aggregator = CascadeAggregator::new(repo.clone());
        aggregator.recompute_job("job").await.unwrap();

        let overridden = aggregator
            .override_result("job", failing_child, Verdict::Pass, Some("人工复核通过".to_string()))
            .await
            .unwrap();
        assert!(overridden.user_override);

        let stored = repo.find_result("job", &parent).await.unwrap().unwrap();
        assert_eq!(stored.result, Some(Verdict::Pass));
        assert_eq!(stored.confidence_score, Some(0.7));
    }

    #[tokio::test]
    async fn test_concurrent_applies_converge() {
        let parent = ItemId::generate();
        let mut details = vec![detail(parent, None, "parent")];
        details.extend((0..8).map(|i| detail(ItemId::generate(), Some(parent), &format!("c{}", i))));
        let repo = seeded_repo(&details).await;
        let aggregator = Arc::new(CascadeAggregator::new(repo.clone()));

        let handles: Vec<_> = details[1..]
            .iter()
            .map(|d| {
                let aggregator = aggregator.clone();
                let mut result = d.result.clone();
                result.status = ReviewResultStatus::Completed;
                result.result = Some(Verdict::Pass);
                result.confidence_score = Some(0.8);
                tokio::spawn(async move { aggregator.apply(&result).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = repo.find_result("job", &parent).await.unwrap().unwrap();
        assert_eq!(stored.status, ReviewResultStatus::Completed);
        assert_eq!(stored.result, Some(Verdict::Pass));
        assert_eq!(aggregator.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_job_lock_dropped_after_use() {
        let (_, details) = family();
        let repo = seeded_repo(&details).await;
        let aggregator = CascadeAggregator::new(repo.clone());

        aggregator.recompute_job("job").await.unwrap();
        assert_eq!(aggregator.tracked_jobs(), 0);

        aggregator.apply(&details[1].result).await.unwrap();
        assert_eq!(aggregator.tracked_jobs(), 0);

        assert!(aggregator.recompute_job("unknown").await.is_ok());
        assert_eq!(aggregator.tracked_jobs(), 0);
    }
}
