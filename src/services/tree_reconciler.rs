//! 跨页清单合并服务
//!
//! ## 职责
//!
//! 把一份文档所有页面的草稿合并成一棵（一片）清单树：
//!
//! 1. 按页码顺序处理，每个草稿分配一个新的全局 ID
//! 2. 局部 ID 只在本页内唯一，所以映射按页隔离
//! 3. 父项目和流程分支引用都通过本页映射改写为全局 ID
//! 4. 无法解析的引用置空并记录，不会让整份文档失败
//! 5. 父链上的环在闭合处断开，同样记录

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::infrastructure::BlobStore;
use crate::models::storage_keys::checklist_aggregate_key;
use crate::models::{ChecklistItem, FlowData, FlowDraft, ItemId, LocalId, PageDrafts};
use crate::services::artifacts;
use crate::services::page_extractor::load_page_drafts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    /// 目标局部 ID 在本页不存在
    Unresolved,
    /// 保留该引用会让父链成环
    Cycle,
}

/// 被丢弃的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingReference {
    pub page_number: u32,
    pub local_id: LocalId,
    /// `parent_id`、`next_if_yes`、`next_if_no` 或 `next_options.<label>`
    pub field: String,
    pub target: LocalId,
    pub reason: DropReason,
}

/// 合并结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub set_id: String,
    pub items: Vec<ChecklistItem>,
    pub dangling: Vec<DanglingReference>,
}

/// 草稿来源，用于记录
#[derive(Debug, Clone, Copy)]
struct Origin {
    page_number: u32,
    local_id: LocalId,
}

/// 合并所有页面的草稿
pub fn reconcile(set_id: &str, pages: &[PageDrafts]) -> Reconciliation {
    let mut ordered: Vec<&PageDrafts> = pages.iter().collect();
    ordered.sort_by_key(|page| page.page_number);

    let mut items = Vec::new();
    let mut origins = Vec::new();
    let mut dangling = Vec::new();

    for page in ordered {
        // 先为本页所有草稿分配 ID，允许向后引用
        let mut mapping: HashMap<LocalId, ItemId> = HashMap::with_capacity(page.drafts.len());
        let ids: Vec<ItemId> = page
            .drafts
            .iter()
            .map(|draft| {
                let id = ItemId::generate();
                mapping.entry(draft.local_id).or_insert(id);
                id
            })
            .collect();

        for (draft, id) in page.drafts.iter().zip(ids) {
            let mut resolve = |field: String, target: LocalId| -> Option<ItemId> {
                let resolved = mapping.get(&target).copied();
                if resolved.is_none() {
                    dangling.push(DanglingReference {
                        page_number: page.page_number,
                        local_id: draft.local_id,
                        field,
                        target,
                        reason: DropReason::Unresolved,
                    });
                }
                resolved
            };

            let parent_id = draft
                .parent_local_id
                .and_then(|target| resolve("parent_id".to_string(), target));
            let flow_data = draft.flow_data.as_ref().map(|flow| rewrite_flow(flow, &mut resolve));

            items.push(ChecklistItem {
                id,
                set_id: set_id.to_string(),
                parent_id,
                name: draft.name.clone(),
                description: draft.description.clone(),
                item_type: draft.item_type,
                is_conclusion: draft.is_conclusion,
                flow_data,
            });
            origins.push(Origin {
                page_number: page.page_number,
                local_id: draft.local_id,
            });
        }
    }

    break_parent_cycles(&mut items, &origins, &mut dangling);

    for note in &dangling {
        warn!(
            "[清单 {}] ⚠️ 第 {} 页项目 {} 的引用 {} -> {} 已丢弃 ({:?})",
            set_id, note.page_number, note.local_id, note.field, note.target, note.reason
        );
    }

    Reconciliation {
        set_id: set_id.to_string(),
        items,
        dangling,
    }
}

fn rewrite_flow<F>(flow: &FlowDraft, resolve: &mut F) -> FlowData<Option<ItemId>>
where
    F: FnMut(String, LocalId) -> Option<ItemId>,
{
    match flow {
        FlowData::YesNo {
            next_if_yes,
            next_if_no,
        } => FlowData::YesNo {
            next_if_yes: resolve("next_if_yes".to_string(), *next_if_yes),
            next_if_no: resolve("next_if_no".to_string(), *next_if_no),
        },
        FlowData::MultiChoice { next_options } => FlowData::MultiChoice {
            next_options: next_options
                .iter()
                .map(|(label, target)| (label.clone(), resolve(format!("next_options.{}", label), *target)))
                .collect::<BTreeMap<_, _>>(),
        },
    }
}

/// 沿父链向上走，遇到本轮已访问过的节点时断开当前节点的父链接
fn break_parent_cycles(items: &mut [ChecklistItem], origins: &[Origin], dangling: &mut Vec<DanglingReference>) {
    let index: HashMap<ItemId, usize> = items.iter().enumerate().map(|(i, item)| (item.id, i)).collect();
    let mut settled: HashSet<usize> = HashSet::new();

    for start in 0..items.len() {
        let mut path: HashSet<usize> = HashSet::new();
        let mut current = start;
        while !settled.contains(&current) {
            path.insert(current);
            let Some(parent) = items[current].parent_id.and_then(|id| index.get(&id).copied()) else {
                break;
            };
            if path.contains(&parent) {
                let origin = origins[current];
                let target = origins[parent].local_id;
                items[current].parent_id = None;
                dangling.push(DanglingReference {
                    page_number: origin.page_number,
                    local_id: origin.local_id,
                    field: "parent_id".to_string(),
                    target,
                    reason: DropReason::Cycle,
                });
                break;
            }
            current = parent;
        }
        settled.extend(path);
    }
}

/// 合并阶段：读取各页草稿，合并后写入合并结果
pub async fn reconcile_document(
    blobs: &dyn BlobStore,
    set_id: &str,
    document_id: &str,
    page_count: u32,
) -> Result<Reconciliation, PipelineError> {
    if page_count == 0 {
        return Err(PipelineError::EmptyDocument {
            document_id: document_id.to_string(),
        });
    }

    let mut pages = Vec::with_capacity(page_count as usize);
    for page_number in 1..=page_count {
        pages.push(load_page_drafts(blobs, document_id, page_number).await?);
    }

    let reconciliation = reconcile(set_id, &pages);
    artifacts::store_json(blobs, &checklist_aggregate_key(document_id), &reconciliation).await?;

    info!(
        "[文档 {}] ✓ 合并 {} 页，共 {} 个项目，丢弃 {} 个引用",
        document_id,
        page_count,
        reconciliation.items.len(),
        reconciliation.dangling.len()
    );
    Ok(reconciliation)
}

/// 读取合并阶段写入的结果
pub async fn load_reconciliation(blobs: &dyn BlobStore, document_id: &str) -> Result<Reconciliation, PipelineError> {
    artifacts::load_json(blobs, &checklist_aggregate_key(document_id)).await
}
