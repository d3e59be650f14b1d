//! 清单持久化服务
//!
//! - 写入：目标集合为空时一次批量插入，已有数据则拒绝，避免重跑时树被复制
//! - 删除：一次读出整个集合，在内存中建子项目索引，按叶子优先的顺序一次删除

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{PipelineError, StoreError};
use crate::infrastructure::ChecklistRepository;
use crate::models::{ChecklistItem, ItemId};

/// 把合并后的清单写入 `set_id`，返回写入的项目数
pub async fn store_checklist(
    repo: &dyn ChecklistRepository,
    set_id: &str,
    items: &[ChecklistItem],
) -> Result<usize, PipelineError> {
    if let Some(stray) = items.iter().find(|item| item.set_id != set_id) {
        return Err(PipelineError::InvalidRequest(format!(
            "项目 {} 属于集合 {}，不能写入 {}",
            stray.id, stray.set_id, set_id
        )));
    }

    repo.insert_set(set_id, items).await.map_err(|e| match e {
        StoreError::SetPopulated { set_id, existing } => PipelineError::StoreConflict { set_id, existing },
        other => PipelineError::Store(other),
    })?;
    info!("[清单 {}] ✓ 写入 {} 个项目", set_id, items.len());
    Ok(items.len())
}

/// 删除一个项目及其全部后代，返回删除的项目数
pub async fn delete_subtree(repo: &dyn ChecklistRepository, item_id: &ItemId) -> Result<usize, PipelineError> {
    let root = repo
        .find_item(item_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("ChecklistItem", item_id.to_string()))?;

    let items = repo.find_items(&root.set_id).await?;
    let order = leaf_first_order(&items, root.id);
    debug!("[清单 {}] 删除子树 {}，共 {} 个项目", root.set_id, root.id, order.len());

    repo.delete_items(&order).await?;
    Ok(order.len())
}

/// 后序遍历：每个项目都排在它的所有后代之后
pub fn leaf_first_order(items: &[ChecklistItem], root: ItemId) -> Vec<ItemId> {
    let mut children: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
    for item in items {
        if let Some(parent) = item.parent_id {
            children.entry(parent).or_default().push(item.id);
        }
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    // (节点, 子项目是否已入栈)
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        stack.push((id, true));
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().filter(|kid| !visited.contains(*kid)).map(|kid| (*kid, false)));
        }
    }
    order
}
