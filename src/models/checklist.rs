//! 清单数据模型
//!
//! - `ChecklistItemDraft`：单页抽取结果，使用页内整数 ID
//! - `ChecklistItem`：持久化后的清单项目，使用全局 ID

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 页内局部 ID，只在同一页的草稿列表中唯一
pub type LocalId = i64;

/// 清单项目的全局 ID（UUIDv7，全局唯一且按时间可排序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    #[default]
    #[serde(alias = "simple")]
    Simple,
    #[serde(alias = "flow")]
    Flow,
}

/// 流程图分支数据
///
/// 草稿中 `R = LocalId`，持久化后 `R = Option<ItemId>`（悬空引用被置空）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowData<R> {
    YesNo { next_if_yes: R, next_if_no: R },
    MultiChoice { next_options: BTreeMap<String, R> },
}

impl<R> FlowData<R> {
    /// 依次访问所有分支目标
    pub fn targets(&self) -> Vec<&R> {
        match self {
            FlowData::YesNo {
                next_if_yes,
                next_if_no,
            } => vec![next_if_yes, next_if_no],
            FlowData::MultiChoice { next_options } => next_options.values().collect(),
        }
    }
}

pub type FlowDraft = FlowData<LocalId>;

/// 单页抽取出的清单项目草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItemDraft {
    pub local_id: LocalId,
    pub name: String,
    pub description: String,
    pub parent_local_id: Option<LocalId>,
    pub item_type: ItemType,
    pub is_conclusion: bool,
    pub flow_data: Option<FlowDraft>,
}

impl ChecklistItemDraft {
    pub fn simple(local_id: LocalId, name: impl Into<String>, parent_local_id: Option<LocalId>) -> Self {
        Self {
            local_id,
            name: name.into(),
            description: String::new(),
            parent_local_id,
            item_type: ItemType::Simple,
            is_conclusion: false,
            flow_data: None,
        }
    }
}

/// 一页的全部草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDrafts {
    pub page_number: u32,
    pub drafts: Vec<ChecklistItemDraft>,
}

/// 持久化的清单项目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: ItemId,
    pub set_id: String,
    pub parent_id: Option<ItemId>,
    pub name: String,
    pub description: String,
    pub item_type: ItemType,
    pub is_conclusion: bool,
    pub flow_data: Option<FlowData<Option<ItemId>>>,
}

/// 清单来源文档的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}
