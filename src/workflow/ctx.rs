//! 处理上下文
//!
//! 封装"我正在处理哪份文档的第几页 / 哪个审查任务的哪个项目"，用作日志前缀

use std::fmt::Display;

use crate::models::ItemId;

/// 单页抽取上下文
#[derive(Debug, Clone)]
pub struct PageCtx {
    /// 清单来源文档 ID
    pub document_id: String,

    /// 页码（从1开始）
    pub page_number: u32,
}

impl PageCtx {
    pub fn new(document_id: impl Into<String>, page_number: u32) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
        }
    }
}

impl Display for PageCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[文档 {} 第 {} 页]", self.document_id, self.page_number)
    }
}

/// 单个项目的审查上下文
#[derive(Debug, Clone)]
pub struct ReviewCtx {
    pub review_job_id: String,
    pub check_id: ItemId,
}

impl ReviewCtx {
    pub fn new(review_job_id: impl Into<String>, check_id: ItemId) -> Self {
        Self {
            review_job_id: review_job_id.into(),
            check_id,
        }
    }
}

impl Display for ReviewCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[审查 {} 项目 {}]", self.review_job_id, self.check_id)
    }
}
