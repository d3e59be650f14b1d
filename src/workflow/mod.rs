//! 流程层（Workflow）
//!
//! 把各阶段服务串成"一份文档"和"一个审查任务"的完整流程，并维护状态。

pub mod ctx;
pub mod extraction_flow;
pub mod review_flow;

pub use ctx::{PageCtx, ReviewCtx};
pub use extraction_flow::{extract_document, ExtractionRequest, ExtractionSummary};
pub use review_flow::{NewReviewJob, ReviewSummary};
