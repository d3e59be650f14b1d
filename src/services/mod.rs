//! 业务能力层（Services）
//!
//! 每个流水线阶段一个模块，只处理单页 / 单个项目，协作方由调用方显式传入。

pub mod artifacts;
pub mod cascade;
pub mod checklist_writer;
pub mod page_extractor;
pub mod page_splitter;
pub mod prompts;
pub mod reply_parser;
pub mod review_executor;
pub mod structured_call;
pub mod tree_reconciler;

pub use cascade::{CascadeAggregator, CascadeOutcome};
pub use page_splitter::PageRef;
pub use review_executor::{ItemReview, ReviewExecutor};
pub use tree_reconciler::{DanglingReference, DropReason, Reconciliation};
