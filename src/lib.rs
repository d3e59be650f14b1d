//! # Checklist Review
//!
//! 从多页文档中抽取层级清单，再按清单逐项审查其他文档，并把子项目结论向上聚合
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 外部协作方的契约与本地实现，只暴露能力
//! - `BlobStore` - get / put
//! - `LlmClient` - invoke(prompt, attachments)
//! - `ChecklistRepository` / `ReviewRepository` - 关系存储
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 每个阶段一个模块，只处理单页 / 单个项目
//! - 拆分、抽取、合并、写入、审查、级联聚合
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - "一份文档"的抽取流程和"一个审查任务"的审查流程
//! - `PageCtx` / `ReviewCtx` - 日志上下文
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 有界并发
//! - `orchestrator/stage_handler` - 外部编排器的 JSON 请求分发
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{ErrorKind, PipelineError};
pub use infrastructure::Collaborators;
pub use models::{ChecklistItem, ChecklistItemDraft, ItemId, ReviewResult};
pub use orchestrator::{StageHandler, StageRequest, StageResponse};
pub use services::CascadeAggregator;
