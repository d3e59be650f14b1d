//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责并发调度和阶段分发，不包含具体业务判断。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 有界并发处理器
//! - 用 Semaphore 限制并发数量
//! - 按输入顺序汇总每个任务的结果，单个失败不影响其他任务
//!
//! ### `stage_handler` - 阶段请求分发
//! - 解析外部编排器的 JSON 请求
//! - 调用对应的流程函数，返回 JSON 结果或带错误类别的失败
//!
//! ## 层次关系
//!
//! ```text
//! stage_handler (一个请求 = 一个阶段)
//!     ↓
//! workflow (一份文档 / 一个审查任务)
//!     ↓
//! services (单页 / 单个项目)
//!     ↓
//! infrastructure (blob / LLM / 关系存储)
//! ```

pub mod batch_processor;
pub mod stage_handler;

pub use batch_processor::{run_bounded, BatchReport};
pub use stage_handler::{StageFailure, StageHandler, StageRequest, StageResponse};
