use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 流水线错误类型
///
/// 每个变体对应一种对外报告的错误类别（见 [`ErrorKind`]），
/// 协作方（blob / LLM / 数据库）的错误通过 `From` 归入对应类别。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 文档没有任何页面
    #[error("文档没有任何页面: {document_id}")]
    EmptyDocument { document_id: String },

    /// 文档无法按声明的格式解析
    #[error("无法解析文档 {document_id}: {reason}")]
    UnreadableDocument { document_id: String, reason: String },

    /// 重试一次后 LLM 抽取结果仍无法解析
    #[error("文档 {document_id} 第 {page_number} 页抽取结果无法解析: {reason}")]
    ExtractionParseFailed {
        document_id: String,
        page_number: u32,
        reason: String,
    },

    /// 目标清单集合已有数据
    #[error("清单集合 {set_id} 已存在 {existing} 个项目，拒绝重复写入")]
    StoreConflict { set_id: String, existing: usize },

    /// 重试一次后 LLM 审查结果仍无法解析
    #[error("审查任务 {review_job_id} 项目 {check_id} 的判定结果无法解析: {reason}")]
    ReviewParseFailed {
        review_job_id: String,
        check_id: String,
        reason: String,
    },

    /// 子项目引用了不存在的审查结果
    #[error("审查任务 {review_job_id} 中项目 {check_id} 缺少审查结果")]
    AggregationInconsistent { review_job_id: String, check_id: String },

    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    /// 中间产物（草稿 / 合并结果）无法序列化或反序列化
    #[error("中间产物损坏 ({key}): {reason}")]
    CorruptArtifact { key: String, reason: String },

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// 并发子任务异常退出
    #[error("子任务执行失败 ({task}): {reason}")]
    Task { task: String, reason: String },
}

/// 对外报告的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    EmptyDocument,
    UnreadableDocument,
    ExtractionParseFailed,
    /// 仅作为记录类别，不会中断流程
    DanglingReference,
    StoreConflict,
    ReviewParseFailed,
    AggregationInconsistent,
    NotFound,
    InvalidRequest,
    BlobStoreFailed,
    LlmFailed,
    StoreFailed,
    TaskFailed,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::EmptyDocument { .. } => ErrorKind::EmptyDocument,
            PipelineError::UnreadableDocument { .. } => ErrorKind::UnreadableDocument,
            PipelineError::ExtractionParseFailed { .. } => ErrorKind::ExtractionParseFailed,
            PipelineError::StoreConflict { .. } => ErrorKind::StoreConflict,
            PipelineError::ReviewParseFailed { .. } => ErrorKind::ReviewParseFailed,
            PipelineError::AggregationInconsistent { .. } => ErrorKind::AggregationInconsistent,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::Blob(_) | PipelineError::CorruptArtifact { .. } => ErrorKind::BlobStoreFailed,
            PipelineError::Llm(_) => ErrorKind::LlmFailed,
            PipelineError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            PipelineError::Store(StoreError::SetPopulated { .. }) => ErrorKind::StoreConflict,
            PipelineError::Store(_) => ErrorKind::StoreFailed,
            PipelineError::Task { .. } => ErrorKind::TaskFailed,
        }
    }

    /// 是否需要把所属文档 / 审查任务标记为 FAILED
    pub fn is_fatal_to_owner(&self) -> bool {
        !matches!(self.kind(), ErrorKind::DanglingReference | ErrorKind::AggregationInconsistent)
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task {
            task: "tokio".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Blob 存储错误
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("对象不存在: {key}")]
    NotFound { key: String },

    #[error("非法的对象键: {key}")]
    InvalidKey { key: String },

    #[error("读取对象失败 ({key}): {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("写入对象失败 ({key}): {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API调用失败 (模型: {model}): {reason}")]
    ApiCallFailed { model: String, reason: String },

    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },

    #[error("构建 LLM 请求失败: {0}")]
    RequestBuildFailed(String),

    #[error("不支持的附件 {name}: {reason}")]
    UnsupportedAttachment { name: String, reason: String },
}

/// 关系存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("数据已存在: {0}")]
    Duplicate(String),

    #[error("集合 {set_id} 已有 {existing} 个项目")]
    SetPopulated { set_id: String, existing: usize },

    #[error("存储后端错误: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_errors_map_to_kinds() {
        let blob: PipelineError = BlobError::NotFound { key: "k".into() }.into();
        assert_eq!(blob.kind(), ErrorKind::BlobStoreFailed);

        let llm: PipelineError = LlmError::EmptyContent { model: "m".into() }.into();
        assert_eq!(llm.kind(), ErrorKind::LlmFailed);

        let missing: PipelineError = StoreError::NotFound {
            entity: "ReviewJob",
            id: "j".into(),
        }
        .into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_kind_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ExtractionParseFailed).unwrap();
        assert_eq!(json, "\"EXTRACTION_PARSE_FAILED\"");
    }

    #[test]
    fn test_inconsistency_is_not_fatal() {
        let err = PipelineError::AggregationInconsistent {
            review_job_id: "j".into(),
            check_id: "c".into(),
        };
        assert!(!err.is_fatal_to_owner());
        assert!(PipelineError::StoreConflict {
            set_id: "s".into(),
            existing: 3
        }
        .is_fatal_to_owner());
    }
}
