//! 带一次修复重试的结构化 LLM 调用
//!
//! 第一次回复解析失败时，把解析错误附加到原提示词后重试一次；
//! 第二次仍失败则放弃。传输层错误不重试，直接返回。

use std::fmt::Display;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::infrastructure::{Attachment, LlmClient};
use crate::services::prompts;
use crate::services::reply_parser::ReplyParseError;
use crate::utils::logging::truncate_text;

#[derive(Debug, Error)]
pub enum StructuredCallError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// 两次回复都无法解析；保留最后一次的错误
    #[error("{0}")]
    Unparseable(ReplyParseError),
}

/// 调用 LLM 并用 `parse` 严格解析回复
///
/// `expected_shape` 用于重试提示词（如 "array" / "object"）。
pub async fn call_with_one_retry<T, F>(
    llm: &dyn LlmClient,
    ctx: &impl Display,
    prompt: &str,
    attachments: &[Attachment],
    expected_shape: &str,
    parse: F,
) -> Result<T, StructuredCallError>
where
    F: Fn(&str) -> Result<T, ReplyParseError>,
{
    let reply = llm.invoke(prompt, attachments).await?;
    debug!(
        "{} LLM 回复 (耗时 {:?}，用量 {:?}): {}",
        ctx,
        reply.latency,
        reply.usage,
        truncate_text(&reply.text, 200)
    );

    let first_error = match parse(&reply.text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    warn!("{} ⚠️ 回复解析失败，重试一次: {}", ctx, first_error);

    let retry_prompt = prompts::with_parse_error(prompt, &first_error.to_string(), expected_shape);
    let reply = llm.invoke(&retry_prompt, attachments).await?;
    debug!("{} 重试回复 (耗时 {:?}): {}", ctx, reply.latency, truncate_text(&reply.text, 200));

    parse(&reply.text).map_err(|e| {
        warn!("{} 重试后仍无法解析: {}", ctx, e);
        StructuredCallError::Unparseable(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ScriptedLlmClient;
    use crate::services::reply_parser::parse_checklist_drafts;

    #[tokio::test]
    async fn test_first_reply_parses() {
        let llm = ScriptedLlmClient::new([r#"[{"name": "A"}]"#]);
        let drafts = call_with_one_retry(&llm, &"[t]", "PROMPT", &[], "array", parse_checklist_drafts)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_includes_parse_error() {
        let llm = ScriptedLlmClient::new([r#"{"name": "A"}"#, r#"[{"name": "A"}]"#]);
        let drafts = call_with_one_retry(&llm, &"[t]", "PROMPT", &[], "array", parse_checklist_drafts)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("PROMPT"));
        assert!(prompts[1].contains("must be a JSON array"));
    }

    #[tokio::test]
    async fn test_gives_up_after_second_failure() {
        let llm = ScriptedLlmClient::new(["not json", "still not json", "[]"]);
        let result = call_with_one_retry(&llm, &"[t]", "PROMPT", &[], "array", parse_checklist_drafts).await;
        assert!(matches!(result, Err(StructuredCallError::Unparseable(ReplyParseError::InvalidJson(_)))));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let llm = ScriptedLlmClient::default();
        llm.push_failure("timeout");
        let result = call_with_one_retry(&llm, &"[t]", "PROMPT", &[], "array", parse_checklist_drafts).await;
        assert!(matches!(result, Err(StructuredCallError::Llm(LlmError::ApiCallFailed { .. }))));
        assert_eq!(llm.call_count(), 1);
    }
}
