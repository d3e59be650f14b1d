//! LLM 客户端 - 基础设施层
//!
//! 只负责"把提示词和附件发给模型、拿回文本"，不关心提示词内容和回复格式
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务都可以通过 `llm_api_base_url` 接入

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
}

impl MediaType {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/pdf" => Some(MediaType::Pdf),
            "image/png" => Some(MediaType::Png),
            "image/jpeg" => Some(MediaType::Jpeg),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Pdf => "pdf",
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
        }
    }
}

/// 随提示词一起发送的附件
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// LLM 回复；用量和耗时只用于日志
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub latency: Duration,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, prompt: &str, attachments: &[Attachment]) -> Result<LlmReply, LlmError>;
}

/// OpenAI 兼容接口的客户端
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiLlmClient {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    /// 构建用户消息：PDF 附件以抽取出的文本拼接到提示词后，图片以 data URL 传入
    fn build_user_message(
        &self,
        prompt: &str,
        attachments: &[Attachment],
    ) -> Result<ChatCompletionRequestMessage, LlmError> {
        let mut text = prompt.to_string();
        let mut image_parts = Vec::new();

        for attachment in attachments {
            match attachment.media_type {
                MediaType::Pdf => {
                    let content = pdf_text(attachment)?;
                    text.push_str(&format!("\n\n[Attachment: {}]\n{}", attachment.name, content));
                }
                MediaType::Png | MediaType::Jpeg => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.bytes);
                    image_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: format!("data:{};base64,{}", attachment.media_type.mime(), encoded),
                                detail: Some(ImageDetail::Auto),
                            },
                        },
                    ));
                }
            }
        }

        let user_msg = if image_parts.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
        } else {
            debug!("使用 Vision API，包含 {} 张图片", image_parts.len());
            let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText { text },
            )];
            content_parts.extend(image_parts);
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
        }
        .map_err(|e| LlmError::RequestBuildFailed(e.to_string()))?;

        Ok(ChatCompletionRequestMessage::User(user_msg))
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn invoke(&self, prompt: &str, attachments: &[Attachment]) -> Result<LlmReply, LlmError> {
        debug!(
            "调用 LLM API，模型: {}，提示词长度: {} 字符，附件: {} 个",
            self.model_name,
            prompt.len(),
            attachments.len()
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![self.build_user_message(prompt, attachments)?])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| LlmError::RequestBuildFailed(e.to_string()))?;

        let started = Instant::now();
        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            LlmError::ApiCallFailed {
                model: self.model_name.clone(),
                reason: e.to_string(),
            }
        })?;
        let latency = started.elapsed();

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        debug!("LLM API 调用成功，耗时 {:?}，用量 {:?}", latency, usage);

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(LlmReply {
            text: content.trim().to_string(),
            usage,
            latency,
        })
    }
}

fn pdf_text(attachment: &Attachment) -> Result<String, LlmError> {
    let unsupported = |reason: String| LlmError::UnsupportedAttachment {
        name: attachment.name.clone(),
        reason,
    };
    let document = lopdf::Document::load_mem(&attachment.bytes).map_err(|e| unsupported(e.to_string()))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    document.extract_text(&pages).map_err(|e| unsupported(e.to_string()))
}

/// 按顺序返回预置回复的客户端，同时记录收到的提示词
///
/// 用于离线演练和测试。
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    /// 下一次调用返回 API 错误
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.lock_replies().push_back(Err(reason.into()));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn invoke(&self, prompt: &str, _attachments: &[Attachment]) -> Result<LlmReply, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.lock_replies().pop_front();
        match next {
            Some(Ok(text)) => Ok(LlmReply {
                text,
                usage: None,
                latency: Duration::ZERO,
            }),
            Some(Err(reason)) => Err(LlmError::ApiCallFailed {
                model: "scripted".to_string(),
                reason,
            }),
            None => Err(LlmError::EmptyContent {
                model: "scripted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let client = ScriptedLlmClient::new(["first", "second"]);
        client.push_failure("boom");

        assert_eq!(client.invoke("p1", &[]).await.unwrap().text, "first");
        assert_eq!(client.invoke("p2", &[]).await.unwrap().text, "second");
        assert!(matches!(
            client.invoke("p3", &[]).await,
            Err(LlmError::ApiCallFailed { .. })
        ));
        assert!(matches!(client.invoke("p4", &[]).await, Err(LlmError::EmptyContent { .. })));
        assert_eq!(client.prompts(), vec!["p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_media_type_from_content_type() {
        assert_eq!(MediaType::from_content_type("application/pdf"), Some(MediaType::Pdf));
        assert_eq!(MediaType::from_content_type("text/plain"), None);
    }

    /// 需要真实的 LLM 服务
    #[tokio::test]
    #[ignore]
    async fn test_openai_client_simple_prompt() {
        let _ = tracing_subscriber::fmt::try_init();

        let client = OpenAiLlmClient::new(&Config::from_env());
        let reply = client.invoke("Reply with the single word: ok", &[]).await.unwrap();
        assert!(!reply.text.is_empty());
    }
}
