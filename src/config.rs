use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 单个文档同时抽取的页数上限
    pub max_concurrent_pages: usize,
    /// 单个审查任务同时执行的项目数上限
    pub max_concurrent_reviews: usize,
    /// 本地 blob 存储根目录
    pub blob_root: String,
    /// LLM 输出语言
    pub output_language: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_pages: 4,
            max_concurrent_reviews: 8,
            blob_root: "blob_store".to_string(),
            output_language: "English".to_string(),
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_temperature: 0.0,
            llm_max_tokens: 4096,
        }
    }
}

impl Config {
    /// 读取 `CHECKLIST_CONFIG` 指向的 TOML 文件（如有），再叠加环境变量
    pub fn load() -> Result<Self> {
        let base = match std::env::var("CHECKLIST_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.normalized())
    }

    fn with_env_overrides(self) -> Self {
        let config = Self {
            max_concurrent_pages: env_parse("MAX_CONCURRENT_PAGES").unwrap_or(self.max_concurrent_pages),
            max_concurrent_reviews: env_parse("MAX_CONCURRENT_REVIEWS").unwrap_or(self.max_concurrent_reviews),
            blob_root: std::env::var("BLOB_ROOT").unwrap_or(self.blob_root),
            output_language: std::env::var("OUTPUT_LANGUAGE").unwrap_or(self.output_language),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_temperature: env_parse("LLM_TEMPERATURE").unwrap_or(self.llm_temperature),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS").unwrap_or(self.llm_max_tokens),
        };
        config.normalized()
    }

    /// 并发数至少为 1
    fn normalized(mut self) -> Self {
        self.max_concurrent_pages = self.max_concurrent_pages.max(1);
        self.max_concurrent_reviews = self.max_concurrent_reviews.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_partial_override_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            max_concurrent_pages = 2
            llm_model_name = "gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_pages, 2);
        assert_eq!(config.llm_model_name, "gpt-4o-mini");
        assert_eq!(config.max_concurrent_reviews, Config::default().max_concurrent_reviews);
        assert_eq!(config.llm_max_tokens, 4096);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = Config::from_toml_str("max_concurrent_pages = 0\nmax_concurrent_reviews = 0").unwrap();
        assert_eq!(config.max_concurrent_pages, 1);
        assert_eq!(config.max_concurrent_reviews, 1);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(Config::from_toml_str("max_concurrent_pages = \"many\"").is_err());
    }
}
