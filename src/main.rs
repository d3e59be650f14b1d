use anyhow::{Context, Result};
use checklist_review::infrastructure::{FsBlobStore, MemoryRepository, OpenAiLlmClient};
use checklist_review::utils::logging;
use checklist_review::{Collaborators, Config, StageHandler};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// 从标准输入读取阶段请求（单个对象或数组），逐个执行，把响应数组写到标准输出
#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("读取标准输入失败")?;
    let requests = match serde_json::from_str::<Value>(&input).context("标准输入不是合法的 JSON")? {
        Value::Array(requests) => requests,
        single => vec![single],
    };

    let repository = Arc::new(MemoryRepository::new());
    let handler = StageHandler::new(Collaborators {
        blobs: Arc::new(FsBlobStore::new(&config.blob_root)),
        llm: Arc::new(OpenAiLlmClient::new(&config)),
        checklists: repository.clone(),
        reviews: repository,
        config,
    });

    let mut responses = Vec::with_capacity(requests.len());
    for request in requests {
        responses.push(handler.handle_json(request).await);
    }

    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}
