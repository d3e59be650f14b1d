/// 日志工具模块
///
/// 提供日志初始化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::ReviewJobStats;

/// 初始化 tracing
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info。重复调用不会报错。
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 清单抽取与审查流水线");
    info!("📊 页面并发数: {}，审查并发数: {}", config.max_concurrent_pages, config.max_concurrent_reviews);
    info!("🤖 模型: {}，输出语言: {}", config.llm_model_name, config.output_language);
    info!("{}", "=".repeat(60));
}

/// 打印审查任务统计
pub fn print_review_stats(review_job_id: &str, stats: &ReviewJobStats) {
    info!("\n{}", "=".repeat(60));
    info!("📊 审查任务 {} 统计", review_job_id);
    info!("✅ 通过: {}/{}", stats.passed, stats.total);
    info!("❌ 不通过: {}", stats.failed);
    info!("⚠️ 审查出错: {}", stats.errored);
    info!("⏳ 未完成: {}", stats.pending);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
