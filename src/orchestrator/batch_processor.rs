//! 有界并发处理器 - 编排层
//!
//! ## 职责
//!
//! 把一组相互独立的任务（单页抽取 / 单项目审查）并发执行，
//! 用 Semaphore 限制同时运行的数量，并按输入顺序汇总每个任务的结果。
//!
//! ## 设计特点
//!
//! - **失败隔离**：单个任务失败不会取消其他已派发的任务
//! - **并发安全**：通过 Semaphore 和 tokio::spawn 实现并发
//! - **只做调度**：任务本身的业务逻辑由调用方传入

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::error::PipelineError;

/// 一批任务的执行结果，保持输入顺序
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<Result<T, PipelineError>>,
}

impl<T> BatchReport<T> {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// 全部成功时返回结果列表，否则返回第一个失败
    pub fn into_all(self) -> Result<Vec<T>, PipelineError> {
        self.outcomes.into_iter().collect()
    }
}

/// 以最多 `limit` 个并发执行 `task`
pub async fn run_bounded<I, T, F, Fut>(label: &str, inputs: Vec<I>, limit: usize, task: F) -> BatchReport<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
{
    let total = inputs.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    info!("📦 {}: 共 {} 个任务，并发上限 {}", label, total, limit.max(1));

    let mut handles = Vec::with_capacity(total);
    for input in inputs {
        let semaphore = semaphore.clone();
        let future = task(input);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|e| PipelineError::Task {
                task: "semaphore".to_string(),
                reason: e.to_string(),
            })?;
            future.await
        }));
    }

    let outcomes: Vec<Result<T, PipelineError>> = join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| {
            let outcome = joined.map_err(PipelineError::from).and_then(|result| result);
            if let Err(e) = &outcome {
                error!("{} 第 {} 个任务失败: {}", label, index + 1, e);
            }
            outcome
        })
        .collect();

    let report = BatchReport { outcomes };
    info!(
        "✓ {} 完成: 成功 {}/{}，失败 {}",
        label,
        report.success_count(),
        total,
        report.failure_count()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_respects_limit_and_keeps_order() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = run_bounded("test", (0..10).collect(), 3, |n: usize| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(n * 2)
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(report.into_all().unwrap(), (0..10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let report = run_bounded("test", vec![1, 2, 3], 2, |n: u32| async move {
            if n == 2 {
                Err(PipelineError::InvalidRequest("two".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failure_count(), 1);
        assert!(report.outcomes[1].is_err());
        assert!(report.into_all().is_err());
    }
}
