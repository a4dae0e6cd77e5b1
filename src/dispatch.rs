//! 并行调度模块
//!
//! 固定数量的工作者共享一个任务队列，把所有文本块交给翻译客户端。
//! 结果按任务的全局序号写入结果数组，与完成顺序无关；单个任务失败只影响自己的位置。

use crate::error::{Result, TranslationError};
use crate::translator::{retry_on_rate_limit, Translator};
use crate::types::{Job, PromptContext, RetryConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 协作式取消标记
///
/// 工作者在领取下一个任务前检查该标记；已经发出的请求不会被中断。
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 调度进度，可在运行期间从其他任务读取
#[derive(Debug, Default)]
pub struct DispatchProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// 已结束的任务数（包含失败的任务）
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl DispatchProgress {
    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// 单个失败任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_index: usize,
    pub chapter_number: usize,
    pub error: String,
}

/// 调度结果
///
/// `slots` 与任务列表等长、同序；失败或被跳过的任务对应 `None`。
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub slots: Vec<Option<String>>,
    pub failures: Vec<JobFailure>,
    /// 取消后未被领取的任务数
    pub skipped: usize,
}

struct JobResult {
    index: usize,
    chapter_index: usize,
    result: Result<String>,
}

/// 固定大小的翻译工作池
///
/// # 示例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use epub_translator::{DispatchPool, GeminiTranslator, GeminiConfig, PromptContext, RetryConfig};
///
/// # async fn run(jobs: Vec<epub_translator::Job>) -> epub_translator::Result<()> {
/// let translator = Arc::new(GeminiTranslator::new(GeminiConfig::default(), "key")?);
/// let pool = DispatchPool::new(translator, PromptContext::new("EN", "PL"), RetryConfig::default(), 5);
/// let report = pool.run(jobs, &[1, 2, 3]).await;
/// println!("{} failed", report.failures.len());
/// # Ok(())
/// # }
/// ```
pub struct DispatchPool<T> {
    translator: Arc<T>,
    ctx: PromptContext,
    retry: RetryConfig,
    workers: usize,
    cancel: CancelFlag,
    progress: Arc<DispatchProgress>,
}

impl<T: Translator + 'static> DispatchPool<T> {
    pub fn new(translator: Arc<T>, ctx: PromptContext, retry: RetryConfig, workers: usize) -> Self {
        Self {
            translator,
            ctx,
            retry,
            workers: workers.max(1),
            cancel: CancelFlag::new(),
            progress: Arc::new(DispatchProgress::default()),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 进度句柄，可在 `run` 执行期间轮询
    pub fn progress(&self) -> Arc<DispatchProgress> {
        Arc::clone(&self.progress)
    }

    /// 翻译所有任务
    ///
    /// `chapter_numbers[i]` 是选中列表第 `i` 个章节的章节号，只用于失败日志。
    /// 所有任务都结束（或取消后队列被放弃）才返回，单个失败不会提前终止整个池。
    pub async fn run(&self, jobs: Vec<Job>, chapter_numbers: &[usize]) -> DispatchReport {
        let total = jobs.len();
        self.progress.reset(total);

        let mut report = DispatchReport {
            slots: vec![None; total],
            ..Default::default()
        };
        if total == 0 {
            return report;
        }

        let worker_count = self.workers.min(total);
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<JobResult>();

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let queue = Arc::clone(&queue);
            let result_tx = result_tx.clone();
            let translator = Arc::clone(&self.translator);
            let ctx = self.ctx.clone();
            let retry = self.retry.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                while !cancel.is_cancelled() {
                    let Some(job) = next_job(&queue) else { break };
                    debug!("Worker {} picked up job {}", worker, job.index);
                    let result = translate_job(&translator, &ctx, &retry, &job.content).await;
                    let done = JobResult {
                        index: job.index,
                        chapter_index: job.chapter_index,
                        result,
                    };
                    if result_tx.send(done).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        while let Some(done) = result_rx.recv().await {
            match done.result {
                Ok(text) => {
                    if let Some(slot) = report.slots.get_mut(done.index) {
                        *slot = Some(text);
                    }
                }
                Err(e) => {
                    let chapter_number = chapter_numbers
                        .get(done.chapter_index)
                        .copied()
                        .unwrap_or(done.chapter_index + 1);
                    error!(
                        "Chunk {} (from chapter {}) generated an exception: {}",
                        done.index, chapter_number, e
                    );
                    self.progress.failed.fetch_add(1, Ordering::SeqCst);
                    report.failures.push(JobFailure {
                        job_index: done.index,
                        chapter_number,
                        error: e.to_string(),
                    });
                }
            }
            let completed = self.progress.completed.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Translating all chunks: {}/{}", completed, total);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Translation worker stopped unexpectedly: {}", e);
            }
        }

        report.skipped = queue.lock().map(|q| q.len()).unwrap_or(0);
        if report.skipped > 0 {
            warn!("Cancelled: {} chunks were never sent", report.skipped);
        }
        report.failures.sort_by_key(|f| f.job_index);
        report
    }
}

/// 在独立任务中翻译一个块，客户端 panic 时该块记为失败，工作者继续领取任务
async fn translate_job<T: Translator + 'static>(
    translator: &Arc<T>,
    ctx: &PromptContext,
    retry: &RetryConfig,
    content: &str,
) -> Result<String> {
    let translator = Arc::clone(translator);
    let ctx = ctx.clone();
    let retry = retry.clone();
    let content = content.to_string();
    let task = tokio::spawn(async move {
        retry_on_rate_limit(|| translator.translate(&ctx, &content), &retry).await
    });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(TranslationError::Custom(format!("translation task failed: {}", e))),
    }
}

fn next_job(queue: &Mutex<VecDeque<Job>>) -> Option<Job> {
    queue.lock().ok()?.pop_front()
}
