//! 翻译流水线
//!
//! 章节选择 → 切块展开为全局任务列表 → 并行翻译 → 按章节重新组装并写回文档。

use crate::chunker::split_markup;
use crate::config::TranslatorConfig;
use crate::dispatch::{CancelFlag, DispatchPool};
use crate::document::{select_chapters, Document};
use crate::error::{Result, TranslationError};
use crate::translator::Translator;
use crate::types::{Chapter, ChapterOutcome, Job, PromptContext, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 一次翻译运行的参数
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// 起始章节号（闭区间）
    pub from_chapter: usize,
    /// 结束章节号（闭区间）
    pub to_chapter: usize,
    pub ctx: PromptContext,
    pub max_chunk_size: usize,
    pub workers: usize,
    pub retry: RetryConfig,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

impl TranslateOptions {
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            from_chapter: 0,
            to_chapter: 9999,
            ctx: PromptContext::new(
                config.translation.source_lang.clone(),
                config.translation.target_lang.clone(),
            ),
            max_chunk_size: config.translation.max_chunk_size,
            workers: config.translation.workers,
            retry: config.retry.clone(),
        }
    }
}

/// 翻译运行摘要
#[derive(Debug, Clone, Default)]
pub struct TranslationSummary {
    pub chapters_total: usize,
    pub chapters_selected: usize,
    pub jobs_total: usize,
    pub jobs_failed: usize,
    /// 每个选中章节的 (章节号, 结果)
    pub outcomes: Vec<(usize, ChapterOutcome)>,
}

/// 把选中的章节展开为全局有序的任务列表
///
/// 返回任务列表和每个章节的块数（与章节顺序一致）。相同输入总是得到相同的任务序列。
/// 章节标记无法解析时整章作为一个块，避免章节被悄悄丢掉。
pub fn flatten(chapters: &[Chapter], max_chunk_size: usize) -> (Vec<Job>, Vec<usize>) {
    let mut jobs = Vec::new();
    let mut chunk_counts = Vec::with_capacity(chapters.len());

    for (chapter_index, chapter) in chapters.iter().enumerate() {
        let chunks = split_markup(&chapter.content, max_chunk_size).unwrap_or_else(|e| {
            warn!(
                "Chapter {} could not be split ({}); sending it as one chunk",
                chapter.number, e
            );
            if chapter.content.is_empty() {
                Vec::new()
            } else {
                vec![chapter.content.clone()]
            }
        });

        chunk_counts.push(chunks.len());
        for content in chunks {
            jobs.push(Job {
                index: jobs.len(),
                chapter_index,
                content,
            });
        }
    }

    (jobs, chunk_counts)
}

/// 按章节重新组装译文并写回文档
///
/// 用 `chunk_counts` 把结果数组切成每章一段连续的区间，成功的块按原顺序以单个空格连接，
/// 失败的块直接跳过。拼接结果非空时替换章节内容，否则保留原文。
pub fn reassemble(
    document: &mut Document,
    chapters: &mut [Chapter],
    chunk_counts: &[usize],
    slots: &[Option<String>],
) -> Result<Vec<ChapterOutcome>> {
    let expected: usize = chunk_counts.iter().sum();
    if chunk_counts.len() != chapters.len() || expected != slots.len() {
        return Err(TranslationError::Custom(format!(
            "cannot reassemble {} results into {} chapters expecting {} chunks",
            slots.len(),
            chapters.len(),
            expected
        )));
    }

    let mut outcomes = Vec::with_capacity(chapters.len());
    let mut start = 0;
    for (chapter, &count) in chapters.iter_mut().zip(chunk_counts) {
        let end = start + count;
        let translated: Vec<&str> = slots[start..end].iter().flatten().map(String::as_str).collect();
        let failed = count - translated.len();
        let joined = translated.join(" ");
        start = end;

        let outcome = if joined.is_empty() {
            if count > 0 {
                warn!(
                    "Chapter {}: all {} chunks failed, keeping the original text",
                    chapter.number, count
                );
            }
            ChapterOutcome::Untranslated
        } else {
            document.replace_content(chapter.item, joined.clone().into_bytes())?;
            chapter.content = joined;
            if failed == 0 {
                ChapterOutcome::Translated
            } else {
                warn!(
                    "Chapter {}: {} of {} chunks failed, the chapter is only partially translated",
                    chapter.number, failed, count
                );
                ChapterOutcome::Partial { failed_chunks: failed }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// 翻译文档中选定范围的章节
///
/// 取消后不会写回任何结果，返回 `TranslationError::Cancelled`。
pub async fn translate_document<T: Translator + 'static>(
    document: &mut Document,
    translator: Arc<T>,
    options: &TranslateOptions,
    cancel: CancelFlag,
) -> Result<TranslationSummary> {
    let mut chapters = select_chapters(document, options.from_chapter, options.to_chapter);
    let chapters_total = document.chapter_count();
    info!(
        "Found {} chapters to translate out of {}.",
        chapters.len(),
        chapters_total
    );

    let (jobs, chunk_counts) = flatten(&chapters, options.max_chunk_size);
    let jobs_total = jobs.len();
    info!("Total chunks to translate: {}", jobs_total);

    let chapter_numbers: Vec<usize> = chapters.iter().map(|c| c.number).collect();
    let pool = DispatchPool::new(
        translator,
        options.ctx.clone(),
        options.retry.clone(),
        options.workers,
    )
    .with_cancel(cancel.clone());
    let report = pool.run(jobs, &chapter_numbers).await;

    if cancel.is_cancelled() {
        return Err(TranslationError::Cancelled);
    }

    let outcomes = reassemble(document, &mut chapters, &chunk_counts, &report.slots)?;

    Ok(TranslationSummary {
        chapters_total,
        chapters_selected: chapters.len(),
        jobs_total,
        jobs_failed: report.failures.len(),
        outcomes: chapter_numbers.into_iter().zip(outcomes).collect(),
    })
}

/// 读取EPUB、翻译、写出新的EPUB
pub async fn translate_book<T: Translator + 'static>(
    input: &Path,
    output: &Path,
    translator: Arc<T>,
    options: &TranslateOptions,
    cancel: CancelFlag,
) -> Result<TranslationSummary> {
    let mut document = Document::read_epub(input)?;
    let summary = translate_document(&mut document, translator, options, cancel).await?;
    document.write_epub(output)?;
    Ok(summary)
}
