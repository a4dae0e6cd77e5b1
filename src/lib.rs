//! # EPUB Translator
//!
//! 用 Gemini 逐章翻译 EPUB 电子书，保留标记结构和章节边界。
//!
//! ## 主要特性
//!
//! - **按元素切块**: 章节只在顶层元素之间切分，单个元素不会被拆开
//! - **并行翻译**: 所有选中章节的文本块进入同一个固定大小的工作池
//! - **速率限制重试**: 被限流的请求按固定间隔重试，其他错误立即失败
//! - **按序重组**: 结果按全局序号写回，与完成顺序无关；失败的块被跳过
//! - **配置灵活**: 支持TOML配置文件和环境变量
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use epub_translator::{translate_book, CancelFlag, GeminiTranslator, TranslateOptions, TranslatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TranslatorConfig::from_file("epub-translator.toml")?;
//!     let translator = Arc::new(GeminiTranslator::new(config.gemini.clone(), config.api_key()?)?);
//!
//!     let options = TranslateOptions::from_config(&config);
//!     let summary = translate_book(
//!         Path::new("book.epub"),
//!         Path::new("book.pl.epub"),
//!         translator,
//!         &options,
//!         CancelFlag::new(),
//!     )
//!     .await?;
//!     println!("{} of {} chunks failed", summary.jobs_failed, summary.jobs_total);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 配置文件支持
//!
//! ```toml
//! [gemini]
//! api_key = "..."
//! model = "gemini-2.5-pro"
//!
//! [translation]
//! source_lang = "EN"
//! target_lang = "PL"
//! max_chunk_size = 10000
//! workers = 5
//!
//! [retry]
//! max_attempts = 5
//! delay_secs = 60
//! ```

pub mod chunker;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod translator;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TranslatorConfig;
pub use dispatch::{CancelFlag, DispatchPool, DispatchProgress, DispatchReport, JobFailure, ProgressSnapshot};
pub use document::{chapter_previews, select_chapters, ChapterPreview, Document, DocumentItem, ItemKind};
pub use error::{Result, TranslationError};
pub use pipeline::{flatten, reassemble, translate_book, translate_document, TranslateOptions, TranslationSummary};
pub use translator::{retry_on_rate_limit, system_prompt, GeminiTranslator, Translator};
pub use types::{
    Chapter, ChapterOutcome, GeminiConfig, ItemId, Job, PromptContext, RetryConfig,
    TranslationConfig,
};
