//! 类型定义模块
//!
//! 定义翻译流水线中使用的所有数据结构和配置类型。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 翻译配置
///
/// 控制语言对、切块大小和并发度。
///
/// # 字段说明
///
/// * `source_lang` - 源语言代码
/// * `target_lang` - 目标语言代码
/// * `max_chunk_size` - 单个文本块的最大字符数
/// * `workers` - 并发翻译的工作者数量
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// 源语言代码
    pub source_lang: String,
    /// 目标语言代码
    pub target_lang: String,
    /// 单个文本块的最大字符数
    pub max_chunk_size: usize,
    /// 并发翻译的工作者数量
    pub workers: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_lang: "EN".to_string(),
            target_lang: "PL".to_string(),
            max_chunk_size: 10_000,
            workers: 5,
        }
    }
}

/// 速率限制重试配置
///
/// 仅在翻译服务返回速率限制错误时生效，两次尝试之间固定等待 `delay_secs` 秒。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_secs: 60,
        }
    }
}

/// Gemini 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API密钥，环境变量 `GEMINI_API_KEY` 优先
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-pro".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 300,
        }
    }
}

/// 提示词上下文：翻译的语言对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub source_lang: String,
    pub target_lang: String,
}

impl PromptContext {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: GeminiContent,
    pub contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiErrorResponse {
    pub error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct GeminiErrorBody {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// 文档条目的句柄（在 `Document` 条目列表中的位置）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub usize);

/// 被选中的章节
///
/// `number` 按文档顺序只对章节类条目计数，从1开始。
#[derive(Debug, Clone)]
pub struct Chapter {
    pub number: usize,
    pub content: String,
    pub item: ItemId,
}

/// 一个待翻译的文本块
///
/// `index` 是全局序号，同时也是结果数组中的位置；
/// `chapter_index` 指向选中章节列表中的位置，而不是章节号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub index: usize,
    pub chapter_index: usize,
    pub content: String,
}

/// 单个章节的回写结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// 所有文本块都翻译成功
    Translated,
    /// 部分文本块失败，章节内容仅由成功的部分拼接
    Partial { failed_chunks: usize },
    /// 没有任何可用译文，章节保持原文
    Untranslated,
}
