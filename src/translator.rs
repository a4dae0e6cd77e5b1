//! 翻译服务核心模块
//!
//! 定义翻译客户端接口，提供基于 Gemini 的实现，以及针对速率限制的固定间隔重试。

use crate::error::{Result, TranslationError};
use crate::types::{
    GeminiConfig, GeminiContent, GeminiErrorResponse, GeminiPart, GenerateContentRequest,
    GenerateContentResponse, PromptContext, RetryConfig,
};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 翻译客户端
///
/// 把一段源语言标记文本翻译成目标语言。速率限制必须以
/// `TranslationError::RateLimited` 返回，调度层只会对这一种错误重试。
pub trait Translator: Send + Sync {
    fn translate(
        &self,
        ctx: &PromptContext,
        chunk: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// 生成系统提示词
///
/// # 示例
///
/// ```rust
/// use epub_translator::{system_prompt, PromptContext};
///
/// let prompt = system_prompt(&PromptContext::new("EN", "PL"));
/// assert!(prompt.starts_with("You are an EN-to-PL translator."));
/// ```
pub fn system_prompt(ctx: &PromptContext) -> String {
    format!(
        "You are an {}-to-{} translator. Keep all special characters and HTML tags as in the source text. Return only {} translation.",
        ctx.source_lang, ctx.target_lang, ctx.target_lang
    )
}

/// 速率限制重试
///
/// 最多执行 `max_attempts` 次（包含第一次），每次速率限制失败后固定等待
/// `delay_secs` 秒。其他错误立即返回，不重试；最后一次仍被限流时返回该错误。
///
/// # 参数
///
/// * `operation` - 要执行的异步操作
/// * `config` - 重试配置
pub async fn retry_on_rate_limit<F, Fut, T>(mut operation: F, config: &RetryConfig) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_rate_limited() && attempt < attempts => {
                warn!(
                    "Rate limit exceeded. Attempt {}/{} failed. Waiting for {} seconds before retrying...",
                    attempt, attempts, config.delay_secs
                );
                sleep(config.delay()).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_rate_limited() {
                    warn!("Rate limit exceeded. All {} attempts failed.", attempts);
                }
                return Err(e);
            }
        }
    }
}

/// Gemini 翻译客户端
///
/// 通过 `generateContent` 接口翻译文本块，系统提示词放在 `systemInstruction` 中。
#[derive(Clone)]
pub struct GeminiTranslator {
    /// HTTP客户端，用于API调用
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiTranslator {
    /// 创建新的 Gemini 客户端
    ///
    /// # 参数
    ///
    /// * `config` - 模型、接口地址和超时设置
    /// * `api_key` - API密钥
    pub fn new(config: GeminiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("epub-translator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

impl Translator for GeminiTranslator {
    async fn translate(&self, ctx: &PromptContext, chunk: &str) -> Result<String> {
        debug!("Sending {} characters to {}", chunk.chars().count(), self.config.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(ctx, chunk))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_response(status, &body)
    }
}

fn build_request(ctx: &PromptContext, chunk: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(system_prompt(ctx)),
            }],
        },
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: Some(chunk.to_string()),
            }],
        }],
    }
}

/// 把HTTP状态和响应体映射为译文或分类后的错误
fn parse_response(status: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&status) {
        let error = serde_json::from_str::<GeminiErrorResponse>(body).ok();
        let exhausted = error
            .as_ref()
            .is_some_and(|e| e.error.status == "RESOURCE_EXHAUSTED");
        let message = error
            .map(|e| e.error.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        return if status == 429 || exhausted {
            Err(TranslationError::RateLimited(message))
        } else {
            Err(TranslationError::Api {
                code: status as i32,
                message,
            })
        };
    }

    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| TranslationError::Parse(format!("invalid generateContent response: {}", e)))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| TranslationError::Parse("response has no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(TranslationError::Parse(format!(
            "empty translation (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}
