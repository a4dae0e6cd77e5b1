//! 错误处理模块
//!
//! 定义翻译流水线中使用的错误类型和错误处理机制。

use thiserror::Error;

/// 翻译错误类型
///
/// 包含读取电子书、切分章节、调用翻译服务以及写回电子书时可能出现的各种错误情况。
///
/// # 变体说明
///
/// * `Http` - HTTP请求错误
/// * `RateLimited` - 速率限制错误，唯一可重试的错误
/// * `Api` - API响应错误，包含错误代码和消息
/// * `Parse` - 翻译服务响应解析错误
/// * `Markup` - 章节标记解析错误
/// * `Epub` - EPUB容器结构错误
/// * `Cancelled` - 任务在开始前被取消
#[derive(Debug, Error)]
pub enum TranslationError {
    /// HTTP请求错误
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// 速率限制错误
    #[error("Rate limit error: {0}")]
    RateLimited(String),
    /// API响应错误
    #[error("API error {code}: {message}")]
    Api {
        /// 错误代码
        code: i32,
        /// 错误消息
        message: String,
    },
    /// 解析错误
    #[error("Parse error: {0}")]
    Parse(String),
    /// 标记解析错误
    #[error("Markup error: {0}")]
    Markup(String),
    /// EPUB结构错误
    #[error("EPUB error: {0}")]
    Epub(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
    #[error("Cancelled before the job started")]
    Cancelled,
    /// 自定义错误消息
    #[error("{0}")]
    Custom(String),
}

impl TranslationError {
    /// 是否为速率限制错误（重试循环据此决定是否重试）
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TranslationError::RateLimited(_))
    }
}

impl From<quick_xml::Error> for TranslationError {
    fn from(error: quick_xml::Error) -> Self {
        TranslationError::Markup(error.to_string())
    }
}

impl From<String> for TranslationError {
    fn from(error: String) -> Self {
        TranslationError::Custom(error)
    }
}

impl From<&str> for TranslationError {
    fn from(error: &str) -> Self {
        TranslationError::Custom(error.to_string())
    }
}

/// 翻译结果类型别名
///
/// 简化返回类型，使用 `TranslationError` 作为错误类型。
///
/// # 示例
///
/// ```rust
/// use epub_translator::{Result, TranslationError};
///
/// fn example_function() -> Result<String> {
///     Err(TranslationError::RateLimited("quota exhausted".to_string()))
/// }
///
/// assert!(example_function().unwrap_err().is_rate_limited());
/// ```
pub type Result<T> = std::result::Result<T, TranslationError>;
