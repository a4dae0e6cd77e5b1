//! 配置管理模块
//!
//! 提供TOML配置文件的读取、写入和自动发现功能。

use crate::error::{Result, TranslationError};
use crate::types::{GeminiConfig, RetryConfig, TranslationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 覆盖配置文件中API密钥的环境变量
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// 翻译器配置结构
///
/// 包含翻译服务、语言对和重试策略的全部配置，支持从TOML文件加载和保存。
///
/// # 示例
///
/// ```rust,no_run
/// use epub_translator::TranslatorConfig;
///
/// // 从默认位置加载配置
/// let config = TranslatorConfig::load_from_default_locations();
///
/// // 从指定文件加载配置
/// let config = TranslatorConfig::from_file("config.toml").unwrap();
///
/// // 保存配置到文件
/// config.save_to_file("output.toml").unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Gemini 服务配置
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// 翻译配置
    #[serde(default)]
    pub translation: TranslationConfig,
    /// 重试配置
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TranslatorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| TranslationError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TranslationError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from multiple possible locations
    pub fn load_from_default_locations() -> Self {
        let possible_paths = [
            "epub-translator.toml",
            "config.toml",
            ".epub-translator.toml",
        ];

        for path in &possible_paths {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        info!("Loaded configuration from: {}", path);
                        return config;
                    }
                    Err(e) => {
                        warn!("Failed to load config from {}: {}", path, e);
                    }
                }
            }
        }

        info!("No configuration file found, using defaults");
        Self::default()
    }

    /// Generate example configuration file
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let mut example_config = Self::default();
        example_config.gemini.api_key = "your-api-key".to_string();
        example_config.save_to_file(path)
    }

    /// 解析API密钥：环境变量优先，其次是配置文件
    pub fn api_key(&self) -> Result<String> {
        let from_env = std::env::var(API_KEY_ENV).ok();
        resolve_api_key(from_env, &self.gemini.api_key)
    }
}

fn resolve_api_key(from_env: Option<String>, from_file: &str) -> Result<String> {
    from_env
        .filter(|key| !key.trim().is_empty())
        .or_else(|| Some(from_file.trim().to_string()).filter(|key| !key.is_empty()))
        .ok_or_else(|| {
            TranslationError::Config(format!(
                "missing Gemini API key: set gemini.api_key or {}",
                API_KEY_ENV
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: TranslatorConfig = toml::from_str(
            r#"
            [gemini]
            api_key = "secret"

            [translation]
            target_lang = "DE"
            "#,
        )
        .unwrap();

        assert_eq!(config.gemini.api_key, "secret");
        assert_eq!(config.gemini.model, "gemini-2.5-pro");
        assert_eq!(config.translation.source_lang, "EN");
        assert_eq!(config.translation.target_lang, "DE");
        assert_eq!(config.translation.max_chunk_size, 10_000);
        assert_eq!(config.translation.workers, 5);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_secs, 60);
    }

    #[test]
    fn example_config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epub-translator.toml");
        TranslatorConfig::generate_example_config(&path).unwrap();

        let loaded = TranslatorConfig::from_file(&path).unwrap();
        assert_eq!(loaded.gemini.api_key, "your-api-key");
        assert_eq!(loaded.retry.max_attempts, 5);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[gemini\napi_key = ").unwrap();

        let err = TranslatorConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, TranslationError::Config(_)));
    }

    #[test]
    fn env_key_wins_over_file_key() {
        let key = resolve_api_key(Some("from-env".into()), "from-file").unwrap();
        assert_eq!(key, "from-env");

        let key = resolve_api_key(Some("  ".into()), "from-file").unwrap();
        assert_eq!(key, "from-file");

        assert!(resolve_api_key(None, "").is_err());
    }
}
