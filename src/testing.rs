//! 测试用的翻译客户端

use crate::error::{Result, TranslationError};
use crate::translator::Translator;
use crate::types::PromptContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

/// 按文本内容决定行为：含 `FAIL` 的块返回API错误，含 `LIMIT` 的块一直被限流，
/// 含 `slow` 的块耗时更长，含 `PANIC` 的块直接 panic；其余块返回大写文本。
#[derive(Default)]
pub(crate) struct MockTranslator {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl MockTranslator {
    pub fn attempts_for(&self, chunk: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(chunk)
            .copied()
            .unwrap_or(0)
    }
}

impl Translator for MockTranslator {
    async fn translate(&self, _ctx: &PromptContext, chunk: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(chunk.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = if chunk.contains("slow") { 500 } else { 10 };
        sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if chunk.contains("PANIC") {
            panic!("translator crashed on {chunk}");
        }
        if chunk.contains("FAIL") {
            Err(TranslationError::Api {
                code: 500,
                message: "internal".to_string(),
            })
        } else if chunk.contains("LIMIT") {
            Err(TranslationError::RateLimited("quota".to_string()))
        } else {
            Ok(chunk.to_uppercase())
        }
    }
}
