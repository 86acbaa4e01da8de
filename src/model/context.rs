// src/model/context.rs

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

fn default_instant() -> Instant {
    Instant::now()
}

/// **单次竞价的调用上下文**
/// 由 HTTP 层创建，贯穿整个竞价流程。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuctionContext {
    /// 发起请求的账户（日志用）
    pub account_id: Option<String>,
    /// 请求开始时间，用于计算截止时间和总耗时（不参与序列化）
    #[serde(skip, default = "default_instant")]
    pub start_time: Instant,
    /// 调用方显式指定的超时，优先于 request.tmax
    pub timeout_ms: Option<u64>,
}

impl AuctionContext {
    pub fn new(account_id: Option<String>) -> Self {
        Self {
            account_id,
            start_time: Instant::now(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

impl Default for AuctionContext {
    fn default() -> Self {
        Self::new(None)
    }
}
