// src/auction/privacy.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AuctionError;
use crate::openrtb::request::{BidRequest, User};

/// **隐私执行结果（单个合作方）**
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivacyDecision {
    pub partner: String,
    /// 被阻止的合作方不会收到请求
    pub blocked: bool,
    /// 为 true 时用下面的 user / device 替换请求中的原值
    pub masked: bool,
    pub user: Option<User>,
    pub device: Option<Value>,
}

impl PrivacyDecision {
    pub fn allow(partner: &str) -> Self {
        Self {
            partner: partner.to_string(),
            ..Self::default()
        }
    }

    pub fn block(partner: &str) -> Self {
        Self {
            partner: partner.to_string(),
            blocked: true,
            ..Self::default()
        }
    }
}

/// 隐私 / 同意执行服务
/// 失败时整场竞价失败，错误信息原样返回给调用方。
#[async_trait]
pub trait PrivacyEnforcement: Send + Sync {
    async fn enforce(&self, request: &BidRequest, partners: &[String]) -> Result<Vec<PrivacyDecision>, AuctionError>;
}

/// 默认实现：不做任何限制
pub struct PassThroughPrivacy;

#[async_trait]
impl PrivacyEnforcement for PassThroughPrivacy {
    async fn enforce(&self, _request: &BidRequest, partners: &[String]) -> Result<Vec<PrivacyDecision>, AuctionError> {
        Ok(partners.iter().map(|partner| PrivacyDecision::allow(partner)).collect())
    }
}
