// src/model/partner.rs

use proptest::prelude::*;
use proptest::strategy::ValueTree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auction::multibid::MultiBidConfig;
use crate::bidding::deadline::Deadline;
use crate::error::{ConfigError, PartnerError};
use crate::model::bid::Bid;
use crate::openrtb::request::BidRequest;

fn default_currency() -> String {
    "USD".to_string()
}

fn default_adapter() -> String {
    "openrtb".to_string()
}

fn default_enabled() -> bool {
    true
}

/// **合作方（需求方）基础信息**
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartnerConfig {
    pub id: u64,
    /// 合作方编码，别名最终解析到这里
    pub name: String,
    /// 竞价 API 地址
    pub endpoint: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单个合作方自己的超时（毫秒），只能缩短共享截止时间
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// 出价未声明币种时使用
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// 使用哪个协议适配器
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl PartnerConfig {
    pub fn new(id: u64, name: &str, endpoint: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            enabled: true,
            timeout_ms: None,
            default_currency: default_currency(),
            adapter: default_adapter(),
        }
    }
}

/// **合作方目录**，按名称索引
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartnerCatalog {
    pub partners: HashMap<String, PartnerConfig>,
}

impl PartnerCatalog {
    pub fn new() -> Self {
        Self {
            partners: HashMap::new(),
        }
    }

    pub fn from_partners(partners: Vec<PartnerConfig>) -> Self {
        let mut catalog = Self::new();
        for partner in partners {
            catalog.add_partner(partner);
        }
        catalog
    }

    pub fn add_partner(&mut self, partner: PartnerConfig) {
        self.partners.insert(partner.name.clone(), partner);
    }

    pub fn get(&self, name: &str) -> Option<&PartnerConfig> {
        self.partners.get(name)
    }

    /// 把请求里出现的名称解析为合作方编码：先按编码直接匹配，再查别名表
    pub fn resolve(&self, name: &str, aliases: Option<&HashMap<String, String>>) -> Option<&PartnerConfig> {
        self.partners.get(name).or_else(|| {
            aliases
                .and_then(|aliases| aliases.get(name))
                .and_then(|code| self.partners.get(code))
        })
    }

    pub fn active_partners(&self) -> Vec<PartnerConfig> {
        self.partners.values().filter(|p| p.enabled).cloned().collect()
    }
}

/// **单个合作方视角下的请求**
/// 由 RequestScoper 生成，之后只归 Dispatcher 的任务所有，不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerRequest {
    /// 请求中使用的名称（可能是别名）
    pub partner: String,
    /// 解析后的合作方编码
    pub code: String,
    pub request: BidRequest,
    pub multibid: Option<MultiBidConfig>,
    pub deadline: Deadline,
}

/// **一次分发的结果**
/// 同一编码的多个别名各自拥有独立的 PartnerResponse，不合并。
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerResponse {
    pub partner: String,
    pub code: String,
    pub bids: Vec<Bid>,
    pub errors: Vec<PartnerError>,
    pub response_time_ms: u64,
}

impl PartnerResponse {
    pub fn new(partner: &str, code: &str, bids: Vec<Bid>, errors: Vec<PartnerError>, response_time_ms: u64) -> Self {
        Self {
            partner: partner.to_string(),
            code: code.to_string(),
            bids,
            errors,
            response_time_ms,
        }
    }

    /// 失败的合作方：零出价 + 一条错误
    pub fn failed(partner: &str, code: &str, error: PartnerError, response_time_ms: u64) -> Self {
        Self::new(partner, code, Vec::new(), vec![error], response_time_ms)
    }
}

/// 使用 proptest 生成随机的合作方
/// endpoint 固定指向本地 mock 服务；timeout 在 [100, 1000) 范围内；
/// 名称由 "[a-z]{5,12}" 生成后追加 "_partner"
fn generate_partner(endpoint: String) -> impl Strategy<Value = PartnerConfig> {
    (
        "[a-z]{5,12}".prop_map(|s| format!("{}_partner", s)),
        any::<bool>(),
        prop::option::of(100..1000u64),
        prop::sample::select(vec!["USD", "EUR", "GBP"]),
    )
        .prop_map(move |(name, enabled, timeout_ms, currency)| PartnerConfig {
            id: 0,
            name,
            endpoint: endpoint.clone(),
            enabled,
            timeout_ms,
            default_currency: currency.to_string(),
            adapter: default_adapter(),
        })
}

/// 生成 3~6 个合作方，至少一个启用，id 从 1 开始顺序分配
fn generate_catalog(endpoint: String) -> impl Strategy<Value = PartnerCatalog> {
    prop::collection::vec(generate_partner(endpoint), 3..6).prop_map(|mut partners| {
        if !partners.iter().any(|p| p.enabled) {
            if let Some(first) = partners.first_mut() {
                first.enabled = true;
            }
        }
        for (i, partner) in partners.iter_mut().enumerate() {
            partner.id = (i as u64) + 1;
        }
        PartnerCatalog::from_partners(partners)
    })
}

/// 演示模式：随机生成一个指向 mock 合作方的目录
pub fn demo_catalog(endpoint: &str) -> Result<PartnerCatalog, ConfigError> {
    let mut runner = proptest::test_runner::TestRunner::default();
    let catalog = generate_catalog(endpoint.to_string())
        .new_tree(&mut runner)
        .map_err(|reason| ConfigError::Invalid(format!("unable to generate demo catalog: {}", reason)))?
        .current();

    for partner in catalog.partners.values() {
        tracing::info!(
            partner = %partner.name,
            enabled = partner.enabled,
            timeout_ms = ?partner.timeout_ms,
            currency = %partner.default_currency,
            "demo partner generated"
        );
    }
    Ok(catalog)
}
