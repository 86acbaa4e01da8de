// src/error.rs

use serde::Serialize;
use thiserror::Error;

/// **整场竞价级别的致命错误**
/// 出现这些错误时直接中止本次竞价，调用方只会拿到一个错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    /// 请求结构不合法，无法解析出合作方
    #[error("{0}")]
    InvalidRequest(String),

    /// 扣除预留时间后剩余预算不足
    #[error("Auction timeout budget exhausted: {0}")]
    DeadlineExhausted(String),

    /// 品牌类目映射的前置条件失败（例如 primary ad server 未识别）
    #[error("{0}")]
    CategoryMapping(String),

    /// 隐私执行服务失败，错误信息原样透传
    #[error("{0}")]
    Privacy(String),

    #[error("Response assembly failed: {0}")]
    Assembly(String),
}

impl AuctionError {
    /// HTTP 层使用的状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AuctionError::InvalidRequest(_) | AuctionError::CategoryMapping(_) => 400,
            AuctionError::DeadlineExhausted(_) => 503,
            AuctionError::Privacy(_) | AuctionError::Assembly(_) => 500,
        }
    }
}

/// 合作方错误分类，对应响应 ext.errors 中的 code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerErrorKind {
    Timeout,
    BadInput,
    BadServerResponse,
    FailedToRequestBids,
    Generic,
}

impl PartnerErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            PartnerErrorKind::Timeout => 1,
            PartnerErrorKind::BadInput => 2,
            PartnerErrorKind::BadServerResponse => 3,
            PartnerErrorKind::FailedToRequestBids => 4,
            PartnerErrorKind::Generic => 999,
        }
    }
}

/// **单个合作方 / 单个出价级别的非致命错误**
/// 只会挂到所属合作方的错误列表上，不会中断竞价。
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct PartnerError {
    pub kind: PartnerErrorKind,
    pub message: String,
}

impl PartnerError {
    pub fn new(kind: PartnerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(PartnerErrorKind::Generic, message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(PartnerErrorKind::BadInput, message)
    }

    pub fn bad_server_response(message: impl Into<String>) -> Self {
        Self::new(PartnerErrorKind::BadServerResponse, message)
    }

    pub fn failed_to_request(message: impl Into<String>) -> Self {
        Self::new(PartnerErrorKind::FailedToRequestBids, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PartnerErrorKind::Timeout, message)
    }
}

/// 汇率换算失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Unable to convert bid currency {from} to desired ad server currency {to}")]
    NoRate { from: String, to: String },

    #[error("Currency rate from {from} to {to} is zero")]
    ZeroRate { from: String, to: String },

    #[error("Price overflowed while converting {from} to {to}")]
    Overflow { from: String, to: String },
}

/// 类目翻译存储查询失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Lookup(String),

    #[error("Timeout")]
    Timeout,
}

/// 配置加载失败
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
