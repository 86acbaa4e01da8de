// src/logging/auction_log.rs

use serde::{Deserialize, Serialize};

use crate::error::{AuctionError, PartnerErrorKind};
use crate::logging::runtime_logger::local_timestamp;
use crate::model::partner::PartnerResponse;

/// **竞价汇总日志**
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuctionLog {
    pub timestamp: String,
    pub log_type: String,
    pub request_id: String,
    pub account_id: Option<String>,
    pub tmax_ms: Option<u64>,
    /// 实际分发的合作方数量
    pub partner_attempts: usize,
    /// "success" / "no_bid" / "failure"
    pub status: String,
    pub bid_count: usize,
    pub rejected_count: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub partner_log: Vec<PartnerLog>,
}

/// **单个合作方的调用记录**
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartnerLog {
    pub partner: String,
    pub code: String,
    pub bid_count: usize,
    pub error_count: usize,
    pub response_time_ms: u64,
    /// "success" / "timeout" / "no_fill" / "error"
    pub status: String,
}

impl PartnerLog {
    fn from_response(response: &PartnerResponse) -> Self {
        let status = if !response.bids.is_empty() {
            "success"
        } else if response.errors.iter().any(|e| e.kind == PartnerErrorKind::Timeout) {
            "timeout"
        } else if response.errors.is_empty() {
            "no_fill"
        } else {
            "error"
        };
        Self {
            partner: response.partner.clone(),
            code: response.code.clone(),
            bid_count: response.bids.len(),
            error_count: response.errors.len(),
            response_time_ms: response.response_time_ms,
            status: status.to_string(),
        }
    }
}

impl AuctionLog {
    pub fn new(request_id: &str, account_id: Option<&str>) -> Self {
        Self {
            timestamp: local_timestamp(),
            log_type: "auction".to_string(),
            request_id: request_id.to_string(),
            account_id: account_id.map(str::to_string),
            tmax_ms: None,
            partner_attempts: 0,
            status: "failure".to_string(),
            bid_count: 0,
            rejected_count: 0,
            error: None,
            elapsed_ms: 0,
            partner_log: Vec::new(),
        }
    }

    pub fn add_partner_log(&mut self, response: &PartnerResponse) {
        self.partner_log.push(PartnerLog::from_response(response));
        self.partner_attempts += 1;
    }

    pub fn succeed(&mut self, bid_count: usize, elapsed_ms: u64) {
        self.status = if bid_count > 0 { "success" } else { "no_bid" }.to_string();
        self.bid_count = bid_count;
        self.elapsed_ms = elapsed_ms;
    }

    pub fn fail(&mut self, error: &AuctionError, elapsed_ms: u64) {
        self.status = "failure".to_string();
        self.error = Some(error.to_string());
        self.elapsed_ms = elapsed_ms;
    }

    /// 运行日志使用的级别
    pub fn level(&self) -> &'static str {
        match self.status.as_str() {
            "failure" => "ERROR",
            _ => "INFO",
        }
    }
}
