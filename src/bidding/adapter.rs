// src/bidding/adapter.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PartnerError;
use crate::model::bid::{Bid, MediaType, VideoInfo};
use crate::model::partner::{PartnerConfig, PartnerRequest};
use crate::openrtb::request::Imp;
use crate::openrtb::response::{self, BidResponse};

/// 发往合作方的一次 HTTP 调用
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// 本次调用覆盖的 imp
    pub imp_ids: Vec<String>,
}

/// 合作方返回的原始 HTTP 响应
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// **合作方协议适配器**
/// 每个合作方一个无状态实现，按名称在 AdapterRegistry 中查找。
pub trait PartnerAdapter: Send + Sync {
    fn make_requests(&self, request: &PartnerRequest, partner: &PartnerConfig) -> (Vec<HttpCall>, Vec<PartnerError>);

    fn make_bids(&self, request: &PartnerRequest, call: &HttpCall, reply: &HttpReply) -> Result<Vec<Bid>, PartnerError>;
}

/// 按名称索引的适配器注册表
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PartnerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置 openrtb 适配器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openrtb", Arc::new(OpenRtbAdapter));
        registry
    }

    pub fn register(&mut self, name: &str, adapter: Arc<dyn PartnerAdapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PartnerAdapter>> {
        self.adapters.get(name).cloned()
    }
}

/// 默认适配器：把限定后的请求原样以 JSON POST 出去，按标准 OpenRTB 解析返回
pub struct OpenRtbAdapter;

impl OpenRtbAdapter {
    fn media_type(bid: &response::Bid, imp: Option<&Imp>) -> MediaType {
        let declared = bid
            .ext
            .as_ref()
            .and_then(|ext| ext.pointer("/prebid/type"))
            .and_then(|t| t.as_str())
            .and_then(|t| MediaType::try_from(t).ok());
        if let Some(media_type) = declared {
            return media_type;
        }

        match imp {
            Some(imp) if imp.banner.is_some() => MediaType::Banner,
            Some(imp) if imp.video.is_some() => MediaType::Video,
            Some(imp) if imp.native.is_some() => MediaType::Native,
            Some(imp) if imp.audio.is_some() => MediaType::Audio,
            _ => MediaType::Banner,
        }
    }

    fn video_info(bid: &response::Bid) -> Option<VideoInfo> {
        let video_ext = bid.ext.as_ref().and_then(|ext| ext.pointer("/prebid/video"));
        let duration = bid.dur.or_else(|| {
            video_ext
                .and_then(|v| v.get("duration"))
                .and_then(|d| d.as_u64())
                .map(|d| u32::try_from(d).unwrap_or(u32::MAX))
        });
        let primary_category = video_ext
            .and_then(|v| v.get("primary_category"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        if duration.is_none() && primary_category.is_none() {
            return None;
        }
        Some(VideoInfo {
            duration,
            primary_category,
        })
    }

    fn to_bid(bid: response::Bid, currency: Option<&str>, imp: Option<&Imp>) -> Bid {
        let media_type = Self::media_type(&bid, imp);
        let video = if media_type == MediaType::Video {
            Self::video_info(&bid)
        } else {
            None
        };

        Bid {
            currency: currency.map(str::to_string),
            media_type,
            categories: bid.cat,
            video,
            adm: bid.adm,
            deal_id: bid.dealid,
            adomain: bid.adomain,
            crid: bid.crid,
            w: bid.w,
            h: bid.h,
            ext: bid.ext,
            ..Bid::new(&bid.id, &bid.impid, bid.price, media_type)
        }
    }
}

impl PartnerAdapter for OpenRtbAdapter {
    fn make_requests(&self, request: &PartnerRequest, partner: &PartnerConfig) -> (Vec<HttpCall>, Vec<PartnerError>) {
        match serde_json::to_vec(&request.request) {
            Ok(body) => (
                vec![HttpCall {
                    method: "POST".to_string(),
                    uri: partner.endpoint.clone(),
                    headers: vec![
                        ("Content-Type".to_string(), "application/json;charset=utf-8".to_string()),
                        ("Accept".to_string(), "application/json".to_string()),
                        ("x-openrtb-version".to_string(), "2.5".to_string()),
                    ],
                    body,
                    imp_ids: request.request.imp.iter().map(|imp| imp.id.clone()).collect(),
                }],
                Vec::new(),
            ),
            Err(e) => (Vec::new(), vec![PartnerError::bad_input(e.to_string())]),
        }
    }

    fn make_bids(&self, request: &PartnerRequest, _call: &HttpCall, reply: &HttpReply) -> Result<Vec<Bid>, PartnerError> {
        match reply.status {
            204 => return Ok(Vec::new()),
            200 => {}
            400 => {
                return Err(PartnerError::bad_input(format!(
                    "Unexpected status code: {}. Run with request.test = 1 for more info",
                    reply.status
                )))
            }
            status => {
                return Err(PartnerError::bad_server_response(format!(
                    "Unexpected status code: {}. Run with request.test = 1 for more info",
                    status
                )))
            }
        }

        let response: BidResponse = serde_json::from_slice(&reply.body)
            .map_err(|e| PartnerError::bad_server_response(format!("Failed to decode: {}", e)))?;

        let currency = response.cur.clone();
        let bids = response
            .seatbid
            .into_iter()
            .flat_map(|seatbid| seatbid.bid)
            .map(|bid| {
                let imp = request.request.find_imp(&bid.impid);
                Self::to_bid(bid, currency.as_deref(), imp)
            })
            .collect();
        Ok(bids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidding::deadline::Deadline;
    use crate::openrtb::request::BidRequest;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::time::Instant;

    fn partner_request() -> PartnerRequest {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req",
            "imp": [
                {"id": "imp-banner", "banner": {"w": 300, "h": 250}, "ext": {"bidder": {}}},
                {"id": "imp-video", "video": {"mimes": ["video/mp4"]}, "ext": {"bidder": {}}}
            ]
        }))
        .unwrap();
        PartnerRequest {
            partner: "rubicon".to_string(),
            code: "rubicon".to_string(),
            request,
            multibid: None,
            deadline: Deadline::from_tmax(Instant::now(), 500),
        }
    }

    fn call() -> HttpCall {
        let request = partner_request();
        let partner = PartnerConfig::new(1, "rubicon", "http://localhost/bid");
        let (calls, errors) = OpenRtbAdapter.make_requests(&request, &partner);
        assert!(errors.is_empty());
        calls.into_iter().next().unwrap()
    }

    #[test]
    fn test_make_requests_posts_scoped_request() {
        let call = call();
        assert_eq!(call.method, "POST");
        assert_eq!(call.uri, "http://localhost/bid");
        assert_eq!(call.imp_ids, vec!["imp-banner", "imp-video"]);
        let body: serde_json::Value = serde_json::from_slice(&call.body).unwrap();
        assert_eq!(body["id"], json!("req"));
    }

    #[test]
    fn test_make_bids_infers_media_type_and_duration() {
        let body = json!({
            "id": "req",
            "cur": "EUR",
            "seatbid": [{"bid": [
                {"id": "b1", "impid": "imp-banner", "price": 1.25},
                {"id": "b2", "impid": "imp-video", "price": 10, "dur": 30, "cat": ["IAB1-1"]},
                {"id": "b3", "impid": "imp-banner", "price": 2, "ext": {"prebid": {"type": "video", "video": {"duration": 15, "primary_category": "cars"}}}}
            ]}]
        });
        let reply = HttpReply {
            status: 200,
            body: serde_json::to_vec(&body).unwrap(),
        };

        let bids = OpenRtbAdapter.make_bids(&partner_request(), &call(), &reply).unwrap();

        assert_eq!(bids.len(), 3);
        assert_eq!(bids[0].media_type, MediaType::Banner);
        assert_eq!(bids[0].price, dec!(1.25));
        assert_eq!(bids[0].currency.as_deref(), Some("EUR"));
        assert_eq!(bids[1].media_type, MediaType::Video);
        assert_eq!(bids[1].duration(), Some(30));
        assert_eq!(bids[1].categories, Some(vec!["IAB1-1".to_string()]));
        assert_eq!(bids[2].media_type, MediaType::Video);
        assert_eq!(bids[2].duration(), Some(15));
        assert_eq!(bids[2].video.as_ref().unwrap().primary_category.as_deref(), Some("cars"));
    }

    #[test]
    fn test_oversized_ext_duration_saturates() {
        let body = json!({
            "id": "req",
            "seatbid": [{"bid": [
                {"id": "b1", "impid": "imp-video", "price": 3, "ext": {"prebid": {"video": {"duration": 4294967301u64}}}}
            ]}]
        });
        let reply = HttpReply {
            status: 200,
            body: serde_json::to_vec(&body).unwrap(),
        };

        let bids = OpenRtbAdapter.make_bids(&partner_request(), &call(), &reply).unwrap();

        assert_eq!(bids[0].duration(), Some(u32::MAX));
    }

    #[test]
    fn test_make_bids_status_handling() {
        let no_content = HttpReply { status: 204, body: Vec::new() };
        assert!(OpenRtbAdapter.make_bids(&partner_request(), &call(), &no_content).unwrap().is_empty());

        let server_error = HttpReply { status: 503, body: Vec::new() };
        let err = OpenRtbAdapter.make_bids(&partner_request(), &call(), &server_error).unwrap_err();
        assert_eq!(err.kind, crate::error::PartnerErrorKind::BadServerResponse);
        assert_eq!(err.message, "Unexpected status code: 503. Run with request.test = 1 for more info");

        let garbage = HttpReply { status: 200, body: b"not json".to_vec() };
        let err = OpenRtbAdapter.make_bids(&partner_request(), &call(), &garbage).unwrap_err();
        assert!(err.message.starts_with("Failed to decode"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get("openrtb").is_some());
        assert!(registry.get("proprietary").is_none());
    }
}
