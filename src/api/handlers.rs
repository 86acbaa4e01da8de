// src/api/handlers.rs

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::bidding::engine::Exchange;
use crate::model::context::AuctionContext;
use crate::openrtb::request::BidRequest;

/// 调用方通过该请求头标识账户
pub const ACCOUNT_HEADER: &str = "x-account-id";
/// 可选：调用方指定的超时（毫秒），优先于 request.tmax
pub const TIMEOUT_HEADER: &str = "x-timeout-ms";

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// **处理 OpenRTB 竞价请求**
/// 请求体用 simd-json 解析；整场级别错误映射为对应的 HTTP 状态码，
/// 没有出价时仍返回 200 和空 seatbid，方便调用方读取 ext 中的错误信息。
pub async fn handle_auction(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let mut raw = body.to_vec();
    let request: BidRequest = match simd_json::serde::from_slice(&mut raw) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "invalid auction request body");
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request format: {}", e));
        }
    };

    let account_id = headers
        .get(ACCOUNT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let mut context = AuctionContext::new(account_id);
    if let Some(timeout_ms) = headers
        .get(TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
    {
        context = context.with_timeout(timeout_ms);
    }

    match state.exchange.hold_auction(request, context).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidding::adapter::{HttpCall, HttpReply};
    use crate::bidding::category::InMemoryCategoryStore;
    use crate::bidding::transport::HttpTransport;
    use crate::config::config_manager::{ConfigManager, ExchangeConfig};
    use crate::error::PartnerError;
    use crate::model::partner::{PartnerCatalog, PartnerConfig};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoBidTransport;

    #[async_trait]
    impl HttpTransport for NoBidTransport {
        async fn execute(&self, _: &HttpCall) -> Result<HttpReply, PartnerError> {
            Ok(HttpReply { status: 204, body: Vec::new() })
        }
    }

    fn state() -> Arc<AppState> {
        let catalog = PartnerCatalog::from_partners(vec![PartnerConfig::new(1, "rubicon", "http://rubicon/bid")]);
        let config = Arc::new(ConfigManager::new(ExchangeConfig::default(), catalog));
        let exchange = Exchange::new(config, Arc::new(NoBidTransport), Arc::new(InMemoryCategoryStore::default()));
        Arc::new(AppState {
            exchange: Arc::new(exchange),
        })
    }

    async fn call(body: &str) -> (StatusCode, Value) {
        let mut headers = HeaderMap::new();
        headers.insert(ACCOUNT_HEADER, "pub-1".parse().unwrap());
        call_with(body, headers).await
    }

    async fn call_with(body: &str, headers: HeaderMap) -> (StatusCode, Value) {
        let response = handle_auction(State(state()), headers, Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_no_bids_returns_ok_with_empty_seatbid() {
        let (status, body) = call(r#"{"id": "req-1", "imp": [{"id": "imp1", "banner": {}, "ext": {"rubicon": {}}}]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], json!("req-1"));
        assert_eq!(body["seatbid"], json!([]));
        assert!(body["ext"]["responsetimemillis"].get("rubicon").is_some());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (status, body) = call("{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request format"));
    }

    #[tokio::test]
    async fn test_fatal_error_maps_status() {
        let (status, body) = call(r#"{"id": "req-1", "imp": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("request.imp must contain at least one element"));
    }

    #[tokio::test]
    async fn test_timeout_header_overrides_tmax() {
        let mut headers = HeaderMap::new();
        headers.insert(TIMEOUT_HEADER, "250".parse().unwrap());
        let body = r#"{"id": "req-1", "tmax": 900, "imp": [{"id": "imp1", "banner": {}, "ext": {"rubicon": {}}}]}"#;
        let (status, body) = call_with(body, headers).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ext"]["tmaxrequest"], json!(250));
    }
}
