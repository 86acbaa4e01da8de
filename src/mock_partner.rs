// src/mock_partner.rs

use axum::{routing::post, serve, Json, Router};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};

use crate::openrtb::request::{BidRequest, Imp};
use crate::openrtb::response::{Bid, BidResponse, SeatBid};

/// 视频出价随机使用的时长与类目
const DURATIONS: [u32; 4] = [5, 10, 15, 30];
const CATEGORIES: [&str; 5] = ["IAB1-1", "IAB2-3", "IAB17-12", "IAB19-6", "IAB22-1"];

fn banner_adm(bid_id: &str) -> String {
    format!(
        "<html><body>Mock Partner Banner Ad<br/><a href=\"http://partner-tracker.local/click?bid={bid_id}\" target=\"_blank\">Click Here</a><img src=\"http://partner-tracker.local/impression?bid={bid_id}\" style=\"display:none;\" /></body></html>",
        bid_id = bid_id
    )
}

fn vast_adm(bid_id: &str, duration: u32) -> String {
    format!(
        r#"<VAST version="3.0">
  <Ad id="{bid_id}">
    <InLine>
      <AdSystem>Mock Partner</AdSystem>
      <AdTitle>Mock Video Ad</AdTitle>
      <Impression><![CDATA[http://partner-tracker.local/impression?bid={bid_id}]]></Impression>
      <Creatives>
        <Creative>
          <Linear>
            <Duration>00:00:{duration:02}</Duration>
            <MediaFiles>
              <MediaFile delivery="progressive" type="video/mp4" width="640" height="360" bitrate="500">
                http://example.com/video.mp4
              </MediaFile>
            </MediaFiles>
          </Linear>
        </Creative>
      </Creatives>
    </InLine>
  </Ad>
</VAST>"#,
        bid_id = bid_id,
        duration = duration
    )
}

/// 根据 imp 类型随机生成一个出价：价格为底价（缺省 1.0）乘以随机系数
fn mock_bid<R: Rng>(imp: &Imp, rng: &mut R) -> Bid {
    let bid_id = format!("bid-{}-{}", imp.id, uuid::Uuid::new_v4().simple());
    let floor = imp.bidfloor.unwrap_or(Decimal::ONE);

    let multiplier = if imp.video.is_some() {
        // 视频广告通常投入较高成本
        rng.gen_range(1.0..2.5)
    } else if imp.native.is_some() {
        rng.gen_range(0.8..2.0)
    } else {
        rng.gen_range(1.0..2.0)
    };
    let price = (floor * Decimal::from_f64(multiplier).unwrap_or(Decimal::ONE)).round_dp(2);

    let mut bid = Bid {
        id: bid_id.clone(),
        impid: imp.id.clone(),
        price,
        crid: Some(format!("creative-{}", rng.gen_range(1000..9999))),
        adomain: Some(vec!["mock-advertiser.com".to_string()]),
        ..Default::default()
    };

    if imp.video.is_some() {
        let duration = DURATIONS[rng.gen_range(0..DURATIONS.len())];
        let category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
        bid.adm = Some(vast_adm(&bid_id, duration));
        bid.dur = Some(duration);
        bid.cat = Some(vec![category.to_string()]);
        bid.ext = Some(json!({"prebid": {"type": "video"}}));
    } else if imp.native.is_some() {
        bid.adm = Some(json!({"native": {"assets": [{"title": {"text": "Mock Native Ad"}}]}}).to_string());
        bid.ext = Some(json!({"prebid": {"type": "native"}}));
    } else {
        bid.adm = Some(banner_adm(&bid_id));
        bid.w = Some(300);
        bid.h = Some(250);
    }
    bid
}

/// 为请求中的每个 imp 生成一个出价
pub fn mock_response<R: Rng>(request: &BidRequest, rng: &mut R) -> BidResponse {
    let bids = request.imp.iter().map(|imp| mock_bid(imp, rng)).collect();
    BidResponse {
        id: request.id.clone(),
        seatbid: vec![SeatBid {
            bid: bids,
            seat: Some("mock_seat".to_string()),
            group: Some(0),
        }],
        cur: Some("USD".to_string()),
        ..Default::default()
    }
}

/// 模拟合作方竞价响应，带 20 ~ 150 毫秒的随机延迟
async fn handle_partner_bid(Json(request): Json<BidRequest>) -> Json<BidResponse> {
    tracing::info!(request_id = %request.id, imps = request.imp.len(), "mock partner received request");

    let delay_ms = rand::thread_rng().gen_range(20..150);
    sleep(Duration::from_millis(delay_ms)).await;

    Json(mock_response(&request, &mut rand::thread_rng()))
}

pub fn router() -> Router {
    Router::new().route("/bid", post(handle_partner_bid))
}

/// 启动 Mock 合作方服务
/// 路由为 `/bid`，演示目录中的合作方都指向这里
pub async fn start_mock_partner_server(port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Mock partner running at http://{}", addr);
    serve(listener, router()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mock_response_per_imp() {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [
                {"id": "v", "video": {"mimes": ["video/mp4"]}, "bidfloor": 2.0},
                {"id": "b", "banner": {"w": 300, "h": 250}}
            ]
        }))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let response = mock_response(&request, &mut rng);

        assert_eq!(response.id, "req-1");
        assert_eq!(response.cur.as_deref(), Some("USD"));
        let bids = &response.seatbid[0].bid;
        assert_eq!(bids.len(), 2);

        let video = &bids[0];
        assert_eq!(video.impid, "v");
        assert!(video.price >= Decimal::from(2));
        assert!(DURATIONS.contains(&video.dur.unwrap()));
        assert_eq!(video.cat.as_ref().unwrap().len(), 1);
        assert!(video.adm.as_ref().unwrap().contains("<VAST"));

        let banner = &bids[1];
        assert_eq!(banner.impid, "b");
        assert!(banner.price >= Decimal::ONE);
        assert!(banner.dur.is_none());
        assert!(banner.adm.as_ref().unwrap().contains("<html>"));
    }
}
