// src/bidding/assembler.rs

use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::auction::multibid::MultiBidConfig;
use crate::bidding::category::CategoryMappingResult;
use crate::error::AuctionError;
use crate::model::bid::Bid;
use crate::model::partner::PartnerResponse;
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::{self, BidResponse, SeatBid};

/// 组装阶段的输入
pub struct AssemblyInput<'a> {
    pub request: &'a BidRequest,
    /// 已去重的合作方响应和类目 key
    pub mapping: &'a CategoryMappingResult,
    pub multibid: &'a HashMap<String, MultiBidConfig>,
    /// 整场竞价级别的警告（multibid、未知合作方等）
    pub warnings: &'a [String],
    pub currency: &'a str,
    /// 实际生效的总超时（毫秒）
    pub tmax: u64,
}

/// 把候选出价组装成对外响应
pub trait ResponseAssembler: Send + Sync {
    fn assemble(&self, input: AssemblyInput<'_>) -> Result<BidResponse, AuctionError>;
}

/// **默认组装器**
/// 每个有出价的合作方一个 seatbid，按 maxbids 截断每个 imp 的出价。
pub struct SeatBidAssembler;

impl SeatBidAssembler {
    /// 每个 imp 保留价格最高的前 N 个；没有 multibid 配置时不截断。输出保持原有顺序
    fn capped_bids<'b>(bids: &'b [Bid], limit: Option<usize>) -> Vec<(&'b Bid, usize)> {
        let mut by_imp: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, bid) in bids.iter().enumerate() {
            by_imp.entry(bid.imp_id.as_str()).or_default().push(index);
        }

        // index -> 在所属 imp 内的名次
        let mut rank: HashMap<usize, usize> = HashMap::new();
        for indexes in by_imp.values_mut() {
            indexes.sort_by(|a, b| bids[*b].price.cmp(&bids[*a].price).then(a.cmp(b)));
            for (position, index) in indexes.iter().enumerate() {
                rank.insert(*index, position);
            }
        }

        bids.iter()
            .enumerate()
            .filter_map(|(index, bid)| {
                let position = rank.get(&index).copied().unwrap_or(0);
                match limit {
                    Some(limit) if position >= limit => None,
                    _ => Some((bid, position)),
                }
            })
            .collect()
    }

    fn to_response_bid(
        bid: &Bid,
        partner: &str,
        position: usize,
        display_key: Option<&String>,
        multibid: Option<&MultiBidConfig>,
    ) -> Result<response::Bid, AuctionError> {
        let mut ext = match bid.ext.clone() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        if let Some(original) = bid.original_price {
            let cpm = original.to_f64().ok_or_else(|| {
                AuctionError::Assembly(format!("Bid \"{}\" original price {} is out of range", bid.id, original))
            })?;
            ext.insert("origbidcpm".to_string(), json!(cpm));
        }
        if let Some(currency) = &bid.original_currency {
            ext.insert("origbidcur".to_string(), json!(currency));
        }

        let prebid = ext
            .entry("prebid".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !prebid.is_object() {
            *prebid = Value::Object(Map::new());
        }
        if let Value::Object(prebid) = prebid {
            prebid.insert("type".to_string(), json!(bid.media_type.as_str()));

            // 同一 imp 的第 2 个及以后的出价使用 multibid 前缀作为 bidder code
            if position > 0 {
                if let Some(prefix) = multibid.and_then(|m| m.target_bidder_code_prefix.as_ref()) {
                    prebid.insert("targetbiddercode".to_string(), json!(format!("{}{}", prefix, position + 1)));
                }
            }

            let mut targeting = Map::new();
            if let Some(key) = display_key {
                targeting.insert("hb_pb_cat_dur".to_string(), json!(key));
            }
            if !targeting.is_empty() {
                prebid.insert("targeting".to_string(), Value::Object(targeting));
            }
        }

        tracing::trace!(partner, bid = %bid.id, "bid assembled");

        Ok(response::Bid {
            id: bid.id.clone(),
            impid: bid.imp_id.clone(),
            price: bid.price,
            adm: bid.adm.clone(),
            adomain: bid.adomain.clone(),
            crid: bid.crid.clone(),
            cat: bid.categories.clone(),
            dealid: bid.deal_id.clone(),
            dur: bid.duration(),
            w: bid.w,
            h: bid.h,
            ext: Some(Value::Object(ext)),
            ..Default::default()
        })
    }

    fn response_ext(input: &AssemblyInput<'_>) -> Value {
        let mut errors = Map::new();
        let mut response_times = Map::new();
        for response in &input.mapping.responses {
            response_times.insert(response.partner.clone(), json!(response.response_time_ms));
            if !response.errors.is_empty() {
                let entries: Vec<Value> = response
                    .errors
                    .iter()
                    .map(|e| json!({"code": e.kind.code(), "message": e.message}))
                    .collect();
                errors.insert(response.partner.clone(), Value::Array(entries));
            }
        }

        let mut ext = Map::new();
        if !errors.is_empty() {
            ext.insert("errors".to_string(), Value::Object(errors));
        }
        if !input.warnings.is_empty() {
            let general: Vec<Value> = input
                .warnings
                .iter()
                .map(|message| json!({"code": 999, "message": message}))
                .collect();
            ext.insert("warnings".to_string(), json!({ "general": general }));
        }
        if !input.mapping.rejections.is_empty() {
            ext.insert("rejections".to_string(), json!(input.mapping.rejections));
        }
        ext.insert("responsetimemillis".to_string(), Value::Object(response_times));
        ext.insert("tmaxrequest".to_string(), json!(input.tmax));
        Value::Object(ext)
    }

    fn seat_bid(
        response: &PartnerResponse,
        input: &AssemblyInput<'_>,
    ) -> Result<Option<SeatBid>, AuctionError> {
        if response.bids.is_empty() {
            return Ok(None);
        }

        let multibid = input.multibid.get(&response.partner);
        let limit = multibid.map(|m| m.max_bids as usize);
        let keys = input.mapping.bid_categories.get(&response.partner);

        let bids = Self::capped_bids(&response.bids, limit)
            .into_iter()
            .map(|(bid, position)| {
                let key = keys.and_then(|k| k.get(&bid.id));
                Self::to_response_bid(bid, &response.partner, position, key, multibid)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SeatBid {
            bid: bids,
            seat: Some(response.partner.clone()),
            group: Some(0),
        }))
    }
}

impl ResponseAssembler for SeatBidAssembler {
    fn assemble(&self, input: AssemblyInput<'_>) -> Result<BidResponse, AuctionError> {
        let mut seatbid = Vec::new();
        for response in &input.mapping.responses {
            if let Some(seat) = Self::seat_bid(response, &input)? {
                seatbid.push(seat);
            }
        }

        Ok(BidResponse {
            id: input.request.id.clone(),
            seatbid,
            cur: Some(input.currency.to_string()),
            ext: Some(Self::response_ext(&input)),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PartnerError;
    use crate::model::bid::MediaType;
    use rust_decimal_macros::dec;

    fn request() -> BidRequest {
        serde_json::from_value(json!({"id": "auction-1", "imp": [{"id": "imp1"}, {"id": "imp2"}], "tmax": 300})).unwrap()
    }

    fn multibid(partner: &str, max_bids: u32, prefix: Option<&str>) -> HashMap<String, MultiBidConfig> {
        HashMap::from([(
            partner.to_string(),
            MultiBidConfig {
                bidder: partner.to_string(),
                max_bids,
                target_bidder_code_prefix: prefix.map(str::to_string),
            },
        )])
    }

    #[test]
    fn test_bids_capped_per_imp_by_max_bids() {
        let bids = vec![
            Bid::new("low", "imp1", dec!(1), MediaType::Banner),
            Bid::new("high", "imp1", dec!(3), MediaType::Banner),
            Bid::new("mid", "imp1", dec!(2), MediaType::Banner),
            Bid::new("other-imp", "imp2", dec!(0.5), MediaType::Banner),
        ];
        let mapping = CategoryMappingResult {
            responses: vec![PartnerResponse::new("rubicon", "rubicon", bids, Vec::new(), 12)],
            ..Default::default()
        };
        let request = request();
        let multibid = multibid("rubicon", 2, Some("rubi"));

        let response = SeatBidAssembler
            .assemble(AssemblyInput {
                request: &request,
                mapping: &mapping,
                multibid: &multibid,
                warnings: &[],
                currency: "USD",
                tmax: 300,
            })
            .unwrap();

        assert_eq!(response.id, "auction-1");
        assert_eq!(response.cur.as_deref(), Some("USD"));
        let seat = &response.seatbid[0];
        assert_eq!(seat.seat.as_deref(), Some("rubicon"));
        let ids: Vec<&str> = seat.bid.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "other-imp"]);
        assert_eq!(seat.bid[1].ext.as_ref().unwrap()["prebid"]["targetbiddercode"], json!("rubi2"));
        assert!(seat.bid[0].ext.as_ref().unwrap()["prebid"].get("targetbiddercode").is_none());
    }

    #[test]
    fn test_ext_carries_targeting_audit_and_errors() {
        let bid = Bid::new("v1", "imp1", dec!(12.5), MediaType::Video)
            .with_duration(Some(15))
            .normalized(dec!(25), "USD", "EUR");
        let mapping = CategoryMappingResult {
            bid_categories: HashMap::from([(
                "appnexus".to_string(),
                HashMap::from([("v1".to_string(), "25.00_sports_15s".to_string())]),
            )]),
            responses: vec![
                PartnerResponse::new("appnexus", "appnexus", vec![bid], Vec::new(), 40),
                PartnerResponse::failed("slowpoke", "slowpoke", PartnerError::timeout("Timed out"), 300),
            ],
            rejections: vec!["Bid rejected [bidder: appnexus, bid ID: v2] with a reason: Bid was deduplicated".to_string()],
        };
        let request = request();
        let warnings = vec!["Unknown bidder foo was ignored".to_string()];

        let response = SeatBidAssembler
            .assemble(AssemblyInput {
                request: &request,
                mapping: &mapping,
                multibid: &HashMap::new(),
                warnings: &warnings,
                currency: "USD",
                tmax: 300,
            })
            .unwrap();

        assert_eq!(response.seatbid.len(), 1);
        let bid = &response.seatbid[0].bid[0];
        assert_eq!(bid.price, dec!(25));
        assert_eq!(bid.dur, Some(15));
        let ext = bid.ext.as_ref().unwrap();
        assert_eq!(ext["origbidcpm"], json!(12.5));
        assert_eq!(ext["origbidcur"], json!("EUR"));
        assert_eq!(ext["prebid"]["type"], json!("video"));
        assert_eq!(ext["prebid"]["targeting"]["hb_pb_cat_dur"], json!("25.00_sports_15s"));

        let ext = response.ext.unwrap();
        assert_eq!(ext["errors"]["slowpoke"], json!([{"code": 1, "message": "Timed out"}]));
        assert_eq!(ext["warnings"]["general"][0]["message"], json!("Unknown bidder foo was ignored"));
        assert_eq!(ext["responsetimemillis"], json!({"appnexus": 40, "slowpoke": 300}));
        assert_eq!(ext["rejections"].as_array().unwrap().len(), 1);
        assert_eq!(ext["tmaxrequest"], json!(300));
    }

    #[test]
    fn test_no_bids_still_produces_response() {
        let mapping = CategoryMappingResult::default();
        let request = request();
        let response = SeatBidAssembler
            .assemble(AssemblyInput {
                request: &request,
                mapping: &mapping,
                multibid: &HashMap::new(),
                warnings: &[],
                currency: "EUR",
                tmax: 300,
            })
            .unwrap();
        assert!(response.seatbid.is_empty());
        assert_eq!(response.cur.as_deref(), Some("EUR"));
        assert_eq!(response.ext.unwrap()["responsetimemillis"], json!({}));
    }
}
