// src/bidding/price.rs

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConversionError, PartnerError};
use crate::model::bid::{Bid, MediaType};
use crate::model::partner::{PartnerCatalog, PartnerResponse};
use crate::openrtb::request::{AdjustmentMediaType, BidRequest};

type Rates = HashMap<String, HashMap<String, Decimal>>;

/// 汇率换算服务
pub trait CurrencyConverter: Send + Sync {
    fn convert(&self, amount: Decimal, request: &BidRequest, to: &str, from: &str) -> Result<Decimal, ConversionError>;
}

/// **静态汇率表**
/// 查找顺序：相同币种 -> 请求级汇率 -> 配置汇率；每张表先查正向再查反向。
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: Rates,
}

impl RateTable {
    pub fn new(rates: Rates) -> Self {
        Self { rates }
    }

    fn lookup(rates: &Rates, from: &str, to: &str) -> Result<Option<Decimal>, ConversionError> {
        if let Some(rate) = rates.get(from).and_then(|targets| targets.get(to)) {
            return Ok(Some(*rate));
        }
        match rates.get(to).and_then(|targets| targets.get(from)) {
            Some(rate) if rate.is_zero() => Err(ConversionError::ZeroRate {
                from: to.to_string(),
                to: from.to_string(),
            }),
            Some(rate) => Decimal::ONE
                .checked_div(*rate)
                .map(Some)
                .ok_or_else(|| ConversionError::Overflow {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
            None => Ok(None),
        }
    }
}

impl CurrencyConverter for RateTable {
    fn convert(&self, amount: Decimal, request: &BidRequest, to: &str, from: &str) -> Result<Decimal, ConversionError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(amount);
        }

        let currency = request.prebid().and_then(|prebid| prebid.currency.as_ref());
        let use_configured = currency.and_then(|c| c.usepbsrates).unwrap_or(true);

        let apply = |rate: Decimal| {
            amount.checked_mul(rate).ok_or_else(|| ConversionError::Overflow {
                from: from.to_string(),
                to: to.to_string(),
            })
        };

        if let Some(request_rates) = currency.and_then(|c| c.rates.as_ref()) {
            if let Some(rate) = Self::lookup(request_rates, from, to)? {
                return apply(rate);
            }
        }
        if use_configured {
            if let Some(rate) = Self::lookup(&self.rates, from, to)? {
                return apply(rate);
            }
        }

        Err(ConversionError::NoRate {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// **价格归一化**
/// 换算到结算币种后再乘调整系数，生成新的 Bid。
pub struct PriceNormalizer {
    converter: Arc<dyn CurrencyConverter>,
    default_currency: String,
}

impl PriceNormalizer {
    pub fn new(converter: Arc<dyn CurrencyConverter>, default_currency: &str) -> Self {
        Self {
            converter,
            default_currency: default_currency.to_string(),
        }
    }

    /// 结算币种：request.cur 的第一个，多个时附带一条警告
    pub fn settlement_currency(&self, request: &BidRequest) -> (String, Option<String>) {
        match request.cur.as_deref() {
            Some([first, rest @ ..]) => {
                let warning = (!rest.is_empty())
                    .then(|| format!("Cur parameter contains more than one currency. {} will be used", first));
                (first.clone(), warning)
            }
            _ => (self.default_currency.clone(), None),
        }
    }

    pub fn normalize(
        &self,
        request: &BidRequest,
        responses: Vec<PartnerResponse>,
        catalog: &PartnerCatalog,
    ) -> Vec<PartnerResponse> {
        let (settlement, warning) = self.settlement_currency(request);
        responses
            .into_iter()
            .map(|response| self.normalize_response(request, response, catalog, &settlement, warning.as_deref()))
            .collect()
    }

    fn normalize_response(
        &self,
        request: &BidRequest,
        response: PartnerResponse,
        catalog: &PartnerCatalog,
        settlement: &str,
        warning: Option<&str>,
    ) -> PartnerResponse {
        let PartnerResponse {
            partner,
            code,
            bids,
            mut errors,
            response_time_ms,
        } = response;

        if let Some(warning) = warning {
            errors.push(PartnerError::bad_input(warning));
        }

        let partner_currency = catalog
            .get(&code)
            .map(|p| p.default_currency.clone())
            .unwrap_or_else(|| self.default_currency.clone());

        let mut normalized = Vec::with_capacity(bids.len());
        for bid in bids {
            let from = bid.currency.clone().unwrap_or_else(|| partner_currency.clone());
            let adjusted = self
                .converter
                .convert(bid.price, request, settlement, &from)
                .map_err(|e| e.to_string())
                .and_then(|converted| match adjustment_factor(request, &partner, &bid) {
                    Some(factor) => converted
                        .checked_mul(factor)
                        .ok_or_else(|| format!("Bid price overflowed after adjustment factor {}", factor)),
                    None => Ok(converted),
                });
            match adjusted {
                Ok(price) => normalized.push(bid.normalized(price, settlement, &from)),
                Err(message) => {
                    tracing::warn!(partner = %partner, bid = %bid.id, error = %message, "bid dropped by price normalization");
                    errors.push(PartnerError::generic(message));
                }
            }
        }

        PartnerResponse {
            partner,
            code,
            bids: normalized,
            errors,
            response_time_ms,
        }
    }
}

/// 调整系数使用的媒体类型；视频按 imp.video.placement 区分 instream / outstream
fn adjustment_media_type(request: &BidRequest, bid: &Bid) -> AdjustmentMediaType {
    match bid.media_type {
        MediaType::Banner => AdjustmentMediaType::Banner,
        MediaType::Audio => AdjustmentMediaType::Audio,
        MediaType::Native => AdjustmentMediaType::Native,
        MediaType::Video => {
            let placement = request
                .find_imp(&bid.imp_id)
                .and_then(|imp| imp.video.as_ref())
                .and_then(|video| video.placement);
            match placement {
                None | Some(1) => AdjustmentMediaType::Video,
                Some(_) => AdjustmentMediaType::VideoOutstream,
            }
        }
    }
}

/// 先查 (媒体类型, 合作方)，再查合作方维度
fn adjustment_factor(request: &BidRequest, partner: &str, bid: &Bid) -> Option<Decimal> {
    let factors = request.prebid()?.bidadjustmentfactors.as_ref()?;
    let media_type = adjustment_media_type(request, bid);
    factors
        .mediatypes
        .as_ref()
        .and_then(|by_type| by_type.get(&media_type))
        .and_then(|by_partner| by_partner.get(partner))
        .or_else(|| factors.factors.get(partner))
        .copied()
}
