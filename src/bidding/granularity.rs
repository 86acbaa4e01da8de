// src/bidding/granularity.rs

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::openrtb::request::ExtRequestTargeting;

const DEFAULT_PRECISION: u32 = 2;

/// 价格区间：[min, max]，按 increment 向下取整
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularityRange {
    pub min: Decimal,
    pub max: Decimal,
    pub increment: Decimal,
}

/// **价格粒度**
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceGranularity {
    pub precision: u32,
    pub ranges: Vec<GranularityRange>,
}

#[derive(Deserialize)]
struct CustomGranularity {
    precision: Option<u32>,
    ranges: Vec<CustomRange>,
}

#[derive(Deserialize)]
struct CustomRange {
    min: Option<Decimal>,
    max: Decimal,
    increment: Decimal,
}

fn range(min: i64, max: i64, increment: Decimal) -> GranularityRange {
    GranularityRange {
        min: Decimal::from(min),
        max: Decimal::from(max),
        increment,
    }
}

impl PriceGranularity {
    fn from_ranges(ranges: Vec<GranularityRange>) -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            ranges,
        }
    }

    /// 默认粒度 medium
    pub fn medium() -> Self {
        Self::from_ranges(vec![range(0, 20, Decimal::new(1, 1))])
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ranges = match name {
            "low" => vec![range(0, 5, Decimal::new(5, 1))],
            "medium" | "med" => return Some(Self::medium()),
            "high" => vec![range(0, 20, Decimal::new(1, 2))],
            "auto" => vec![
                range(0, 5, Decimal::new(5, 2)),
                range(5, 10, Decimal::new(1, 1)),
                range(10, 20, Decimal::new(5, 1)),
            ],
            "dense" => vec![
                range(0, 3, Decimal::new(1, 2)),
                range(3, 8, Decimal::new(5, 2)),
                range(8, 20, Decimal::new(5, 1)),
            ],
            _ => return None,
        };
        Some(Self::from_ranges(ranges))
    }

    /// 解析请求中的粒度：字符串名称，或 `{precision, ranges}` 自定义区间
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if let Some(name) = value.as_str() {
            return Self::from_name(name).ok_or_else(|| format!("Invalid string price granularity with value: {}", name));
        }

        let custom: CustomGranularity =
            serde_json::from_value(value.clone()).map_err(|e| format!("Invalid price granularity: {}", e))?;
        if custom.ranges.is_empty() {
            return Err("Price granularity ranges must not be empty".to_string());
        }

        let mut ranges = Vec::with_capacity(custom.ranges.len());
        let mut previous_max = Decimal::ZERO;
        for r in custom.ranges {
            let min = r.min.unwrap_or(previous_max);
            if r.increment <= Decimal::ZERO || r.max <= min {
                return Err("Price granularity ranges are invalid".to_string());
            }
            // 区间内的档位数必须能用 Decimal 表示
            if (r.max - min).checked_div(r.increment).is_none() {
                return Err(format!("Price granularity increment {} is too small", r.increment));
            }
            previous_max = r.max;
            ranges.push(GranularityRange {
                min,
                max: r.max,
                increment: r.increment,
            });
        }

        Ok(Self {
            precision: custom.precision.unwrap_or(DEFAULT_PRECISION),
            ranges,
        })
    }

    /// 视频出价使用的粒度：媒体类型粒度优先，其次请求粒度，最后 medium
    pub fn for_video(targeting: &ExtRequestTargeting) -> Result<Self, String> {
        let configured = targeting
            .mediatypepricegranularity
            .as_ref()
            .and_then(|m| m.video.as_ref())
            .or(targeting.pricegranularity.as_ref());
        match configured {
            Some(value) => Self::from_value(value),
            None => Ok(Self::medium()),
        }
    }

    fn bucket_value(&self, price: Decimal) -> Decimal {
        let Some(top) = self.ranges.last().map(|r| r.max) else {
            return Decimal::ZERO;
        };
        if price > top {
            return top;
        }
        match self.ranges.iter().find(|r| price >= r.min && price <= r.max) {
            Some(r) => (price - r.min)
                .checked_div(r.increment)
                .and_then(|steps| steps.floor().checked_mul(r.increment))
                .and_then(|offset| offset.checked_add(r.min))
                .unwrap_or(r.min),
            None => Decimal::ZERO,
        }
    }

    /// 价格档位字符串，例如 10 -> "10.00"
    pub fn bucket(&self, price: Decimal) -> String {
        format!("{:.*}", self.precision as usize, self.bucket_value(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_named_granularities() {
        let medium = PriceGranularity::medium();
        assert_eq!(medium.bucket(dec!(10)), "10.00");
        assert_eq!(medium.bucket(dec!(1.87)), "1.80");
        assert_eq!(medium.bucket(dec!(25)), "20.00");

        let low = PriceGranularity::from_name("low").unwrap();
        assert_eq!(low.bucket(dec!(10)), "5.00");
        assert_eq!(low.bucket(dec!(2.74)), "2.50");

        let high = PriceGranularity::from_name("high").unwrap();
        assert_eq!(high.bucket(dec!(2.749)), "2.74");

        let auto = PriceGranularity::from_name("auto").unwrap();
        assert_eq!(auto.bucket(dec!(3.12)), "3.10");
        assert_eq!(auto.bucket(dec!(7.77)), "7.70");
        assert_eq!(auto.bucket(dec!(13.3)), "13.00");

        let dense = PriceGranularity::from_name("dense").unwrap();
        assert_eq!(dense.bucket(dec!(1.234)), "1.23");
        assert_eq!(dense.bucket(dec!(4.07)), "4.05");

        assert!(PriceGranularity::from_name("ultra").is_none());
    }

    #[test]
    fn test_custom_granularity() {
        let granularity = PriceGranularity::from_value(&json!({
            "precision": 3,
            "ranges": [{"max": 5, "increment": 0.25}, {"max": 10, "increment": 1}]
        }))
        .unwrap();
        assert_eq!(granularity.ranges[1].min, dec!(5));
        assert_eq!(granularity.bucket(dec!(4.9)), "4.750");
        assert_eq!(granularity.bucket(dec!(7.5)), "7.000");
        assert_eq!(granularity.bucket(dec!(11)), "10.000");
    }

    #[test]
    fn test_invalid_granularity() {
        assert!(PriceGranularity::from_value(&json!("ultra")).is_err());
        assert!(PriceGranularity::from_value(&json!({"ranges": []})).is_err());
        assert!(PriceGranularity::from_value(&json!({"ranges": [{"max": 5, "increment": 0}]})).is_err());
    }

    #[test]
    fn test_tiny_increment_is_rejected_not_panicking() {
        let tiny = json!({"ranges": [{"max": 20, "increment": "0.0000000000000000000000000001"}]});
        let err = PriceGranularity::from_value(&tiny).unwrap_err();
        assert!(err.contains("too small"), "{}", err);

        // 直接构造的区间也不会在计算档位时 panic，退回到区间下限
        let granularity = PriceGranularity {
            precision: 2,
            ranges: vec![GranularityRange {
                min: dec!(1),
                max: dec!(20),
                increment: Decimal::new(1, 28),
            }],
        };
        assert_eq!(granularity.bucket(dec!(15)), "1.00");
    }

    #[test]
    fn test_video_prefers_media_type_granularity() {
        let targeting: ExtRequestTargeting = serde_json::from_value(json!({
            "pricegranularity": "medium",
            "mediatypepricegranularity": {"video": "low"}
        }))
        .unwrap();
        assert_eq!(PriceGranularity::for_video(&targeting).unwrap().bucket(dec!(10)), "5.00");

        let targeting = ExtRequestTargeting::default();
        assert_eq!(PriceGranularity::for_video(&targeting).unwrap().bucket(dec!(10)), "10.00");
    }
}
