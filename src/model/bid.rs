// src/model/bid.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 出价的媒体类型
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
    Audio,
    Native,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Banner => "banner",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Native => "native",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MediaType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "banner" => Ok(MediaType::Banner),
            "video" => Ok(MediaType::Video),
            "audio" => Ok(MediaType::Audio),
            "native" => Ok(MediaType::Native),
            _ => Err(format!("Invalid value for MediaType: {}", value)),
        }
    }
}

/// 视频出价的附加信息
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoInfo {
    /// 声明时长（秒）
    pub duration: Option<u32>,
    pub primary_category: Option<String>,
}

/// **候选创意（值对象）**
/// 价格归一化后会生成新的 Bid，而不是原地修改。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Bid {
    pub id: String,
    pub imp_id: String,
    /// 合作方原生币种下的价格；归一化后为结算币种价格
    pub price: Decimal,
    pub currency: Option<String>,
    pub media_type: MediaType,
    /// 声明的类目列表（bid.cat）
    pub categories: Option<Vec<String>>,
    pub video: Option<VideoInfo>,
    /// 不透明的创意内容
    pub adm: Option<String>,
    pub deal_id: Option<String>,
    pub adomain: Option<Vec<String>>,
    pub crid: Option<String>,
    pub w: Option<u32>,
    pub h: Option<u32>,
    pub ext: Option<Value>,
    /// 调整前的价格与币种，仅用于审计
    pub original_price: Option<Decimal>,
    pub original_currency: Option<String>,
}

impl Bid {
    pub fn new(id: &str, imp_id: &str, price: Decimal, media_type: MediaType) -> Self {
        Self {
            id: id.to_string(),
            imp_id: imp_id.to_string(),
            price,
            currency: None,
            media_type,
            categories: None,
            video: None,
            adm: None,
            deal_id: None,
            adomain: None,
            crid: None,
            w: None,
            h: None,
            ext: None,
            original_price: None,
            original_currency: None,
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.categories = Some(categories.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_duration(mut self, duration: Option<u32>) -> Self {
        let video = self.video.get_or_insert_with(VideoInfo::default);
        video.duration = duration;
        self
    }

    /// 视频声明时长
    pub fn duration(&self) -> Option<u32> {
        self.video.as_ref().and_then(|video| video.duration)
    }

    /// 生成归一化后的新出价，保留调整前的价格和币种
    pub fn normalized(&self, price: Decimal, settlement_currency: &str, original_currency: &str) -> Bid {
        Bid {
            price,
            currency: Some(settlement_currency.to_string()),
            original_price: Some(self.price),
            original_currency: Some(original_currency.to_string()),
            ..self.clone()
        }
    }
}
