// src/openrtb/request.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// OpenRTB BidRequest 结构体（竞价的规范请求）。
/// 业务上关心的字段强类型化，其余字段通过 `other` 原样透传给合作方。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidRequest {
    pub id: String,

    /// 广告展示请求列表
    #[serde(default)]
    pub imp: Vec<Imp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    /// 设备信息对核心流程不透明
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regs: Option<Value>,

    // 其它简单字段
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmax: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcat: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badv: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<ExtRequest>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// 单个广告位
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Imp {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub bidfloor: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidfloorcur: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmp: Option<Value>,
    /// 合作方配置映射：`ext.prebid.bidder.<name>`，或旧格式的 `ext.<name>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Video {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mimes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minduration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxduration: Option<u32>,
    /// 1 = instream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Site {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<DataExt>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<DataExt>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// site.ext / app.ext：只关心其中的第一方数据 `data`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DataExt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl DataExt {
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.other.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyeruid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yob: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<UserExt>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UserExt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eids: Option<Vec<Eid>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl UserExt {
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.eids.is_none() && self.other.is_empty()
    }
}

/// 外部用户标识
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Eid {
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uids: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pchain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<SourceExt>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SourceExt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schain: Option<SupplyChain>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// 供应链声明
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SupplyChain {
    pub ver: String,
    pub complete: i32,
    #[serde(default)]
    pub nodes: Vec<SupplyChainNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SupplyChainNode {
    pub asi: String,
    pub sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prebid: Option<ExtRequestPrebid>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// request.ext.prebid：交易所自身的竞价控制参数
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestPrebid {
    /// 别名 -> 合作方编码
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidadjustmentfactors: Option<BidAdjustmentFactors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<ExtRequestCurrency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targeting: Option<ExtRequestTargeting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtRequestPrebidData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schains: Option<Vec<ExtRequestPrebidSchain>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multibid: Option<Vec<ExtRequestPrebidMultiBid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidderconfig: Option<Vec<ExtRequestPrebidBidderConfig>>,
    /// 请求级别的合作方参数，按合作方名索引
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidders: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<i32>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// 出价调整系数：顶层为合作方维度，`mediatypes` 为媒体类型维度
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidAdjustmentFactors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mediatypes: Option<HashMap<AdjustmentMediaType, HashMap<String, Decimal>>>,
    #[serde(flatten)]
    pub factors: HashMap<String, Decimal>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjustmentMediaType {
    #[serde(rename = "banner")]
    Banner,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "video-outstream")]
    VideoOutstream,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "native")]
    Native,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestCurrency {
    /// from -> to -> rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates: Option<HashMap<String, HashMap<String, Decimal>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usepbsrates: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestTargeting {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricegranularity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mediatypepricegranularity: Option<ExtMediaTypePriceGranularity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includebrandcategory: Option<ExtIncludeBrandCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durationrangesec: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includewinners: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includebidderkeys: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtMediaTypePriceGranularity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtIncludeBrandCategory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primaryadserver: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withcategory: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translatecategories: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestPrebidData {
    /// 允许接收第一方数据的合作方；None 表示不过滤
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidders: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eidpermissions: Option<Vec<EidPermission>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EidPermission {
    pub source: String,
    #[serde(default)]
    pub bidders: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestPrebidSchain {
    #[serde(default)]
    pub bidders: Vec<String>,
    pub schain: SupplyChain,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestPrebidMultiBid {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidders: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxbids: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targetbiddercodeprefix: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExtRequestPrebidBidderConfig {
    #[serde(default)]
    pub bidders: Vec<String>,
    pub config: BidderConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ortb2: Option<BidderConfigOrtb>,
}

/// 针对特定合作方覆盖的 site/app/user 片段
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidderConfigOrtb {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

// Getter 方法实现
impl BidRequest {
    pub fn prebid(&self) -> Option<&ExtRequestPrebid> {
        self.ext.as_ref().and_then(|ext| ext.prebid.as_ref())
    }

    pub fn targeting(&self) -> Option<&ExtRequestTargeting> {
        self.prebid().and_then(|prebid| prebid.targeting.as_ref())
    }

    pub fn aliases(&self) -> Option<&HashMap<String, String>> {
        self.prebid().and_then(|prebid| prebid.aliases.as_ref())
    }

    pub fn find_imp(&self, imp_id: &str) -> Option<&Imp> {
        self.imp.iter().find(|imp| imp.id == imp_id)
    }

    /// 请求中是否要求缓存出价（决定是否为缓存预留时间）
    pub fn caching_requested(&self) -> bool {
        self.prebid().map(|prebid| prebid.cache.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_request_with_prebid_ext() {
        let raw = json!({
            "id": "req-1",
            "imp": [{
                "id": "imp-1",
                "video": {"mimes": ["video/mp4"], "placement": 1},
                "bidfloor": 1.5,
                "ext": {"prebid": {"bidder": {"rubicon": {"zoneId": 7}}}}
            }],
            "cur": ["USD"],
            "ext": {"prebid": {
                "aliases": {"rubiconAlias": "rubicon"},
                "bidadjustmentfactors": {"rubicon": 0.9, "mediatypes": {"video-outstream": {"rubicon": 1.2}}},
                "targeting": {"includebrandcategory": {"primaryadserver": 1, "publisher": "pub", "withcategory": true}, "durationrangesec": [15, 30]}
            }},
            "customfield": true
        });

        let request: BidRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.imp[0].bidfloor, Some(dec!(1.5)));
        assert_eq!(request.imp[0].video.as_ref().unwrap().placement, Some(1));
        assert_eq!(request.aliases().unwrap()["rubiconAlias"], "rubicon");
        let factors = request.prebid().unwrap().bidadjustmentfactors.as_ref().unwrap();
        assert_eq!(factors.factors["rubicon"], dec!(0.9));
        assert_eq!(
            factors.mediatypes.as_ref().unwrap()[&AdjustmentMediaType::VideoOutstream]["rubicon"],
            dec!(1.2)
        );
        assert_eq!(request.targeting().unwrap().durationrangesec, Some(vec![15, 30]));
        assert_eq!(request.other["customfield"], json!(true));
        assert!(!request.caching_requested());
    }
}
