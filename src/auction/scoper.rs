// src/auction/scoper.rs

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::auction::multibid::MultiBidConfig;
use crate::auction::privacy::PrivacyDecision;
use crate::bidding::deadline::Deadline;
use crate::error::AuctionError;
use crate::model::partner::{PartnerCatalog, PartnerRequest};
use crate::openrtb::request::{
    BidRequest, BidderConfigOrtb, Eid, EidPermission, ExtRequest, Imp, Source, SourceExt, SupplyChain, User,
};

/// imp.ext 中不是合作方名称的保留键（旧格式下用于区分合作方配置）
static RESERVED_IMP_EXT_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "prebid",
        "context",
        "data",
        "skadn",
        "gpid",
        "tid",
        "all",
        "general",
        "ae",
        "is_rewarded_inventory",
    ]
    .into_iter()
    .collect()
});

const WILDCARD: &str = "*";

/// 单个 imp 上声明的合作方配置
struct ImpPartners {
    configs: Vec<(String, Value)>,
    /// 旧格式：合作方直接作为 imp.ext 的顶层键
    legacy: bool,
}

fn imp_partners(imp: &Imp) -> ImpPartners {
    let Some(ext) = imp.ext.as_ref() else {
        return ImpPartners {
            configs: Vec::new(),
            legacy: false,
        };
    };

    if let Some(bidders) = ext
        .get("prebid")
        .and_then(|prebid| prebid.get("bidder"))
        .and_then(Value::as_object)
    {
        return ImpPartners {
            configs: bidders.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            legacy: false,
        };
    }

    ImpPartners {
        configs: ext
            .iter()
            .filter(|(key, _)| !RESERVED_IMP_EXT_KEYS.contains(key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        legacy: true,
    }
}

/// 按首次出现顺序列出请求中出现的所有合作方名称（含别名）
pub fn partner_names(request: &BidRequest) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for imp in &request.imp {
        for (name, _) in imp_partners(imp).configs {
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }
    names
}

/// **按合作方拆分后的请求集合**
#[derive(Debug, Clone, Default)]
pub struct ScopedRequests {
    pub requests: Vec<PartnerRequest>,
    pub warnings: Vec<String>,
}

/// 把规范请求拆成每个合作方各自的请求
///
/// 每个别名都是独立的逻辑合作方；未知或被停用的合作方跳过并产生警告；
/// 被隐私服务阻止的合作方不生成请求。
pub fn scope(
    request: &BidRequest,
    catalog: &PartnerCatalog,
    multibid: &HashMap<String, MultiBidConfig>,
    privacy: &[PrivacyDecision],
    deadline: Deadline,
) -> Result<ScopedRequests, AuctionError> {
    if request.imp.is_empty() {
        return Err(AuctionError::InvalidRequest(
            "request.imp must contain at least one element".to_string(),
        ));
    }

    let aliases = request.aliases();
    let privacy: HashMap<&str, &PrivacyDecision> = privacy.iter().map(|d| (d.partner.as_str(), d)).collect();
    let mut scoped = ScopedRequests::default();

    for name in partner_names(request) {
        let Some(partner) = catalog.resolve(&name, aliases) else {
            tracing::warn!(partner = %name, "unknown partner skipped");
            scoped.warnings.push(format!("Unknown bidder {} was ignored", name));
            continue;
        };
        if !partner.enabled {
            tracing::warn!(partner = %name, "disabled partner skipped");
            scoped.warnings.push(format!("Bidder {} is disabled and was ignored", name));
            continue;
        }

        let decision = privacy.get(name.as_str()).copied();
        if decision.map(|d| d.blocked).unwrap_or(false) {
            tracing::info!(partner = %name, "partner blocked by privacy enforcement");
            continue;
        }

        let mut partner_request = scope_for_partner(request, &name, &partner.name, multibid.get(&name))?;
        if let Some(decision) = decision.filter(|d| d.masked) {
            partner_request.user = decision.user.clone();
            partner_request.device = decision.device.clone();
        }

        scoped.requests.push(PartnerRequest {
            partner: name.clone(),
            code: partner.name.clone(),
            request: partner_request,
            multibid: multibid.get(&name).cloned(),
            deadline: deadline.bounded_by(partner.timeout_ms),
        });
    }

    Ok(scoped)
}

/// 构造单个合作方视角的请求
fn scope_for_partner(
    request: &BidRequest,
    partner: &str,
    code: &str,
    multibid: Option<&MultiBidConfig>,
) -> Result<BidRequest, AuctionError> {
    let prebid = request.prebid();
    let fpd_allowed = prebid
        .and_then(|p| p.data.as_ref())
        .and_then(|data| data.bidders.as_ref())
        .map(|bidders| bidders.iter().any(|b| b == partner))
        .unwrap_or(true);

    let mut scoped = request.clone();
    scoped.imp = request
        .imp
        .iter()
        .filter_map(|imp| {
            let partners = imp_partners(imp);
            let fragment = partners
                .configs
                .iter()
                .find(|(name, _)| name == partner)
                .map(|(_, fragment)| fragment.clone())?;
            Some(scoped_imp(imp, fragment, partners.legacy, !fpd_allowed))
        })
        .collect();

    if !fpd_allowed {
        strip_first_party_data(&mut scoped);
    } else if let Some(ortb) = prebid
        .and_then(|p| p.bidderconfig.as_ref())
        .and_then(|configs| select_for_partner(configs.iter().map(|c| (&c.bidders, &c.config)), partner))
        .and_then(|config| config.ortb2.as_ref())
    {
        merge_bidder_config(&mut scoped, ortb)?;
    }

    let eid_permissions = prebid
        .and_then(|p| p.data.as_ref())
        .and_then(|data| data.eidpermissions.as_ref());
    if let Some(permissions) = eid_permissions {
        filter_eids(&mut scoped, permissions, partner, code);
    }

    let schain = prebid
        .and_then(|p| p.schains.as_ref())
        .and_then(|schains| select_for_partner(schains.iter().map(|s| (&s.bidders, &s.schain)), partner))
        .cloned();
    if let Some(schain) = schain {
        set_schain(&mut scoped, schain);
    }

    scoped.ext = scoped_ext(request.ext.as_ref(), partner, multibid);
    Ok(scoped)
}

/// 按合作方挑选配置：明确列出该合作方的优先于通配符
fn select_for_partner<'a, T: 'a>(
    entries: impl Iterator<Item = (&'a Vec<String>, &'a T)> + Clone,
    partner: &str,
) -> Option<&'a T> {
    entries
        .clone()
        .find(|(bidders, _)| bidders.iter().any(|b| b == partner))
        .or_else(|| entries.into_iter().find(|(bidders, _)| bidders.iter().any(|b| b == WILDCARD)))
        .map(|(_, value)| value)
}

/// imp.ext 只保留该合作方自己的配置片段，放到 `bidder` 下
fn scoped_imp(imp: &Imp, fragment: Value, legacy: bool, strip_fpd: bool) -> Imp {
    let mut imp = imp.clone();
    let mut ext = imp.ext.take().unwrap_or_default();

    let prebid_empty = match ext.get_mut("prebid") {
        Some(Value::Object(prebid)) => {
            prebid.remove("bidder");
            prebid.is_empty()
        }
        _ => false,
    };
    if prebid_empty {
        ext.remove("prebid");
    }
    if legacy {
        ext.retain(|key, _| RESERVED_IMP_EXT_KEYS.contains(key.as_str()));
    }
    if strip_fpd {
        if let Some(Value::Object(context)) = ext.get_mut("context") {
            context.remove("data");
        }
    }

    ext.insert("bidder".to_string(), fragment);
    imp.ext = Some(ext);
    imp
}

/// 去掉第一方数据：user.data, user.ext.data, site.content.data, site.ext.data, app.ext.data
fn strip_first_party_data(request: &mut BidRequest) {
    if let Some(user) = request.user.as_mut() {
        user.data = None;
        if let Some(ext) = user.ext.as_mut() {
            ext.data = None;
        }
        if user.ext.as_ref().map(|ext| ext.is_empty()).unwrap_or(false) {
            user.ext = None;
        }
    }

    if let Some(site) = request.site.as_mut() {
        if let Some(content) = site.content.as_mut() {
            content.data = None;
        }
        if let Some(ext) = site.ext.as_mut() {
            ext.data = None;
        }
        if site.ext.as_ref().map(|ext| ext.is_empty()).unwrap_or(false) {
            site.ext = None;
        }
    }

    if let Some(app) = request.app.as_mut() {
        if let Some(ext) = app.ext.as_mut() {
            ext.data = None;
        }
        if app.ext.as_ref().map(|ext| ext.is_empty()).unwrap_or(false) {
            app.ext = None;
        }
    }
}

/// JSON 合并：对象逐键递归，其余类型直接覆盖，null 表示删除
fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_json(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn merge_fragment<T: Serialize + DeserializeOwned>(original: Option<&T>, fragment: &Value) -> Result<T, AuctionError> {
    let invalid = |e: serde_json::Error| AuctionError::InvalidRequest(format!("Invalid bidder config: {}", e));
    let mut base = match original {
        Some(value) => serde_json::to_value(value).map_err(invalid)?,
        None => Value::Object(Map::new()),
    };
    merge_json(&mut base, fragment);
    serde_json::from_value(base).map_err(invalid)
}

fn merge_bidder_config(request: &mut BidRequest, ortb: &BidderConfigOrtb) -> Result<(), AuctionError> {
    if let Some(site) = &ortb.site {
        request.site = Some(merge_fragment(request.site.as_ref(), site)?);
    }
    if let Some(app) = &ortb.app {
        request.app = Some(merge_fragment(request.app.as_ref(), app)?);
    }
    if let Some(user) = &ortb.user {
        request.user = Some(merge_fragment::<User>(request.user.as_ref(), user)?);
    }

    if request.site.is_some() && request.app.is_some() {
        return Err(AuctionError::InvalidRequest(
            "Either site or app should be defined, but not both".to_string(),
        ));
    }
    Ok(())
}

fn eid_allowed(eid: &Eid, permissions: &[EidPermission], partner: &str, code: &str) -> bool {
    let mut rules = permissions.iter().filter(|p| p.source == eid.source).peekable();
    if rules.peek().is_none() {
        return true;
    }
    rules.any(|rule| {
        rule.bidders
            .iter()
            .any(|b| b == WILDCARD || b == partner || b == code)
    })
}

/// 按 eidpermissions 过滤 user.ext.eids，过滤后为空则置为 None
fn filter_eids(request: &mut BidRequest, permissions: &[EidPermission], partner: &str, code: &str) {
    let Some(ext) = request.user.as_mut().and_then(|user| user.ext.as_mut()) else {
        return;
    };
    if let Some(eids) = ext.eids.take() {
        let kept: Vec<Eid> = eids
            .into_iter()
            .filter(|eid| eid_allowed(eid, permissions, partner, code))
            .collect();
        ext.eids = if kept.is_empty() { None } else { Some(kept) };
    }
}

fn set_schain(request: &mut BidRequest, schain: SupplyChain) {
    let source = request.source.get_or_insert_with(Source::default);
    let ext = source.ext.get_or_insert_with(SourceExt::default);
    ext.schain = Some(schain);
}

/// ext.prebid 中只保留与该合作方相关的部分
fn scoped_ext(ext: Option<&ExtRequest>, partner: &str, multibid: Option<&MultiBidConfig>) -> Option<ExtRequest> {
    let mut ext = ext?.clone();
    if let Some(prebid) = ext.prebid.as_mut() {
        prebid.data = None;
        prebid.bidderconfig = None;
        prebid.schains = None;
        prebid.multibid = multibid.map(|config| vec![config.to_ext()]);
        prebid.bidders = prebid
            .bidders
            .take()
            .and_then(|bidders| bidders.get(partner).cloned())
            .map(|fragment| {
                let mut own = Map::new();
                own.insert("bidder".to_string(), fragment);
                own
            });
    }
    Some(ext)
}
