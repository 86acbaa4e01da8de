// src/bidding/category.rs

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::bidding::deadline::Deadline;
use crate::bidding::granularity::PriceGranularity;
use crate::error::{AuctionError, StoreError};
use crate::model::adapters::CategoryTable;
use crate::model::bid::{Bid, MediaType};
use crate::model::partner::PartnerResponse;
use crate::openrtb::request::{ExtIncludeBrandCategory, ExtRequestTargeting};

/// 类目翻译存储：(ad server, publisher, 原始类目) -> 翻译后的类目
#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn lookup(&self, ad_server: &str, publisher: &str, category: &str) -> Result<Option<String>, StoreError>;
}

/// 基于内存表的存储，数据来自 categories 文件
#[derive(Debug, Clone, Default)]
pub struct InMemoryCategoryStore {
    table: CategoryTable,
}

impl InMemoryCategoryStore {
    pub fn new(table: CategoryTable) -> Self {
        Self { table }
    }

    pub fn insert(&mut self, ad_server: &str, publisher: &str, category: &str, translated: &str) {
        self.table
            .entry(ad_server.to_string())
            .or_default()
            .entry(publisher.to_string())
            .or_default()
            .insert(category.to_string(), translated.to_string());
    }
}

#[async_trait]
impl CategoryStore for InMemoryCategoryStore {
    async fn lookup(&self, ad_server: &str, publisher: &str, category: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .table
            .get(ad_server)
            .and_then(|publishers| publishers.get(publisher))
            .and_then(|categories| categories.get(category))
            .cloned())
    }
}

/// 支持类目翻译的主广告服务器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryAdServer {
    Freewheel,
    Dfp,
}

impl PrimaryAdServer {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(PrimaryAdServer::Freewheel),
            2 => Some(PrimaryAdServer::Dfp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimaryAdServer::Freewheel => "freewheel",
            PrimaryAdServer::Dfp => "dfp",
        }
    }
}

/// 去重分组键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupingKey {
    Category(String),
    PriceDuration { price: String, duration: u32 },
}

/// **类目映射结果**
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMappingResult {
    /// partner -> bid id -> "{价格档}_{类目}_{时长}s"
    pub bid_categories: HashMap<String, HashMap<String, String>>,
    /// 去掉被拒出价后的合作方响应，顺序与输入一致
    pub responses: Vec<PartnerResponse>,
    pub rejections: Vec<String>,
}

/// 本次去重的固定参数
struct MappingRules {
    ad_server: Option<PrimaryAdServer>,
    publisher: String,
    with_category: bool,
    /// 升序、去重、非空
    durations: Vec<u32>,
    max_duration: u32,
    granularity: PriceGranularity,
}

/// 通过基础校验、等待类目翻译的视频出价
struct Candidate {
    position: usize,
    response_index: usize,
    bid_index: usize,
    partner: String,
    bid_id: String,
    raw_category: String,
    duration: u32,
    price: String,
}

/// 完成翻译的出价
struct Resolved {
    candidate: Candidate,
    category: String,
}

impl Resolved {
    fn grouping_key(&self, with_category: bool) -> GroupingKey {
        if with_category {
            GroupingKey::Category(self.category.clone())
        } else {
            GroupingKey::PriceDuration {
                price: self.candidate.price.clone(),
                duration: self.candidate.duration,
            }
        }
    }

    fn display_key(&self, with_category: bool) -> String {
        if with_category {
            format!("{}_{}_{}s", self.candidate.price, self.category, self.candidate.duration)
        } else {
            format!("{}_{}s", self.candidate.price, self.candidate.duration)
        }
    }
}

struct Rejection {
    position: usize,
    response_index: usize,
    bid_index: usize,
    message: String,
}

impl Rejection {
    fn new(position: usize, response_index: usize, bid_index: usize, partner: &str, bid_id: &str, reason: &str) -> Self {
        Self {
            position,
            response_index,
            bid_index,
            message: format!(
                "Bid rejected [bidder: {}, bid ID: {}] with a reason: {}",
                partner, bid_id, reason
            ),
        }
    }

    fn for_candidate(candidate: &Candidate, reason: &str) -> Self {
        Self::new(
            candidate.position,
            candidate.response_index,
            candidate.bid_index,
            &candidate.partner,
            &candidate.bid_id,
            reason,
        )
    }
}

/// **品牌类目去重**
/// 只处理视频出价：翻译类目、按时长分档，同一分组只保留一个出价。
pub struct CategoryDeduper {
    store: Arc<dyn CategoryStore>,
    lookup_timeout: Duration,
}

impl CategoryDeduper {
    pub fn new(store: Arc<dyn CategoryStore>, lookup_timeout: Duration) -> Self {
        Self { store, lookup_timeout }
    }

    pub async fn apply(
        &self,
        responses: Vec<PartnerResponse>,
        targeting: &ExtRequestTargeting,
        deadline: Deadline,
    ) -> Result<CategoryMappingResult, AuctionError> {
        let Some(brand) = targeting.includebrandcategory.as_ref() else {
            return Ok(CategoryMappingResult {
                responses,
                ..Default::default()
            });
        };
        let rules = mapping_rules(brand, targeting)?;

        let mut rejections = Vec::new();
        let mut candidates = Vec::new();
        let mut position = 0;
        for (response_index, response) in responses.iter().enumerate() {
            for (bid_index, bid) in response.bids.iter().enumerate() {
                if bid.media_type != MediaType::Video {
                    continue;
                }
                match validate(bid, &rules) {
                    Ok((raw_category, duration)) => candidates.push(Candidate {
                        position,
                        response_index,
                        bid_index,
                        partner: response.partner.clone(),
                        bid_id: bid.id.clone(),
                        raw_category,
                        duration,
                        price: rules.granularity.bucket(bid.price),
                    }),
                    Err(reason) => rejections.push(Rejection::new(
                        position,
                        response_index,
                        bid_index,
                        &response.partner,
                        &bid.id,
                        &reason,
                    )),
                }
                position += 1;
            }
        }

        let resolved = self.translate(candidates, &rules, deadline, &mut rejections).await;

        // 同一分组：时长档位更大的胜出，相同时保留后出现的
        let mut winners: Vec<Option<Resolved>> = Vec::with_capacity(resolved.len());
        let mut groups: HashMap<GroupingKey, usize> = HashMap::new();
        for current in resolved {
            let key = current.grouping_key(rules.with_category);
            match groups.get(&key).copied() {
                Some(slot) => {
                    let incumbent_duration = winners[slot].as_ref().map(|w| w.candidate.duration).unwrap_or(0);
                    if current.candidate.duration >= incumbent_duration {
                        if let Some(loser) = winners[slot].take() {
                            rejections.push(Rejection::for_candidate(&loser.candidate, "Bid was deduplicated"));
                        }
                        winners[slot] = Some(current);
                    } else {
                        rejections.push(Rejection::for_candidate(&current.candidate, "Bid was deduplicated"));
                    }
                }
                None => {
                    groups.insert(key, winners.len());
                    winners.push(Some(current));
                }
            }
        }

        let mut bid_categories: HashMap<String, HashMap<String, String>> = HashMap::new();
        for winner in winners.iter().flatten() {
            bid_categories
                .entry(winner.candidate.partner.clone())
                .or_default()
                .insert(winner.candidate.bid_id.clone(), winner.display_key(rules.with_category));
        }

        rejections.sort_by_key(|r| r.position);
        let rejected: HashSet<(usize, usize)> = rejections.iter().map(|r| (r.response_index, r.bid_index)).collect();
        let responses = responses
            .into_iter()
            .enumerate()
            .map(|(response_index, mut response)| {
                let bids = std::mem::take(&mut response.bids);
                response.bids = bids
                    .into_iter()
                    .enumerate()
                    .filter(|(bid_index, _)| !rejected.contains(&(response_index, *bid_index)))
                    .map(|(_, bid)| bid)
                    .collect();
                response
            })
            .collect();

        let rejections: Vec<String> = rejections.into_iter().map(|r| r.message).collect();
        for message in &rejections {
            tracing::debug!(%message, "category mapping rejection");
        }

        Ok(CategoryMappingResult {
            bid_categories,
            responses,
            rejections,
        })
    }

    /// 并发翻译类目；关闭翻译时直接使用原始类目
    /// 所有查询共用一个截止时间：查询超时与整场竞价截止时间取较早者。
    async fn translate(
        &self,
        candidates: Vec<Candidate>,
        rules: &MappingRules,
        deadline: Deadline,
        rejections: &mut Vec<Rejection>,
    ) -> Vec<Resolved> {
        let Some(ad_server) = rules.ad_server else {
            return candidates
                .into_iter()
                .map(|candidate| {
                    let category = candidate.raw_category.clone();
                    Resolved { candidate, category }
                })
                .collect();
        };

        let lookup_deadline = deadline
            .bounded_by(Some(self.lookup_timeout.as_millis() as u64))
            .instant();
        let lookups = candidates.iter().map(|candidate| async move {
            match tokio::time::timeout_at(
                lookup_deadline,
                self.store.lookup(ad_server.name(), &rules.publisher, &candidate.raw_category),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            }
        });
        let results = join_all(lookups).await;

        let mut resolved = Vec::with_capacity(candidates.len());
        for (candidate, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(Some(category)) => resolved.push(Resolved { candidate, category }),
                Ok(None) => rejections.push(Rejection::for_candidate(
                    &candidate,
                    &format!(
                        "Category mapping storage for primary ad server: '{}', publisher: '{}' not found",
                        ad_server.name(),
                        rules.publisher
                    ),
                )),
                Err(e) => rejections.push(Rejection::for_candidate(&candidate, &e.to_string())),
            }
        }
        resolved
    }
}

/// 整场竞价级别的前置校验，失败即致命
fn mapping_rules(brand: &ExtIncludeBrandCategory, targeting: &ExtRequestTargeting) -> Result<MappingRules, AuctionError> {
    let translate = brand.translatecategories.unwrap_or(true);

    let ad_server = if translate {
        let id = brand.primaryadserver.ok_or_else(|| {
            AuctionError::CategoryMapping(
                "Primary ad server required but was not defined when translate category is enabled".to_string(),
            )
        })?;
        let ad_server = PrimaryAdServer::from_id(id).ok_or_else(|| {
            AuctionError::CategoryMapping(format!("Primary ad server `{}` is not recognized", id))
        })?;
        Some(ad_server)
    } else {
        None
    };

    let publisher = brand.publisher.clone().unwrap_or_default();
    if translate && publisher.is_empty() {
        return Err(AuctionError::CategoryMapping(
            "Publisher required but was not defined when translate category is enabled".to_string(),
        ));
    }

    let mut durations: Vec<u32> = targeting
        .durationrangesec
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|d| *d > 0)
        .collect();
    durations.sort_unstable();
    durations.dedup();
    let Some(max_duration) = durations.last().copied() else {
        return Err(AuctionError::CategoryMapping(
            "Duration range seconds must be defined when brand category is included".to_string(),
        ));
    };

    let granularity = PriceGranularity::for_video(targeting).map_err(AuctionError::InvalidRequest)?;

    Ok(MappingRules {
        ad_server,
        publisher,
        with_category: brand.withcategory.unwrap_or(false),
        durations,
        max_duration,
        granularity,
    })
}

/// 单个出价的类目与时长校验，返回 (原始类目, 时长档位)
fn validate(bid: &Bid, rules: &MappingRules) -> Result<(String, u32), String> {
    let category = match bid.categories.as_deref() {
        None | Some([]) => return Err("Bid did not contain a category".to_string()),
        Some([category]) => category.clone(),
        Some(_) => return Err("Bid has more than one category".to_string()),
    };

    let declared = bid.duration().unwrap_or(0);
    match rules.durations.iter().find(|bucket| declared <= **bucket) {
        Some(bucket) => Ok((category, *bucket)),
        None => Err(format!(
            "Bid duration '{}' exceeds maximum '{}'",
            declared, rules.max_duration
        )),
    }
}
