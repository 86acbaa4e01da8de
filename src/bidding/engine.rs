// src/bidding/engine.rs

use std::sync::Arc;
use std::time::Duration;

use crate::auction::multibid::resolve_multibid;
use crate::auction::privacy::{PassThroughPrivacy, PrivacyEnforcement};
use crate::auction::scoper::{partner_names, scope};
use crate::bidding::adapter::AdapterRegistry;
use crate::bidding::assembler::{AssemblyInput, ResponseAssembler, SeatBidAssembler};
use crate::bidding::category::{CategoryDeduper, CategoryMappingResult, CategoryStore};
use crate::bidding::deadline::Deadline;
use crate::bidding::dispatcher::Dispatcher;
use crate::bidding::price::{CurrencyConverter, PriceNormalizer, RateTable};
use crate::bidding::transport::HttpTransport;
use crate::config::config_manager::ConfigManager;
use crate::error::AuctionError;
use crate::logging::auction_log::AuctionLog;
use crate::logging::runtime_logger::RuntimeLogger;
use crate::model::context::AuctionContext;
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::BidResponse;

/// **竞价编排器**
/// 拆分请求 -> 隐私执行 -> 并发分发 -> 价格归一化 -> 类目去重 -> 组装响应。
/// 各阶段依赖都可以替换，默认值足够让服务独立运行。
pub struct Exchange {
    config: Arc<ConfigManager>,
    transport: Arc<dyn HttpTransport>,
    dispatcher: Dispatcher,
    privacy: Arc<dyn PrivacyEnforcement>,
    normalizer: PriceNormalizer,
    deduper: CategoryDeduper,
    assembler: Arc<dyn ResponseAssembler>,
    runtime_logger: Option<Arc<RuntimeLogger>>,
}

impl Exchange {
    pub fn new(config: Arc<ConfigManager>, transport: Arc<dyn HttpTransport>, store: Arc<dyn CategoryStore>) -> Self {
        let settings = &config.config;
        let rates = Arc::new(RateTable::new(settings.currency_rates.clone()));
        let normalizer = PriceNormalizer::new(rates, &settings.default_currency);
        let deduper = CategoryDeduper::new(store, Duration::from_millis(settings.category_lookup_timeout_ms));
        let dispatcher = Dispatcher::new(Arc::new(AdapterRegistry::with_defaults()), Arc::clone(&transport));

        Self {
            config,
            transport,
            dispatcher,
            privacy: Arc::new(PassThroughPrivacy),
            normalizer,
            deduper,
            assembler: Arc::new(SeatBidAssembler),
            runtime_logger: None,
        }
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.dispatcher = Dispatcher::new(Arc::new(registry), Arc::clone(&self.transport));
        self
    }

    pub fn with_privacy(mut self, privacy: Arc<dyn PrivacyEnforcement>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn CurrencyConverter>) -> Self {
        self.normalizer = PriceNormalizer::new(converter, &self.config.config.default_currency);
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn ResponseAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_runtime_logger(mut self, runtime_logger: Arc<RuntimeLogger>) -> Self {
        self.runtime_logger = Some(runtime_logger);
        self
    }

    /// 执行一次完整竞价
    /// 只有整场级别的错误才返回 Err；合作方错误都挂在响应 ext.errors 中。
    pub async fn hold_auction(&self, request: BidRequest, context: AuctionContext) -> Result<BidResponse, AuctionError> {
        let mut log = AuctionLog::new(&request.id, context.account_id.as_deref());
        let outcome = self.run(&request, &context, &mut log).await;

        match &outcome {
            Ok(response) => {
                let bid_count = response.seatbid.iter().map(|s| s.bid.len()).sum();
                log.succeed(bid_count, context.elapsed_ms());
                tracing::info!(
                    request_id = %request.id,
                    partners = log.partner_attempts,
                    bids = bid_count,
                    rejected = log.rejected_count,
                    elapsed_ms = log.elapsed_ms,
                    "auction finished"
                );
            }
            Err(e) => {
                log.fail(e, context.elapsed_ms());
                tracing::warn!(request_id = %request.id, error = %e, elapsed_ms = log.elapsed_ms, "auction failed");
            }
        }

        if let Some(runtime_logger) = &self.runtime_logger {
            match serde_json::to_value(&log) {
                Ok(record) => runtime_logger.log_value(log.level(), record).await,
                Err(e) => tracing::error!(error = %e, "unable to serialize auction log"),
            }
        }

        outcome
    }

    async fn run(&self, request: &BidRequest, context: &AuctionContext, log: &mut AuctionLog) -> Result<BidResponse, AuctionError> {
        let settings = &self.config.config;
        let tmax = settings.resolve_timeout(context.timeout_ms.or(request.tmax));
        log.tmax_ms = Some(tmax);

        // 只有请求要求缓存时才为缓存写入预留时间
        let reserved = if request.caching_requested() {
            settings.expected_cache_time_ms
        } else {
            0
        };
        let deadline = Deadline::from_tmax(context.start_time, tmax).reserve(reserved)?;

        let catalog = self.config.catalog();
        let declarations = request
            .prebid()
            .and_then(|prebid| prebid.multibid.as_deref())
            .unwrap_or_default();
        let (multibid, mut warnings) = resolve_multibid(declarations);

        let partners = partner_names(request);
        let decisions = self.privacy.enforce(request, &partners).await?;

        let scoped = scope(request, &catalog, &multibid, &decisions, deadline)?;
        warnings.extend(scoped.warnings);
        tracing::debug!(
            request_id = %request.id,
            partners = scoped.requests.len(),
            remaining_ms = deadline.remaining().as_millis() as u64,
            "request scoped"
        );

        let responses = self.dispatcher.dispatch(scoped.requests, &catalog).await;
        let responses = self.normalizer.normalize(request, responses, &catalog);
        for response in &responses {
            log.add_partner_log(response);
        }

        let mapping = match request.targeting() {
            Some(targeting) if targeting.includebrandcategory.is_some() => {
                self.deduper.apply(responses, targeting, deadline).await?
            }
            _ => CategoryMappingResult {
                responses,
                ..Default::default()
            },
        };
        log.rejected_count = mapping.rejections.len();

        let (currency, _) = self.normalizer.settlement_currency(request);
        self.assembler.assemble(AssemblyInput {
            request,
            mapping: &mapping,
            multibid: &multibid,
            warnings: &warnings,
            currency: &currency,
            tmax,
        })
    }
}
