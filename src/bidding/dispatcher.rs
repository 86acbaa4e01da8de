// src/bidding/dispatcher.rs

use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

use crate::bidding::adapter::{AdapterRegistry, PartnerAdapter};
use crate::bidding::transport::HttpTransport;
use crate::error::PartnerError;
use crate::model::bid::Bid;
use crate::model::partner::{PartnerCatalog, PartnerConfig, PartnerRequest, PartnerResponse};

/// **并发分发器**
/// 每个合作方一个任务，任务之间互不影响；超时、panic 都只影响自己的 PartnerResponse。
pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    transport: Arc<dyn HttpTransport>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AdapterRegistry>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { registry, transport }
    }

    /// 并发请求所有合作方，结果与输入按位置一一对应
    pub async fn dispatch(&self, requests: Vec<PartnerRequest>, catalog: &PartnerCatalog) -> Vec<PartnerResponse> {
        let identities: Vec<(String, String)> = requests
            .iter()
            .map(|request| (request.partner.clone(), request.code.clone()))
            .collect();
        let started = Instant::now();

        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let partner = catalog.get(&request.code).cloned();
                let adapter = partner.as_ref().and_then(|p| self.registry.get(&p.adapter));
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let start = Instant::now();
                    let deadline = request.deadline.instant();
                    let outcome = timeout_at(deadline, request_partner(&request, partner, adapter, transport)).await;
                    let elapsed = start.elapsed().as_millis() as u64;
                    match outcome {
                        Ok((bids, errors)) => {
                            tracing::debug!(
                                partner = %request.partner,
                                bids = bids.len(),
                                errors = errors.len(),
                                elapsed_ms = elapsed,
                                "partner responded"
                            );
                            PartnerResponse::new(&request.partner, &request.code, bids, errors, elapsed)
                        }
                        Err(_) => {
                            tracing::warn!(partner = %request.partner, elapsed_ms = elapsed, "partner timed out");
                            PartnerResponse::failed(
                                &request.partner,
                                &request.code,
                                PartnerError::timeout("Timed out"),
                                elapsed,
                            )
                        }
                    }
                })
            })
            .collect();

        join_all(tasks)
            .await
            .into_iter()
            .zip(identities)
            .map(|(result, (partner, code))| match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(partner = %partner, error = %e, "partner task failed");
                    PartnerResponse::failed(
                        &partner,
                        &code,
                        PartnerError::generic(format!("Partner task failed: {}", e)),
                        started.elapsed().as_millis() as u64,
                    )
                }
            })
            .collect()
    }
}

/// 单个合作方：生成 HTTP 调用，并发执行，解析出价并校验
async fn request_partner(
    request: &PartnerRequest,
    partner: Option<PartnerConfig>,
    adapter: Option<Arc<dyn PartnerAdapter>>,
    transport: Arc<dyn HttpTransport>,
) -> (Vec<Bid>, Vec<PartnerError>) {
    let Some(partner) = partner else {
        return (
            Vec::new(),
            vec![PartnerError::generic(format!("Partner {} is not configured", request.code))],
        );
    };
    let Some(adapter) = adapter else {
        return (
            Vec::new(),
            vec![PartnerError::generic(format!(
                "No adapter registered under the name {}",
                partner.adapter
            ))],
        );
    };

    let (calls, mut errors) = adapter.make_requests(request, &partner);
    let replies = join_all(calls.iter().map(|call| transport.execute(call))).await;

    let mut bids = Vec::new();
    for (call, reply) in calls.iter().zip(replies) {
        match reply.and_then(|reply| adapter.make_bids(request, call, &reply)) {
            Ok(mut call_bids) => bids.append(&mut call_bids),
            Err(e) => errors.push(e),
        }
    }

    let (bids, mut invalid) = validate_bids(request, bids);
    errors.append(&mut invalid);
    (bids, errors)
}

/// 丢弃结构不合法的出价，每个被丢弃的出价产生一条 generic 错误
pub fn validate_bids(request: &PartnerRequest, bids: Vec<Bid>) -> (Vec<Bid>, Vec<PartnerError>) {
    let mut valid = Vec::with_capacity(bids.len());
    let mut errors = Vec::new();

    for bid in bids {
        let problem = if bid.id.is_empty() {
            Some("Bid missing required field 'id'".to_string())
        } else if bid.imp_id.is_empty() {
            Some(format!("Bid \"{}\" missing required field 'impid'", bid.id))
        } else if request.request.find_imp(&bid.imp_id).is_none() {
            Some(format!(
                "Bid \"{}\" has no corresponding imp \"{}\" in request",
                bid.id, bid.imp_id
            ))
        } else if bid.price.is_sign_negative() {
            Some(format!("Bid \"{}\" does not contain a positive 'price'", bid.id))
        } else {
            None
        };

        match problem {
            Some(message) => {
                tracing::warn!(partner = %request.partner, %message, "bid dropped by validation");
                errors.push(PartnerError::generic(message));
            }
            None => valid.push(bid),
        }
    }

    (valid, errors)
}
