// src/bidding/transport.rs

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::bidding::adapter::{HttpCall, HttpReply};
use crate::error::PartnerError;

/// 出站 HTTP 传输抽象，测试中可替换
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, call: &HttpCall) -> Result<HttpReply, PartnerError>;
}

/// 基于 reqwest 的默认实现，连接池在所有合作方之间共享
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, call: &HttpCall) -> Result<HttpReply, PartnerError> {
        let method = Method::from_bytes(call.method.as_bytes())
            .map_err(|e| PartnerError::failed_to_request(format!("Invalid method {}: {}", call.method, e)))?;

        let mut builder = self.client.request(method, &call.uri).body(call.body.clone());
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PartnerError::timeout("Timed out")
            } else {
                PartnerError::failed_to_request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| PartnerError::bad_server_response(e.to_string()))?;

        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}
