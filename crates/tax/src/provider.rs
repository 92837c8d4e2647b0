//! External tax-calculation provider.

use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};

use crate::error::TaxError;
use crate::types::{Address, TaxBreakdown};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTaxLine {
    pub id: String,
    pub amount: Money,
    pub quantity: u32,
    pub tax_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTaxRequest {
    pub lines: Vec<ProviderTaxLine>,
    /// Present only when shipping is taxable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_cost: Option<Money>,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTaxResult {
    pub amount: Money,
    #[serde(default)]
    pub breakdown: Vec<TaxBreakdown>,
}

#[async_trait]
pub trait TaxProvider: Send + Sync {
    async fn calculate(&self, request: &ProviderTaxRequest) -> Result<ProviderTaxResult, TaxError>;
}

/// Stands in when no provider is configured; every call fails, so the
/// calculator always uses the manual path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTaxProvider;

#[async_trait]
impl TaxProvider for UnconfiguredTaxProvider {
    async fn calculate(&self, _request: &ProviderTaxRequest) -> Result<ProviderTaxResult, TaxError> {
        Err(TaxError::NotConfigured)
    }
}

/// Default limit on one call to the tax provider or settings service.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// An HTTP client whose requests fail after `timeout`.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, TaxError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Calls `POST {base_url}/tax/calculate` with a bearer API key.
///
/// Requests that outlast the timeout fail, so the calculator falls back to
/// the manual path.
#[derive(Debug, Clone)]
pub struct HttpTaxProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTaxProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TaxError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl TaxProvider for HttpTaxProvider {
    #[tracing::instrument(skip(self, request), fields(lines = request.lines.len()))]
    async fn calculate(&self, request: &ProviderTaxRequest) -> Result<ProviderTaxResult, TaxError> {
        let mut builder = self
            .client
            .post(format!("{}/tax/calculate", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(TaxError::Upstream { status, message });
        }

        resp.json::<ProviderTaxResult>()
            .await
            .map_err(|e| TaxError::InvalidResponse(e.to_string()))
    }
}
