//! Tax settings and where they come from.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TaxError;
use crate::provider::http_client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMethod {
    #[default]
    Manual,
    External,
}

/// One row of the rate table.
///
/// `state` and `postal_codes` narrow the rate; when set, the address must
/// match them for the rate to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRate {
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_codes: Vec<String>,
    /// Whether shipping is taxed at this rate.
    #[serde(default)]
    pub shipping: bool,
}

impl TaxRate {
    pub fn new(country: impl Into<String>, rate: Decimal) -> Self {
        Self {
            rate,
            country: country.into(),
            state: None,
            postal_codes: Vec::new(),
            shipping: false,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_postal_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.postal_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn taxing_shipping(mut self) -> Self {
        self.shipping = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxSettings {
    pub enabled: bool,
    pub calculation_method: CalculationMethod,
    #[serde(with = "rust_decimal::serde::float")]
    pub default_rate: Decimal,
    pub tax_shipping: bool,
    /// Tax code sent to the external provider for lines without their own.
    pub default_tax_code: Option<String>,
    /// Ordered; ties between equally specific rates keep the earlier one.
    pub rates: Vec<TaxRate>,
}

/// Tax off, manual method, no rates.
impl Default for TaxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            calculation_method: CalculationMethod::Manual,
            default_rate: Decimal::ZERO,
            tax_shipping: false,
            default_tax_code: None,
            rates: Vec::new(),
        }
    }
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn tax_settings(&self) -> Result<TaxSettings, TaxError>;
}

/// Fetches settings, falling back to [`TaxSettings::default`] on any failure.
pub async fn fetch_tax_settings(source: &dyn SettingsSource) -> TaxSettings {
    match source.tax_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load tax settings, using defaults");
            metrics::counter!("tax_settings_fallbacks_total").increment(1);
            TaxSettings::default()
        }
    }
}

/// Fixed settings, used when no settings service is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsSource {
    settings: TaxSettings,
}

impl StaticSettingsSource {
    pub fn new(settings: TaxSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn tax_settings(&self) -> Result<TaxSettings, TaxError> {
        Ok(self.settings.clone())
    }
}

/// Reads settings from `GET {base_url}/settings/tax`.
#[derive(Debug, Clone)]
pub struct HttpSettingsSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettingsSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TaxError> {
        Ok(Self::with_client(http_client(timeout)?, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SettingsSource for HttpSettingsSource {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn tax_settings(&self) -> Result<TaxSettings, TaxError> {
        let resp = self
            .client
            .get(format!("{}/settings/tax", self.base_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(TaxError::Upstream { status, message });
        }

        resp.json::<TaxSettings>()
            .await
            .map_err(|e| TaxError::InvalidResponse(e.to_string()))
    }
}
