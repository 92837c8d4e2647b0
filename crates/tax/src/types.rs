use common::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub country: String,
}

impl Address {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }
}

/// One taxable line: the extended amount of a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLineItem {
    pub id: String,
    pub amount: Money,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub jurisdiction: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub amount: Money,
}

/// Which path produced a tax result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxProviderKind {
    #[default]
    None,
    Manual,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxCalculationResult {
    pub tax_amount: Money,
    /// Effective rate over the taxable base.
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub breakdown: Vec<TaxBreakdown>,
    pub provider: TaxProviderKind,
}

impl TaxCalculationResult {
    /// No tax, because tax is disabled or there is no jurisdiction.
    pub fn none() -> Self {
        Self {
            tax_amount: Money::zero(),
            rate: Decimal::ZERO,
            breakdown: Vec::new(),
            provider: TaxProviderKind::None,
        }
    }
}
