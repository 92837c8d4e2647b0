//! Tax calculation for checkout.
//!
//! An external provider is tried first when the settings ask for it; any
//! provider failure falls back to the local rate table.

pub mod calculator;
pub mod error;
pub mod provider;
pub mod rate_table;
pub mod settings;
pub mod types;

pub use calculator::TaxCalculator;
pub use error::TaxError;
pub use provider::{
    DEFAULT_HTTP_TIMEOUT, HttpTaxProvider, ProviderTaxLine, ProviderTaxRequest, ProviderTaxResult, TaxProvider,
    UnconfiguredTaxProvider,
};
pub use rate_table::{best_rate, jurisdiction_label};
pub use settings::{
    CalculationMethod, HttpSettingsSource, SettingsSource, StaticSettingsSource, TaxRate,
    TaxSettings, fetch_tax_settings,
};
pub use types::{Address, TaxBreakdown, TaxCalculationResult, TaxLineItem, TaxProviderKind};
