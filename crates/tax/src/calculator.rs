use std::sync::Arc;

use common::Money;
use rust_decimal::prelude::*;

use crate::provider::{ProviderTaxLine, ProviderTaxRequest, TaxProvider};
use crate::rate_table::{best_rate, jurisdiction_label};
use crate::settings::{CalculationMethod, TaxSettings};
use crate::types::{Address, TaxBreakdown, TaxCalculationResult, TaxLineItem, TaxProviderKind};

const DEFAULT_JURISDICTION: &str = "default";
const RATE_DECIMAL_PLACES: u32 = 6;

/// Rounds to a whole minor unit, half away from zero.
///
/// Saturates at the `i64` bounds instead of wrapping.
fn round_minor(value: Decimal) -> Money {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let cents = rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    });
    Money::from_cents(cents)
}

fn apply_rate(amount: Money, rate: Decimal) -> Money {
    round_minor(Decimal::from(amount.cents()).saturating_mul(rate))
}

/// Computes tax for a checkout.
#[derive(Clone)]
pub struct TaxCalculator {
    provider: Arc<dyn TaxProvider>,
}

impl TaxCalculator {
    pub fn new(provider: Arc<dyn TaxProvider>) -> Self {
        Self { provider }
    }

    /// Never fails: provider errors fall back to the manual rate table.
    #[tracing::instrument(skip(self, line_items, settings), fields(lines = line_items.len()))]
    pub async fn calculate_tax(
        &self,
        line_items: &[TaxLineItem],
        shipping_address: Option<&Address>,
        shipping_cost: Money,
        settings: &TaxSettings,
    ) -> TaxCalculationResult {
        if !settings.enabled {
            return TaxCalculationResult::none();
        }
        // Tax needs a jurisdiction.
        let Some(address) = shipping_address else {
            return TaxCalculationResult::none();
        };

        if settings.calculation_method == CalculationMethod::External {
            let request = ProviderTaxRequest {
                lines: line_items
                    .iter()
                    .map(|line| ProviderTaxLine {
                        id: line.id.clone(),
                        amount: line.amount,
                        quantity: line.quantity,
                        tax_code: line
                            .tax_code
                            .clone()
                            .or_else(|| settings.default_tax_code.clone()),
                    })
                    .collect(),
                shipping_cost: settings.tax_shipping.then_some(shipping_cost),
                address: address.clone(),
            };

            match self.provider.calculate(&request).await {
                Ok(result) => {
                    let base = taxable_sum(line_items)
                        + if settings.tax_shipping {
                            shipping_cost
                        } else {
                            Money::zero()
                        };
                    return TaxCalculationResult {
                        tax_amount: result.amount,
                        rate: effective_rate(result.amount, base),
                        breakdown: result.breakdown,
                        provider: TaxProviderKind::External,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "External tax provider failed, using manual rates");
                    metrics::counter!("tax_provider_fallbacks_total").increment(1);
                }
            }
        }

        manual(line_items, address, shipping_cost, settings)
    }
}

fn taxable_sum(line_items: &[TaxLineItem]) -> Money {
    line_items.iter().map(|line| line.amount).sum()
}

fn effective_rate(tax: Money, base: Money) -> Decimal {
    if !base.is_positive() {
        return Decimal::ZERO;
    }
    (Decimal::from(tax.cents()) / Decimal::from(base.cents()))
        .round_dp_with_strategy(RATE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

fn manual(
    line_items: &[TaxLineItem],
    address: &Address,
    shipping_cost: Money,
    settings: &TaxSettings,
) -> TaxCalculationResult {
    let matched = best_rate(&settings.rates, address);
    let (rate, tax_shipping, jurisdiction) = match matched {
        Some(r) => (r.rate, r.shipping, jurisdiction_label(r, address)),
        None => (
            settings.default_rate,
            settings.tax_shipping,
            DEFAULT_JURISDICTION.to_string(),
        ),
    };

    let mut tax = apply_rate(taxable_sum(line_items), rate);
    if tax_shipping {
        tax += apply_rate(shipping_cost, rate);
    }

    TaxCalculationResult {
        tax_amount: tax,
        rate,
        breakdown: vec![TaxBreakdown {
            jurisdiction,
            rate,
            amount: tax,
        }],
        provider: TaxProviderKind::Manual,
    }
}
