//! Rate selection by jurisdiction specificity.

use crate::settings::TaxRate;
use crate::types::Address;

const COUNTRY_SCORE: u32 = 1;
const STATE_SCORE: u32 = 10;
const POSTAL_SCORE: u32 = 100;

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Specificity of `rate` for `address`, or `None` if it does not apply.
fn score(rate: &TaxRate, address: &Address) -> Option<u32> {
    if !same_text(&rate.country, &address.country) {
        return None;
    }
    let mut score = COUNTRY_SCORE;

    if let Some(state) = &rate.state {
        match &address.state {
            Some(addr_state) if same_text(state, addr_state) => score += STATE_SCORE,
            _ => return None,
        }
    }

    if !rate.postal_codes.is_empty() {
        let postal = address.postal_code.as_deref()?;
        if rate.postal_codes.iter().any(|code| same_text(code, postal)) {
            score += POSTAL_SCORE;
        } else {
            return None;
        }
    }

    Some(score)
}

/// The most specific applicable rate; the earliest wins ties.
pub fn best_rate<'a>(rates: &'a [TaxRate], address: &Address) -> Option<&'a TaxRate> {
    let mut best: Option<(&TaxRate, u32)> = None;
    for rate in rates {
        if let Some(s) = score(rate, address)
            && best.is_none_or(|(_, top)| s > top)
        {
            best = Some((rate, s));
        }
    }
    best.map(|(rate, _)| rate)
}

/// Breakdown label for a matched rate, e.g. `US-CA-94103`.
pub fn jurisdiction_label(rate: &TaxRate, address: &Address) -> String {
    let mut label = rate.country.trim().to_uppercase();
    if let Some(state) = &rate.state {
        label.push('-');
        label.push_str(&state.trim().to_uppercase());
    }
    if !rate.postal_codes.is_empty()
        && let Some(postal) = &address.postal_code
    {
        label.push('-');
        label.push_str(&postal.trim().to_uppercase());
    }
    label
}
