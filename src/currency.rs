// Converts provider prices into the configured target currency

use std::collections::HashMap;

use crate::{
    error::SearchError,
    model::{NormalizedFlightOffer, ProviderKind},
};

/// Rewrites every offer price into `target`.
///
/// Offers already priced in `target` pass through untouched. `rates` maps a
/// source currency to units of `target` per unit; a missing rate fails the
/// whole batch so nothing half-converted gets cached.
pub fn convert_offers(
    provider: ProviderKind,
    offers: Vec<NormalizedFlightOffer>,
    target: &str,
    rates: &HashMap<String, f64>,
) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
    offers
        .into_iter()
        .map(|mut offer| {
            if offer.price.currency.eq_ignore_ascii_case(target) {
                offer.price.currency = target.to_string();
                return Ok(offer);
            }

            let source = offer.price.currency.to_ascii_uppercase();
            let rate = rates.get(&source).ok_or_else(|| {
                SearchError::upstream(
                    provider,
                    format!("no exchange rate from {source} to {target}"),
                )
            })?;

            offer.price.total = round_cents(offer.price.total * rate);
            offer.price.currency = target.to_string();
            Ok(offer)
        })
        .collect()
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
