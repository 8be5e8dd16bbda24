// Post-fetch filtering and price ordering of normalized offers

use crate::model::{NormalizedFlightOffer, SearchFilters};

fn price_ok(offer: &NormalizedFlightOffer, max_price: Option<f64>) -> bool {
    max_price.map_or(true, |max| offer.price.total <= max)
}

fn stops_ok(offer: &NormalizedFlightOffer, max_stops: Option<usize>) -> bool {
    max_stops.map_or(true, |max| {
        offer.itineraries.iter().all(|it| it.stops() <= max)
    })
}

// Every itinerary needs at least one allowed carrier
fn airlines_ok(offer: &NormalizedFlightOffer, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    offer.itineraries.iter().all(|it| {
        it.segments.iter().any(|seg| {
            allowed
                .iter()
                .any(|code| code.eq_ignore_ascii_case(&seg.carrier_code))
        })
    })
}

/// Applies price ceiling, stop limit and airline allow-list in that order,
/// then sorts by ascending total price. The sort is stable so equally priced
/// offers keep their upstream order.
pub fn filter_offers(
    offers: Vec<NormalizedFlightOffer>,
    filters: &SearchFilters,
) -> Vec<NormalizedFlightOffer> {
    let allowed = filters.airlines.as_deref().unwrap_or(&[]);

    let mut filtered: Vec<NormalizedFlightOffer> = offers
        .into_iter()
        .filter(|offer| price_ok(offer, filters.max_price))
        .filter(|offer| stops_ok(offer, filters.max_stops))
        .filter(|offer| airlines_ok(offer, allowed))
        .collect();

    filtered.sort_by(|a, b| a.price.total.total_cmp(&b.price.total));
    filtered
}
