// Deterministic cache keys for normalized search requests

use crate::model::{ProviderKind, SearchRequest};

const ABSENT: &str = "-";

/// Builds the cache key for `request` against `provider`.
///
/// The key depends only on provider, route, dates, trip type, currency and
/// continuation token, so it is identical for requests that only differ in
/// JSON field order, passenger count or post-fetch filters. Expects a request
/// that already went through [`SearchRequest::normalized`].
pub fn build_key(provider: ProviderKind, request: &SearchRequest, currency: &str) -> String {
    let trip = if request.round_trip { "rt" } else { "ow" };
    let mut key = format!(
        "{}:{}:{}:{}:{}:{}:{}",
        provider.as_str(),
        request.origin,
        request.destination,
        request.departure_date,
        request.return_date.as_deref().unwrap_or(ABSENT),
        trip,
        currency.to_ascii_uppercase(),
    );

    if let Some(token) = &request.continuation_token {
        key.push_str(":token=");
        key.push_str(token);
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(json: &str) -> String {
        let req: SearchRequest = serde_json::from_str(json).unwrap();
        build_key(ProviderKind::Structured, &req.normalized().unwrap(), "USD")
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let a = key_for(
            r#"{"origin":"JFK","destination":"LHR","departureDate":"2025-06-01","roundTrip":false}"#,
        );
        let b = key_for(
            r#"{"roundTrip":false,"departureDate":"2025-06-01","destination":"LHR","origin":"jfk"}"#,
        );
        assert_eq!(a, b);
        assert_eq!(a, "structured:JFK:LHR:2025-06-01:-:ow:USD");
    }

    #[test]
    fn test_filters_and_passengers_do_not_affect_key() {
        let plain = key_for(r#"{"origin":"JFK","destination":"LHR","departureDate":"2025-06-01"}"#);
        let filtered = key_for(
            r#"{"origin":"JFK","destination":"LHR","departureDate":"2025-06-01","maxStops":0,"adults":2}"#,
        );
        assert_eq!(plain, filtered);
    }

    #[test]
    fn test_every_keyed_field_changes_the_key() {
        let base = SearchRequest::round_trip("JFK", "LHR", "2025-06-01", "2025-06-08");
        let base_key = build_key(ProviderKind::Structured, &base, "USD");

        let mut variants = vec![
            build_key(ProviderKind::Scraped, &base, "USD"),
            build_key(ProviderKind::Structured, &base, "EUR"),
        ];

        let mut changed = base.clone();
        changed.origin = "EWR".to_string();
        variants.push(build_key(ProviderKind::Structured, &changed, "USD"));

        let mut changed = base.clone();
        changed.destination = "LGW".to_string();
        variants.push(build_key(ProviderKind::Structured, &changed, "USD"));

        let mut changed = base.clone();
        changed.departure_date = "2025-06-02".to_string();
        variants.push(build_key(ProviderKind::Structured, &changed, "USD"));

        let mut changed = base.clone();
        changed.return_date = Some("2025-06-09".to_string());
        variants.push(build_key(ProviderKind::Structured, &changed, "USD"));

        let mut changed = base.clone();
        changed.continuation_token = Some("abc".to_string());
        variants.push(build_key(ProviderKind::Structured, &changed, "USD"));

        for variant in variants {
            assert_ne!(variant, base_key);
        }
    }

    #[test]
    fn test_one_way_ignores_stray_return_date() {
        let plain = key_for(r#"{"origin":"JFK","destination":"LHR","departureDate":"2025-06-01"}"#);
        let stray = key_for(
            r#"{"origin":"JFK","destination":"LHR","departureDate":"2025-06-01","returnDate":"2025-06-08"}"#,
        );
        assert_eq!(plain, stray);
    }

    #[test]
    fn test_round_trip_and_one_way_never_collide() {
        let one_way = SearchRequest::one_way("JFK", "LHR", "2025-06-01");
        let mut flagged = one_way.clone();
        flagged.round_trip = true;

        assert_ne!(
            build_key(ProviderKind::Scraped, &one_way, "USD"),
            build_key(ProviderKind::Scraped, &flagged, "USD")
        );
    }
}
