//! Catalog payloads to store records.
//!
//! The standalone markets endpoint is the source of truth for market fields;
//! nested children under events contribute only `(market_id, event_id)`
//! linkage pairs.

use mirror_store::{EventRecord, MarketRecord};
use mirror_upstream::{CatalogEvent, CatalogMarket};

pub fn event_record(event: &CatalogEvent) -> EventRecord {
    EventRecord {
        id: event.id.clone(),
        title: event.title.clone(),
        slug: event.slug.clone(),
        description: event.description.clone(),
        image: event.image.clone(),
        icon: event.icon.clone(),
        start_date: event.start_date,
        end_date: event.end_date,
        volume: event.volume,
        volume_24h: event.volume_24h,
        liquidity: event.liquidity,
        active: event.active,
        closed: event.closed,
        archived: event.archived,
        tags: event.tags.clone(),
    }
}

pub fn market_record(market: &CatalogMarket) -> MarketRecord {
    MarketRecord {
        id: market.id.clone(),
        condition_id: market.condition_id.clone(),
        question: market.question.clone(),
        description: market.description.clone(),
        slug: market.slug.clone(),
        outcomes: market.outcomes.clone(),
        outcome_token_ids: market.outcome_token_ids.clone(),
        outcome_prices: market.outcome_prices.clone(),
        best_bid: market.best_bid,
        best_ask: market.best_ask,
        spread: market.spread,
        last_trade_price: market.last_trade_price,
        volume: market.volume,
        volume_24h: market.volume_24h,
        liquidity: market.liquidity,
        category: market.category.clone(),
        end_date: market.end_date,
        active: market.active,
        closed: market.closed,
        archived: market.archived,
        resolved: market.resolved,
        winning_outcome: market.winning_outcome,
    }
}

/// Collects `(market_id, event_id)` pairs from one event page. Events with
/// no nested children contribute nothing and are counted so the caller can
/// log how much linkage data the page was missing.
pub fn collect_link_pairs(events: &[CatalogEvent]) -> (Vec<(String, String)>, usize) {
    let mut pairs = Vec::new();
    let mut without_children = 0;
    for event in events {
        if event.markets.is_empty() {
            without_children += 1;
            continue;
        }
        for market in &event.markets {
            pairs.push((market.id.clone(), event.id.clone()));
        }
    }
    (pairs, without_children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn catalog_event(id: &str, market_ids: &[&str]) -> CatalogEvent {
        CatalogEvent {
            id: id.to_string(),
            title: format!("Event {id}"),
            slug: format!("event-{id}"),
            description: String::new(),
            image: None,
            icon: None,
            start_date: None,
            end_date: None,
            volume: dec!(0),
            volume_24h: dec!(0),
            liquidity: dec!(0),
            active: true,
            closed: false,
            archived: false,
            tags: vec![],
            markets: market_ids.iter().map(|m| catalog_market(m)).collect(),
        }
    }

    fn catalog_market(id: &str) -> CatalogMarket {
        CatalogMarket {
            id: id.to_string(),
            condition_id: format!("0x{id}"),
            question: String::new(),
            description: String::new(),
            slug: String::new(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_token_ids: vec![format!("{id}-yes"), format!("{id}-no")],
            outcome_prices: vec![dec!(0.5), dec!(0.5)],
            best_bid: None,
            best_ask: None,
            spread: None,
            last_trade_price: None,
            volume: dec!(0),
            volume_24h: dec!(0),
            liquidity: dec!(0),
            category: None,
            end_date: None,
            active: true,
            closed: false,
            archived: false,
            resolved: false,
            winning_outcome: None,
        }
    }

    #[test]
    fn market_record_carries_parallel_sequences() {
        let market = catalog_market("m1");
        let record = market_record(&market);
        assert_eq!(record.outcomes.len(), record.outcome_token_ids.len());
        assert_eq!(record.outcomes.len(), record.outcome_prices.len());
        assert_eq!(record.condition_id, "0xm1");
    }

    #[test]
    fn link_pairs_come_from_nested_children() {
        let events = vec![
            catalog_event("ev1", &["m1", "m2"]),
            catalog_event("ev2", &[]),
            catalog_event("ev3", &["m3"]),
        ];
        let (pairs, without_children) = collect_link_pairs(&events);
        assert_eq!(
            pairs,
            vec![
                ("m1".to_string(), "ev1".to_string()),
                ("m2".to_string(), "ev1".to_string()),
                ("m3".to_string(), "ev3".to_string()),
            ]
        );
        assert_eq!(without_children, 1);
    }

    #[test]
    fn event_record_copies_flags_verbatim() {
        let mut event = catalog_event("ev1", &[]);
        event.closed = true;
        event.active = true;
        let record = event_record(&event);
        // The store's merge rule recomputes `active`; conversion only relays.
        assert!(record.closed);
        assert!(record.active);
    }
}
