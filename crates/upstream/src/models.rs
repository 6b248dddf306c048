//! Upstream payload models.
//!
//! Raw types mirror the wire shape (including the catalog's JSON-encoded
//! string arrays and its mix of string and numeric number fields); decoded
//! types are what the rest of the indexer consumes. Unknown fields pass
//! through untouched: every raw struct validates only the subset it needs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

// ============================================================================
// Serde helpers
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Num(f64),
    Str(String),
}

/// The catalog serves numbers both as JSON numbers and as strings.
fn de_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        NumberOrString::Num(n) => Decimal::try_from(n).ok(),
        NumberOrString::Str(s) => parse_decimal(&s),
    }))
}

/// Parses a decimal string, accepting the bare ".53" form the feed emits.
#[must_use]
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix('.') {
        return Decimal::from_str(&format!("0.{rest}")).ok();
    }
    Decimal::from_str(trimmed).ok()
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Catalog (events + markets)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTag {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub volume_24hr: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<RawTag>>,
    /// Nested child markets. Optional; used for event linkage only.
    #[serde(default)]
    pub markets: Option<Vec<RawMarket>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    pub id: String,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    /// JSON string array: `"[\"Yes\", \"No\"]"`.
    #[serde(default)]
    pub outcomes: Option<String>,
    /// JSON string array: `"[\"0.53\", \"0.47\"]"`.
    #[serde(default)]
    pub outcome_prices: Option<String>,
    /// JSON string array of token ids.
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub best_ask: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub spread: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub last_trade_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub volume_24hr: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub archived: Option<bool>,
}

/// A decoded catalog event.
#[derive(Debug, Clone)]
pub struct CatalogEvent {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub image: Option<String>,
    pub icon: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub tags: Vec<String>,
    /// Child markets as reported inline by the events endpoint.
    pub markets: Vec<CatalogMarket>,
}

impl From<RawEvent> for CatalogEvent {
    fn from(raw: RawEvent) -> Self {
        let tags = raw
            .tags
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| t.label.or(t.slug))
            .collect();
        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            slug: raw.slug.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            image: raw.image,
            icon: raw.icon,
            start_date: raw.start_date.as_deref().and_then(parse_instant),
            end_date: raw.end_date.as_deref().and_then(parse_instant),
            volume: raw.volume.unwrap_or_default().max(Decimal::ZERO),
            volume_24h: raw.volume_24hr.unwrap_or_default().max(Decimal::ZERO),
            liquidity: raw.liquidity.unwrap_or_default().max(Decimal::ZERO),
            active: raw.active.unwrap_or(false),
            closed: raw.closed.unwrap_or(false),
            archived: raw.archived.unwrap_or(false),
            tags,
            markets: raw.markets.unwrap_or_default().into_iter().map(Into::into).collect(),
        }
    }
}

/// A decoded catalog market with its three outcome sequences aligned.
#[derive(Debug, Clone)]
pub struct CatalogMarket {
    pub id: String,
    pub condition_id: String,
    pub question: String,
    pub description: String,
    pub slug: String,
    pub outcomes: Vec<String>,
    pub outcome_token_ids: Vec<String>,
    pub outcome_prices: Vec<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub resolved: bool,
    pub winning_outcome: Option<i32>,
}

impl From<RawMarket> for CatalogMarket {
    fn from(raw: RawMarket) -> Self {
        let token_ids: Vec<String> = raw
            .clob_token_ids
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        // Token ids anchor the outcome arity; labels and prices are resized
        // to match so the three sequences stay parallel.
        let arity = token_ids.len();

        let mut outcomes: Vec<String> = raw
            .outcomes
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| vec!["Yes".to_string(), "No".to_string()]);
        outcomes.resize_with(arity, || String::new());
        for (i, label) in outcomes.iter_mut().enumerate() {
            if label.is_empty() {
                *label = format!("Outcome {}", i + 1);
            }
        }

        let mut prices: Vec<Decimal> = raw
            .outcome_prices
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .map(|raw_prices| {
                raw_prices
                    .iter()
                    .map(|p| parse_decimal(p).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        prices.resize(arity, Decimal::ZERO);
        for price in &mut prices {
            *price = (*price).clamp(Decimal::ZERO, Decimal::ONE);
        }

        let closed = raw.closed.unwrap_or(false);
        let (resolved, winning_outcome) = resolution_from_prices(closed, &prices);

        Self {
            id: raw.id,
            condition_id: raw.condition_id.unwrap_or_default(),
            question: raw.question.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            slug: raw.slug.unwrap_or_default(),
            outcomes,
            outcome_token_ids: token_ids,
            outcome_prices: prices,
            best_bid: raw.best_bid,
            best_ask: raw.best_ask,
            spread: raw.spread,
            last_trade_price: raw.last_trade_price,
            volume: raw.volume.unwrap_or_default().max(Decimal::ZERO),
            volume_24h: raw.volume_24hr.unwrap_or_default().max(Decimal::ZERO),
            liquidity: raw.liquidity.unwrap_or_default().max(Decimal::ZERO),
            category: raw.category,
            end_date: raw.end_date.as_deref().and_then(parse_instant),
            active: raw.active.unwrap_or(false),
            closed,
            archived: raw.archived.unwrap_or(false),
            resolved,
            winning_outcome,
        }
    }
}

/// A fully closed market with exactly one price at 1 and the rest at 0 is
/// resolved; the winning index is the unit-price outcome.
fn resolution_from_prices(closed: bool, prices: &[Decimal]) -> (bool, Option<i32>) {
    if !closed || prices.is_empty() {
        return (false, None);
    }
    let Some(winner) = prices.iter().position(|p| *p == Decimal::ONE) else {
        return (false, None);
    };
    let others_zero = prices
        .iter()
        .enumerate()
        .all(|(i, p)| i == winner || *p == Decimal::ZERO);
    if others_zero {
        (true, Some(winner as i32))
    } else {
        (false, None)
    }
}

// ============================================================================
// CLOB tradability
// ============================================================================

/// Tradability answer from the order-book service.
#[derive(Debug, Clone, Deserialize)]
pub struct ClobMarket {
    #[serde(default)]
    pub closed: bool,
    #[serde(default = "default_true")]
    pub accepting_orders: bool,
    #[serde(default = "default_true")]
    pub enable_order_book: bool,
}

impl ClobMarket {
    /// A market is tradable only when the book is open in every respect.
    #[must_use]
    pub fn is_tradable(&self) -> bool {
        !self.closed && self.accepting_orders && self.enable_order_book
    }
}

// ============================================================================
// Global trades feed
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub proxy_wallet: Option<String>,
}

/// One executed trade from the global feed.
#[derive(Debug, Clone)]
pub struct GlobalTrade {
    pub asset: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: i64,
    pub transaction_hash: String,
    pub proxy_wallet: String,
}

impl GlobalTrade {
    /// Drops trades without an asset id; everything else defaults.
    #[must_use]
    pub fn from_raw(raw: RawTrade) -> Option<Self> {
        let asset = raw.asset.filter(|a| !a.is_empty())?;
        Some(Self {
            asset,
            side: raw.side.unwrap_or_default(),
            price: raw.price.unwrap_or_default(),
            size: raw.size.unwrap_or_default(),
            timestamp: raw.timestamp.unwrap_or_default(),
            transaction_hash: raw.transaction_hash.unwrap_or_default(),
            proxy_wallet: raw.proxy_wallet.unwrap_or_default(),
        })
    }
}

// ============================================================================
// Price history
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RawHistory {
    #[serde(default)]
    pub history: Vec<RawHistoryPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHistoryPoint {
    pub t: i64,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub p: Option<Decimal>,
}

/// One historical price observation, seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPoint {
    pub t: i64,
    pub p: Decimal,
}

impl From<RawHistoryPoint> for HistoryPoint {
    fn from(raw: RawHistoryPoint) -> Self {
        Self {
            t: raw.t,
            p: raw.p.unwrap_or_default().clamp(Decimal::ZERO, Decimal::ONE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_decimal_accepts_bare_dot_form() {
        assert_eq!(parse_decimal(".53"), Some(dec!(0.53)));
        assert_eq!(parse_decimal("0.47"), Some(dec!(0.47)));
        assert_eq!(parse_decimal("100"), Some(dec!(100)));
        assert_eq!(parse_decimal("junk"), None);
    }

    #[test]
    fn market_decodes_string_encoded_arrays() {
        let json = r#"{
            "id": "512329",
            "conditionId": "0xabc123",
            "question": "Will it happen?",
            "slug": "will-it-happen",
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[\"0.53\", \".47\"]",
            "clobTokenIds": "[\"tok-yes\", \"tok-no\"]",
            "bestBid": "0.52",
            "bestAsk": 0.54,
            "volume24hr": "12345.6",
            "endDate": "2026-06-30T12:00:00Z",
            "active": true,
            "closed": false,
            "someFutureField": {"ignored": true}
        }"#;

        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert_eq!(market.id, "512329");
        assert_eq!(market.condition_id, "0xabc123");
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
        assert_eq!(market.outcome_token_ids, vec!["tok-yes", "tok-no"]);
        assert_eq!(market.outcome_prices, vec![dec!(0.53), dec!(0.47)]);
        assert_eq!(market.best_bid, Some(dec!(0.52)));
        assert_eq!(market.best_ask, Some(dec!(0.54)));
        assert_eq!(market.volume_24h, dec!(12345.6));
        assert!(market.active);
        assert!(!market.closed);
        assert!(!market.resolved);
        assert_eq!(market.end_date.unwrap().to_rfc3339(), "2026-06-30T12:00:00+00:00");
    }

    #[test]
    fn malformed_outcomes_fall_back_to_yes_no() {
        let json = r#"{
            "id": "1",
            "outcomes": "not json at all",
            "outcomePrices": "[\"0.6\", \"0.4\"]",
            "clobTokenIds": "[\"a\", \"b\"]"
        }"#;
        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
        assert_eq!(market.outcome_prices, vec![dec!(0.6), dec!(0.4)]);
    }

    #[test]
    fn sequences_are_aligned_to_token_arity() {
        // Three tokens, two labels, one price: labels and prices get padded.
        let json = r#"{
            "id": "1",
            "outcomes": "[\"A\", \"B\"]",
            "outcomePrices": "[\"0.9\"]",
            "clobTokenIds": "[\"t1\", \"t2\", \"t3\"]"
        }"#;
        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert_eq!(market.outcome_token_ids.len(), 3);
        assert_eq!(market.outcomes, vec!["A", "B", "Outcome 3"]);
        assert_eq!(market.outcome_prices, vec![dec!(0.9), dec!(0), dec!(0)]);
    }

    #[test]
    fn missing_token_ids_empty_all_sequences() {
        let json = r#"{"id": "1", "outcomes": "[\"Yes\", \"No\"]"}"#;
        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert!(market.outcome_token_ids.is_empty());
        assert!(market.outcomes.is_empty());
        assert!(market.outcome_prices.is_empty());
    }

    #[test]
    fn prices_are_clamped_to_unit_interval() {
        let json = r#"{
            "id": "1",
            "outcomePrices": "[\"1.2\", \"-0.1\"]",
            "clobTokenIds": "[\"a\", \"b\"]"
        }"#;
        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert_eq!(market.outcome_prices, vec![dec!(1), dec!(0)]);
    }

    #[test]
    fn resolved_market_reports_winning_index() {
        let json = r#"{
            "id": "1",
            "outcomePrices": "[\"0\", \"1\"]",
            "clobTokenIds": "[\"a\", \"b\"]",
            "closed": true
        }"#;
        let market: CatalogMarket = serde_json::from_str::<RawMarket>(json).unwrap().into();
        assert!(market.resolved);
        assert_eq!(market.winning_outcome, Some(1));
    }

    #[test]
    fn closed_but_drifting_prices_are_not_resolved() {
        assert_eq!(
            resolution_from_prices(true, &[dec!(0.97), dec!(0.05)]),
            (false, None)
        );
        assert_eq!(resolution_from_prices(false, &[dec!(1), dec!(0)]), (false, None));
        assert_eq!(
            resolution_from_prices(true, &[dec!(1), dec!(0), dec!(0)]),
            (true, Some(0))
        );
    }

    #[test]
    fn event_decodes_nested_markets_and_tags() {
        let json = r#"{
            "id": "ev-9",
            "title": "Championship 2026",
            "slug": "championship-2026",
            "description": "Who wins it all",
            "startDate": "2026-01-01T00:00:00Z",
            "endDate": "2026-12-31T00:00:00Z",
            "volume": "250000",
            "volume24hr": 1250.5,
            "liquidity": "9000",
            "active": true,
            "closed": false,
            "archived": false,
            "tags": [{"label": "Sports", "slug": "sports"}, {"slug": "finals"}],
            "markets": [
                {"id": "m-1", "clobTokenIds": "[\"a\",\"b\"]", "outcomes": "[\"Yes\",\"No\"]", "outcomePrices": "[\"0.5\",\"0.5\"]"}
            ]
        }"#;

        let event: CatalogEvent = serde_json::from_str::<RawEvent>(json).unwrap().into();
        assert_eq!(event.id, "ev-9");
        assert_eq!(event.title, "Championship 2026");
        assert_eq!(event.volume, dec!(250000));
        assert_eq!(event.volume_24h, dec!(1250.5));
        assert_eq!(event.tags, vec!["Sports", "finals"]);
        assert_eq!(event.markets.len(), 1);
        assert_eq!(event.markets[0].id, "m-1");
    }

    #[test]
    fn event_without_nested_markets_decodes_empty() {
        let json = r#"{"id": "ev-1", "title": "Bare"}"#;
        let event: CatalogEvent = serde_json::from_str::<RawEvent>(json).unwrap().into();
        assert!(event.markets.is_empty());
        assert!(!event.active);
    }

    #[test]
    fn clob_market_tradability() {
        let open: ClobMarket = serde_json::from_str(
            r#"{"closed": false, "accepting_orders": true, "enable_order_book": true}"#,
        )
        .unwrap();
        assert!(open.is_tradable());

        let no_book: ClobMarket =
            serde_json::from_str(r#"{"closed": false, "enable_order_book": false}"#).unwrap();
        assert!(!no_book.is_tradable());

        let closed: ClobMarket = serde_json::from_str(r#"{"closed": true}"#).unwrap();
        assert!(!closed.is_tradable());

        // Missing fields lean tradable; only explicit signals close a market.
        let bare: ClobMarket = serde_json::from_str("{}").unwrap();
        assert!(bare.is_tradable());
    }

    #[test]
    fn trade_decodes_and_requires_asset() {
        let json = r#"{
            "asset": "tok-1",
            "side": "BUY",
            "price": 0.5,
            "size": "10",
            "timestamp": 1700,
            "transactionHash": "0xabc",
            "proxyWallet": "0xdef"
        }"#;
        let trade = GlobalTrade::from_raw(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(trade.asset, "tok-1");
        assert_eq!(trade.price, dec!(0.5));
        assert_eq!(trade.size, dec!(10));
        assert_eq!(trade.timestamp, 1700);

        let missing: RawTrade = serde_json::from_str(r#"{"side": "SELL"}"#).unwrap();
        assert!(GlobalTrade::from_raw(missing).is_none());
    }

    #[test]
    fn history_points_decode_and_clamp() {
        let raw: RawHistory = serde_json::from_str(
            r#"{"history": [{"t": 1000, "p": 0.7}, {"t": 2000, "p": "1.5"}]}"#,
        )
        .unwrap();
        let points: Vec<HistoryPoint> = raw.history.into_iter().map(Into::into).collect();
        assert_eq!(points[0], HistoryPoint { t: 1000, p: dec!(0.7) });
        assert_eq!(points[1], HistoryPoint { t: 2000, p: dec!(1) });
    }
}
