//! Upstream REST clients for the indexer.
//!
//! Four thin adapters share one request pipeline (`http::Requester`): the
//! paginated metadata catalog, the CLOB tradability lookup, the global trades
//! feed, and the per-condition price history. Clients never retry; callers
//! retry on their own timers.

pub mod auth;
pub mod catalog;
pub mod clob;
pub mod error;
pub mod history;
pub mod http;
pub mod models;
pub mod trades;

pub use auth::RequestSigner;
pub use catalog::CatalogClient;
pub use clob::ClobClient;
pub use error::{ClientError, ClientResult};
pub use history::{HistoryInterval, PriceHistoryClient};
pub use http::Requester;
pub use models::{CatalogEvent, CatalogMarket, ClobMarket, GlobalTrade, HistoryPoint};
pub use trades::TradesClient;
