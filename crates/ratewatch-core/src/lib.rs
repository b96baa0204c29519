//! # RateWatch
//!
//! Exchange-rate and gold-price ingestion with threshold alerts.
//!
//! RateWatch pulls daily series from the NBP public API, rebuilds long date
//! ranges from the bounded chunks the upstream allows, and periodically
//! checks user-defined thresholds against the latest published rates.
//!
//! ## Architecture
//!
//! - **Upstream**: NBP client behind the [`upstream::UpstreamClient`] trait
//! - **Fetcher**: chunked range fetch with first-seen deduplication
//! - **Resolver**: latest value with a lookback window and one fallback
//! - **Alerting**: rule store, evaluator, email notifier and scheduler
//! - **API**: REST API for data and alert rules
//! - **Protocol**: SOAP-style envelope adapter on its own listener
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the API, protocol listener and scheduler
//! ratewatch serve
//!
//! # Fetch a year of EUR rates
//! ratewatch fetch EUR --start 2023-01-01 --end 2023-12-31
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod protocol;
pub mod resolver;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{NotificationSink, RuleStore, Scheduler, ThresholdCheck};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fetcher::{RangeFetcher, SeriesFetch};
    pub use crate::models::*;
    pub use crate::protocol::{ProtocolAdapter, ProtocolReply};
    pub use crate::resolver::{LatestValueResolver, LatestValueSource};
    pub use crate::upstream::{FetchOutcome, NbpClient, UpstreamClient};
}
