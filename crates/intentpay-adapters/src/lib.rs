//! In-process ledger and market-data adapters for intentpay.
//!
//! Everything here is deterministic and lives in memory, for tests and local dry
//! runs of plans.

#![deny(unsafe_code)]

pub mod fixture;
pub mod ledger;
pub mod market;

pub use fixture::Fixture;
pub use ledger::{InMemoryLedger, SettledTransfer};
pub use market::{StaticMarketData, UnreachableMarketData};
