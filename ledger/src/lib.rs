//! Capability interface over the election contract.
//!
//! The coordinator only ever talks to the ledger through [`ElectionLedger`].
//! [`HttpLedger`] implements it against a JSON-over-HTTP contract gateway;
//! tests use the in-memory implementation from `tally-nullables`.

pub mod client;
pub mod contract;
pub mod error;

pub use client::HttpLedger;
pub use contract::{ElectionLedger, LedgerMethod, PendingTx};
pub use error::LedgerError;
