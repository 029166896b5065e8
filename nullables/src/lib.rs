//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the coordinator (clock, wallet, ledger,
//! publication service) is abstracted behind a trait. This crate provides
//! in-memory implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically (account switches, chain changes,
//!   injected failures, held receipts)
//! - Record the calls made against them
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod ledger;
pub mod publisher;
pub mod wallet;

pub use clock::NullClock;
pub use ledger::{NullLedger, ReceiptGate};
pub use publisher::NullPublisher;
pub use wallet::NullWallet;
