//! Wallet session management.
//!
//! Provides everything the coordinator needs from a wallet:
//! - The [`WalletProvider`] capability (accounts, chain id, chain switch, events)
//! - Disposable listener subscriptions that unsubscribe when dropped
//! - [`SessionManager`], which owns the current [`Session`](tally_types::Session)
//!   and the account/network change listeners
//! - [`HttpWalletProvider`], an EIP-1193 JSON-RPC provider over HTTP

pub mod error;
pub mod http;
pub mod listeners;
pub mod manager;
pub mod provider;

pub use error::SessionError;
pub use http::HttpWalletProvider;
pub use listeners::{ListenerRegistry, Subscription, SubscriptionGuard};
pub use manager::{SessionEvent, SessionManager};
pub use provider::{EventKind, WalletEvent, WalletProvider};
