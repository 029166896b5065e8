//! Publication of JSON documents to a content-addressed store.
//!
//! [`Publisher`] is the capability the results pipeline depends on;
//! [`PinataClient`] implements it against the Pinata pinning API.

pub mod error;
pub mod pinata;
pub mod publisher;

pub use error::PublishError;
pub use pinata::{PinataClient, PinataConfig};
pub use publisher::{test_connection, Publisher};
