//! Fundamental types for the election coordinator.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! addresses, chain ids, candidates, tallies, receipts, timestamps, and the
//! session/role/phase state records.

pub mod address;
pub mod candidate;
pub mod error;
pub mod hash;
pub mod network;
pub mod results;
pub mod state;
pub mod tally;
pub mod time;

pub use address::Address;
pub use candidate::CandidateName;
pub use error::TypesError;
pub use hash::{TxHash, TxReceipt, TxStatus};
pub use network::ChainId;
pub use results::{CandidateResult, ResultsDocument};
pub use state::{ElectionPhase, PublicationRecord, RoleState, Session};
pub use tally::{TallyKind, VoteTally};
pub use time::{Clock, SystemClock, Timestamp};
