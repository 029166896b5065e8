//! Election session and lifecycle coordination.
//!
//! - [`RoleResolver`]: admin / registered-voter / has-voted flags per account
//! - [`ElectionMachine`]: phase, candidates, tallies, single-write actions and polling
//! - [`ResultsPipeline`]: the resumable close → tally → publish sequence
//! - [`Coordinator`]: composes the above with the wallet session into one
//!   observable state and the action surface
//! - [`ElectionConfig`]: TOML configuration

pub mod config;
pub mod coordinator;
pub mod error;
pub mod machine;
pub mod pipeline;
pub mod resolver;

pub use config::{check_contract_abi, ElectionConfig, JWT_ENV};
pub use coordinator::{
    Capabilities, Coordinator, CoordinatorSettings, CoordinatorState, Notice, PublishedResults,
    CANDIDATE_REGISTERED_MESSAGE, VOTER_REGISTERED_MESSAGE, VOTE_CAST_MESSAGE,
};
pub use error::{ConfigError, ElectionError, ErrorKind};
pub use machine::{candidate_name, voter_address, ElectionMachine, ElectionSnapshot};
pub use pipeline::{
    PipelineOutcome, PipelineStep, ResultsPipeline, ResumePoint, CLOSED_MESSAGE,
    CLOSING_MESSAGE, COMMITTING_MESSAGE, UPLOADING_MESSAGE,
};
pub use resolver::RoleResolver;
