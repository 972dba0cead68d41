//! gatesync release pipeline.
//!
//! Turns a publish request into published runtime configuration. The
//! request path validates and records the release; background jobs then
//! convert the snapshot and converge each target cluster's registry.
//!
//! # Components
//!
//! - **`publisher`**: request entry points (publish, revoke, status, decommission)
//! - **`job`**: one publish task run against one cluster
//! - **`event`**: step plan and publish state derived from events

pub mod error;
pub mod event;
pub mod job;
pub mod publisher;

pub use error::{ExecutionError, PublishError, PublishResult, ValidationError};
pub use event::{PublishState, PublishTracker, StepPlan};
pub use job::{JobReport, PublishJob};
pub use publisher::{PublishOutcome, PublishRequest, PublishStatus, Publisher, RevokeRequest};
