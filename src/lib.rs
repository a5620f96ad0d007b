//! Refereed: Checkpointed Review Pipelines
//!
//! Drives a topic through team composition, drafting, desk screening, rounds of
//! concurrent peer review and revision, and a final moderator decision. Every stage
//! ends in a durable checkpoint, so a crashed process resumes where it stopped
//! instead of repeating external calls. A bounded worker pool runs many workflows
//! at once and classifies leftover result directories at startup.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod pool;
pub mod provider;
pub mod references;
pub mod runtime;
pub mod schema;
pub mod status;
pub mod workflow;
