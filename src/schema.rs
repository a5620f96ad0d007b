//! Structured Output Schemas
//!
//! Model output is recovered into JSON by [`repair_json`] and then read into one
//! typed payload per stage. Payload construction is total: missing or malformed
//! fields take documented fallbacks instead of failing the stage.

pub mod payloads;
mod repair;

pub use payloads::{
    DraftPayload, ModeratorPayload, ReviewPayload, RevisionPayload, ScreeningVerdict,
    SectionRevision, TeamProposal, DEFAULT_SCORE,
};
pub use repair::{repair_json, repair_json_with_strategy, RepairError, RepairStrategy};
