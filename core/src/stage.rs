//! Stage trait and the environment a stage runs in.
//!
//! RULE: Every pipeline step implements PipelineStage.
//! The engine calls process() on each registered stage, in
//! registration order, for one case at a time.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    audit::AuditTrail,
    case::{CaseContext, CaseState},
    clock::PipelineClock,
    error::SarResult,
    event::PipelineEvent,
    rng::{StageRng, StageSlot},
    store::SarStore,
};

/// Shared services for one stage invocation.
pub struct StageEnv<'a> {
    pub run_id: &'a str,
    pub store: &'a SarStore,
    pub audit: &'a mut AuditTrail,
    pub rng: &'a mut StageRng,
    pub clock: PipelineClock,
}

/// The contract every stage must fulfill.
pub trait PipelineStage {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// The RNG stream this stage draws from.
    fn slot(&self) -> StageSlot;

    /// Whether the stage runs for a case in `state`. The engine records a
    /// skip event instead of calling process() when this is false.
    fn applies_to(&self, state: CaseState) -> bool;

    /// Called once per case by the engine.
    ///
    /// Returns the events to append to the case's event log.
    fn process(&mut self, ctx: &mut CaseContext, env: &mut StageEnv<'_>) -> SarResult<Vec<PipelineEvent>>;
}
