//! The pipeline engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Risk analyst     (every screened case)
//!   2. Decision gate    (every screened case)
//!   3. Compliance       (approved cases only)
//!   4. SAR filer        (approved cases only)
//!
//! RULES:
//!   - Cases are processed one at a time, in selection order.
//!   - Stages execute in registration order for each case.
//!   - A stage that does not apply to the case's state is skipped, and
//!     the skip is logged as an event.
//!   - All randomness flows through the RngBank, seeded from (seed, run id).
//!   - All state changes are recorded in the event log.

use crate::{
    audit::AuditTrail,
    backend::{NarrativeBackend, RiskBackend},
    case::CaseContext,
    case_loader::CsvData,
    clock::PipelineClock,
    compliance_stage::{ComplianceStage, TemplateNarrator},
    config::{CostModel, PipelineConfig},
    decision_gate_stage::{DecisionGateStage, PolicyReviewer, Reviewer},
    error::SarResult,
    event::{EventLogEntry, PipelineEvent},
    metrics::PipelineMetrics,
    risk_analyst_stage::{RiskAnalystStage, RuleBasedAnalyst},
    rng::{run_seed, RngBank, StageRng, StageSlot},
    sar_filer_stage::SarFilerStage,
    stage::{PipelineStage, StageEnv},
    store::SarStore,
    types::{CaseSeq, RunId},
};
use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};

pub const AUDIT_DIR: &str = "audit_logs";
pub const FILING_DIR: &str = "filings";

/// Sequence number for run-level events.
const RUN_SEQ: CaseSeq = 0;

pub struct PipelineEngine {
    pub run_id: RunId,
    pub clock: PipelineClock,
    pub rng_bank: RngBank,
    seed: u64,
    stages: Vec<Box<dyn PipelineStage>>,
    store: SarStore,
    audit: AuditTrail,
    cost_model: CostModel,
    cases: Vec<CaseContext>,
    load_failures: usize,
    initialized: bool,
}

impl PipelineEngine {
    pub fn new(
        run_id: RunId,
        seed: u64,
        store: SarStore,
        audit: AuditTrail,
        clock: PipelineClock,
        cost_model: CostModel,
    ) -> Self {
        Self {
            clock,
            rng_bank: RngBank::new(run_seed(seed, &run_id)),
            seed,
            stages: Vec::new(),
            store,
            audit,
            cost_model,
            cases: Vec::new(),
            load_failures: 0,
            initialized: false,
            run_id,
        }
    }

    /// Build a fully wired engine with the built-in backends and every
    /// stage registered. Outputs go under `out_dir`.
    pub fn build(
        run_id: RunId,
        seed: u64,
        store: SarStore,
        config: &PipelineConfig,
        reviewer: Box<dyn Reviewer>,
        out_dir: &Path,
        clock: PipelineClock,
    ) -> SarResult<Self> {
        Self::build_with_backends(
            run_id,
            seed,
            store,
            config,
            Box::new(RuleBasedAnalyst::new(config.risk_rules.clone())),
            reviewer,
            Box::new(TemplateNarrator::new(config.narrative.clone())),
            out_dir,
            clock,
        )
    }

    /// Same as build(), with caller-supplied backends.
    #[allow(clippy::too_many_arguments)]
    pub fn build_with_backends(
        run_id: RunId,
        seed: u64,
        store: SarStore,
        config: &PipelineConfig,
        risk_backend: Box<dyn RiskBackend>,
        reviewer: Box<dyn Reviewer>,
        narrative_backend: Box<dyn NarrativeBackend>,
        out_dir: &Path,
        clock: PipelineClock,
    ) -> SarResult<Self> {
        let audit_rng = StageRng::new(run_seed(seed, &run_id), StageSlot::Audit as u64).with_name(StageSlot::Audit.name());
        let audit = AuditTrail::open(&out_dir.join(AUDIT_DIR), run_id.clone(), clock, audit_rng)?;
        let mut engine = PipelineEngine::new(run_id, seed, store, audit, clock, config.cost_model);

        // EXECUTION ORDER: fixed, documented, never reordered.
        engine.register(Box::new(RiskAnalystStage::new(risk_backend)));
        engine.register(Box::new(DecisionGateStage::new(reviewer)));
        engine.register(Box::new(ComplianceStage::new(narrative_backend, &config.narrative)?));
        engine.register(Box::new(SarFilerStage::new(out_dir.join(FILING_DIR))));
        Ok(engine)
    }

    /// In-memory store, frozen clock, policy reviewer and test config.
    pub fn build_test(run_id: RunId, seed: u64, out_dir: &Path) -> SarResult<Self> {
        let store = SarStore::in_memory()?;
        store.migrate()?;
        let config = PipelineConfig::default_test();
        let reviewer = Box::new(PolicyReviewer::new(config.review_policy.clone()));
        Self::build(run_id, seed, store, &config, reviewer, out_dir, test_clock())
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    /// Register the run and emit RunInitialized at seq 0 so seed
    /// differences are observable. Idempotent.
    pub fn initialize(&mut self) -> SarResult<()> {
        if self.initialized {
            return Ok(());
        }
        if !self.store.run_exists(&self.run_id)? {
            self.store.insert_run(
                &self.run_id,
                self.seed,
                env!("CARGO_PKG_VERSION"),
                &self.clock.now().to_rfc3339(),
            )?;
        }
        let init = PipelineEvent::RunInitialized {
            run_id: self.run_id.clone(),
            seed: self.seed,
        };
        persist(&self.store, &self.run_id, RUN_SEQ, "engine", &init)?;
        self.initialized = true;
        log::info!("run {} initialized (seed {})", self.run_id, self.seed);
        Ok(())
    }

    /// Select up to `top_n` cases and register them as screened.
    /// Returns how many cases were added.
    pub fn load_cases(&mut self, data: &CsvData, top_n: usize) -> SarResult<usize> {
        self.initialize()?;
        let outcome = data.select_top_n(
            top_n,
            self.rng_bank.for_stage(StageSlot::Loader),
            self.clock,
            &mut self.audit,
        );
        self.load_failures += outcome.failures;

        let added = outcome.cases.len();
        for case in outcome.cases {
            let seq = self.cases.len() as CaseSeq + 1;
            self.store.insert_case(
                &self.run_id,
                &case.case_id,
                seq,
                &case.customer.customer_id,
                &case.case_created_at.to_rfc3339(),
            )?;
            self.cases.push(CaseContext::new(seq, case));
        }
        log::info!(
            "loaded {added} case(s) for screening, {} customer(s) skipped",
            outcome.failures
        );
        Ok(added)
    }

    /// Run every stage over one case. This is the core pipeline step.
    pub fn process_case(&mut self, index: usize) -> SarResult<Vec<PipelineEvent>> {
        let Some(ctx) = self.cases.get_mut(index) else {
            return Err(crate::error::SarError::CaseNotFound {
                case_id: format!("#{index}"),
            });
        };
        let seq = ctx.seq;
        let mut case_events = vec![PipelineEvent::CaseStarted {
            seq,
            case_id: ctx.case.case_id.clone(),
            customer_id: ctx.case.customer.customer_id.clone(),
        }];
        persist(&self.store, &self.run_id, seq, "engine", &case_events[0])?;

        for stage in &mut self.stages {
            let new_events = if stage.applies_to(ctx.state()) {
                let mut env = StageEnv {
                    run_id: &self.run_id,
                    store: &self.store,
                    audit: &mut self.audit,
                    rng: self.rng_bank.for_stage(stage.slot()),
                    clock: self.clock,
                };
                stage.process(ctx, &mut env)?
            } else {
                log::debug!("case={seq} {} skipped ({})", stage.name(), ctx.state());
                vec![PipelineEvent::StageSkipped {
                    seq,
                    case_id: ctx.case.case_id.clone(),
                    stage: stage.name().to_string(),
                    state: ctx.state(),
                }]
            };

            for event in &new_events {
                persist(&self.store, &self.run_id, seq, stage.name(), event)?;
            }
            case_events.extend(new_events);
        }

        let done = PipelineEvent::CaseCompleted {
            seq,
            case_id: ctx.case.case_id.clone(),
            final_state: ctx.state(),
        };
        persist(&self.store, &self.run_id, seq, "engine", &done)?;
        log::info!("case={seq} completed: {}", ctx.state());
        case_events.push(done);
        Ok(case_events)
    }

    /// Process every loaded case that has not reached a terminal state.
    pub fn process_all(&mut self) -> SarResult<()> {
        for index in 0..self.cases.len() {
            if self.cases[index].state().is_terminal() {
                continue;
            }
            self.process_case(index)?;
        }
        Ok(())
    }

    /// Load, screen and file. Returns the run's metrics.
    pub fn run(&mut self, data: &CsvData, top_n: usize) -> SarResult<PipelineMetrics> {
        self.load_cases(data, top_n)?;
        self.process_all()?;
        Ok(self.metrics())
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics::from_cases(&self.cases, self.load_failures, &self.cost_model)
    }

    /// Write the metrics report under `out_dir` and store the run summary.
    pub fn finish(&self, out_dir: &Path) -> SarResult<(PipelineMetrics, PathBuf)> {
        let metrics = self.metrics();
        let now = self.clock.now();
        let path = metrics.write_report(out_dir, &self.run_id, now)?;
        self.store
            .save_run_summary(&self.run_id, &now.to_rfc3339(), &serde_json::to_string(&metrics)?)?;
        log::info!("metrics report written to {}", path.display());
        Ok((metrics, path))
    }

    pub fn cases(&self) -> &[CaseContext] {
        &self.cases
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn store(&self) -> &SarStore {
        &self.store
    }

    pub fn load_failures(&self) -> usize {
        self.load_failures
    }

    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_case(&self, seq: CaseSeq) -> SarResult<Vec<EventLogEntry>> {
        self.store.events_for_case(&self.run_id, seq)
    }

    pub fn store_events_for_run(&self) -> SarResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }
}

/// The frozen instant used by build_test().
pub fn test_clock() -> PipelineClock {
    match Utc.with_ymd_and_hms(2024, 12, 19, 12, 0, 0).single() {
        Some(at) => PipelineClock::fixed(at),
        None => PipelineClock::system(),
    }
}

fn persist(store: &SarStore, run_id: &str, seq: CaseSeq, stage: &str, event: &PipelineEvent) -> SarResult<()> {
    let entry = EventLogEntry {
        id: None,
        run_id: run_id.to_string(),
        seq,
        stage: stage.to_string(),
        event_type: event.type_name().to_string(),
        payload: serde_json::to_string(event)?,
    };
    store.append_event(&entry)
}
