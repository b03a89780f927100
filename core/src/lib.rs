pub mod agent_output;
pub mod audit;
pub mod backend;
pub mod case;
pub mod case_loader;
pub mod clock;
pub mod compliance_stage;
pub mod config;
pub mod decision_gate_stage;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub mod risk_analyst_stage;
pub mod rng;
pub mod sar_filer_stage;
pub mod schema;
pub mod stage;
pub mod store;
pub mod types;
