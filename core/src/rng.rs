//! Deterministic random number generation.
//!
//! RULE: Nothing in the pipeline may call a platform RNG.
//! Every generated token (case ids, SAR ids, audit log ids) flows
//! through a StageRng derived from the run seed, which folds the run id
//! into the master seed. Two runs with the same seed but different run
//! ids never share ids; the same (seed, run id) pair replays exactly.
//!
//! Each stage gets its own stream, seeded from
//! (master_seed XOR slot_index * golden ratio). Adding a stage never
//! changes the streams of existing stages.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use uuid::Uuid;

/// A named, deterministic RNG for a single stage.
pub struct StageRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StageRng {
    /// Create a stage RNG from the master seed and a stable slot index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// A version-4 UUID whose random bits come from this stream.
    pub fn uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.inner.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// Fold `run_id` into `master_seed` (FNV-1a over the id bytes).
pub fn run_seed(master_seed: u64, run_id: &str) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    run_id
        .bytes()
        .fold(master_seed ^ 0xcbf2_9ce4_8422_2325, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// All stage RNGs for a single run. Streams are created once and
/// handed out by slot so ids keep advancing across cases.
pub struct RngBank {
    streams: Vec<StageRng>,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        let streams = StageSlot::ALL
            .iter()
            .map(|slot| StageRng::new(master_seed, *slot as u64).with_name(slot.name()))
            .collect();
        Self { streams }
    }

    pub fn for_stage(&mut self, slot: StageSlot) -> &mut StageRng {
        &mut self.streams[slot as usize]
    }
}

/// Stable stage slot assignments.
/// NEVER reorder or remove entries, only append.
/// Reordering changes every stage's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StageSlot {
    Loader = 0,
    RiskAnalyst = 1,
    DecisionGate = 2,
    Compliance = 3,
    Filer = 4,
    Audit = 5,
}

impl StageSlot {
    pub const ALL: [StageSlot; 6] = [
        Self::Loader,
        Self::RiskAnalyst,
        Self::DecisionGate,
        Self::Compliance,
        Self::Filer,
        Self::Audit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Loader => "loader",
            Self::RiskAnalyst => "risk_analyst",
            Self::DecisionGate => "decision_gate",
            Self::Compliance => "compliance",
            Self::Filer => "sar_filer",
            Self::Audit => "audit",
        }
    }
}
