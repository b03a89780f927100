//! Shared primitive types used across the entire pipeline.

/// Position of a case in the run's processing order, starting at 1.
/// Sequence 0 is reserved for run-level events.
pub type CaseSeq = u64;

/// An opaque case token (UUID layout, generated from the run seed).
pub type CaseId = String;

/// A stable, unique identifier for any input record.
pub type EntityId = String;

/// The canonical run identifier.
pub type RunId = String;
