//! Incremental merge pipeline for the Reality Cast Ledger.
//!
//! The pieces compose in pipeline order: schema resolution fixes the column
//! contracts, the resolver unifies the two id namespaces, the aggregator
//! folds appearance rows per person, the classifier decides which pairings
//! are worth keeping, and the engine diffs those candidates against the
//! persisted table and emits append-only batches plus column-scoped patches.
//! The supplemental operations (name normalization, episode/season transfer,
//! person-table build, attribute backfill) reuse the same building blocks.

pub mod aggregate;
pub mod attributes;
pub mod classify;
pub mod engine;
pub mod normalize;
pub mod person_table;
pub mod reconcile;
pub mod resolver;
pub mod schema;
pub mod transfer;

pub use aggregate::{aggregate as aggregate_records, AggregateOutcome};
pub use classify::{Decision, EligibilityPolicy, ShowCategory};
pub use engine::{MergeConfig, MergeEngine, MergeError, MergePlan, RunSummary};
pub use reconcile::{reconcile, ReconcileField, WriteDecision};
pub use resolver::IdentityResolver;
pub use schema::SchemaError;

pub const CRATE_NAME: &str = "rcl-merge";
