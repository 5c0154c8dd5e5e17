//! Incremental, append-only merge of appearance data into the viable table.
//!
//! One run is a linear pass through a fixed set of phases; only the load and
//! diff phases read the store, only the emit phases write it. The diff is
//! recomputed from the persisted snapshot on every run, so a run that died
//! between batches self-heals on the next invocation: already-applied work
//! simply stops appearing in the plan. The engine assumes it is the only
//! writer against the target table.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rcl_core::{
    AppearanceRecord, CompositeKey, PersonRef, ShowRef, SourceTag, ViableRecord,
};
use rcl_store::{BackoffPolicy, CellPatch, StoreError, Table, TabularStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::classify::EligibilityPolicy;
use crate::resolver::IdentityResolver;
use crate::schema::{
    AppearanceColumns, PersonTableColumns, SchemaError, ShowTableColumns, ViableColumns,
};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(
        "{kind} batch covering items {start}..{end} failed after retries \
         ({batches_sent} batches confirmed before it)"
    )]
    BatchFailed {
        kind: BatchKind,
        start: usize,
        end: usize,
        batches_sent: usize,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Append,
    Patch,
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchKind::Append => write!(f, "append"),
            BatchKind::Patch => write!(f, "patch"),
        }
    }
}

/// Phases of one run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LoadSources,
    ResolveIdentities,
    Aggregate,
    Classify,
    DiffAgainstPersisted,
    EmitAppendBatch,
    EmitPatchBatch,
    Done,
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub appearance_table: String,
    pub viable_table: String,
    pub person_table: String,
    pub show_table: String,
    pub batch_size: usize,
    pub dry_run: bool,
    pub reports_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            appearance_table: "CastInfo".to_string(),
            viable_table: "ViableCast".to_string(),
            person_table: "UpdateInfo".to_string(),
            show_table: "ShowInfo".to_string(),
            batch_size: 500,
            dry_run: false,
            reports_dir: None,
        }
    }
}

impl MergeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| std::env::var(name).unwrap_or(fallback);
        Self {
            appearance_table: var("RCL_APPEARANCE_TABLE", defaults.appearance_table),
            viable_table: var("RCL_VIABLE_TABLE", defaults.viable_table),
            person_table: var("RCL_PERSON_TABLE", defaults.person_table),
            show_table: var("RCL_SHOW_TABLE", defaults.show_table),
            batch_size: std::env::var("RCL_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.batch_size),
            dry_run: false,
            reports_dir: std::env::var("RCL_REPORTS_DIR").ok().map(PathBuf::from),
        }
    }
}

/// The pure output of the diff phase.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub appends: Vec<ViableRecord>,
    pub patches: Vec<CellPatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_fingerprint: String,
    pub dry_run: bool,
    pub records_loaded: usize,
    pub people_aggregated: usize,
    pub pairings_considered: usize,
    pub pairings_excluded: usize,
    pub skipped_unresolved: usize,
    pub appends_planned: usize,
    pub patches_planned: usize,
    pub append_batches_sent: usize,
    pub patch_batches_sent: usize,
    pub elapsed_ms: u128,
}

pub struct MergeEngine<'a> {
    store: &'a dyn TabularStore,
    config: MergeConfig,
    policy: EligibilityPolicy,
    backoff: BackoffPolicy,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn TabularStore, config: MergeConfig, policy: EligibilityPolicy) -> Self {
        Self {
            store,
            config,
            policy,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(&self) -> Result<RunSummary, MergeError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%run_id, dry_run = self.config.dry_run, "merge run starting");

        debug!(phase = ?Phase::LoadSources, "entering phase");
        let appearance = self.store.read_table(&self.config.appearance_table).await?;
        let viable = self.store.read_table(&self.config.viable_table).await?;
        let person_table = self.store.read_table(&self.config.person_table).await?;
        let show_table = self.store.read_table(&self.config.show_table).await?;

        // Schema mismatches abort here, before any write is possible.
        let appearance_cols = AppearanceColumns::resolve(&appearance)?;
        let viable_cols = ViableColumns::resolve(&viable)?;
        let person_cols = PersonTableColumns::resolve(&person_table)?;
        let show_cols = ShowTableColumns::resolve(&show_table)?;

        let source_fingerprint =
            fingerprint_sources(&[&appearance, &viable, &person_table, &show_table]);

        debug!(phase = ?Phase::ResolveIdentities, "entering phase");
        let resolver =
            IdentityResolver::from_tables(&person_table, &person_cols, &show_table, &show_cols);
        let records = collect_appearance_records(&appearance, &appearance_cols, &resolver);
        let records_loaded = records.len();

        debug!(phase = ?Phase::Aggregate, "entering phase");
        let outcome = aggregate(&records);
        let people_aggregated = outcome.stats.len();

        debug!(phase = ?Phase::Classify, "entering phase");
        let mut candidates: Vec<ViableRecord> = Vec::new();
        let mut pairings_considered = 0usize;
        let mut pairings_excluded = 0usize;
        let mut skipped_unresolved = 0usize;
        for person in outcome.stats.values() {
            for show_stats in person.shows.values() {
                pairings_considered += 1;
                let decision = self.policy.classify(
                    &show_stats.show.name,
                    Some(show_stats.episode_count),
                    Some(show_stats.seasons.len() as u32),
                );
                if !decision.include {
                    pairings_excluded += 1;
                    continue;
                }
                let (Some(person_alnum), Some(show_alnum)) = (
                    person.alnum_id.as_deref().filter(|s| !s.is_empty()),
                    show_stats.show.alnum_id.as_deref().filter(|s| !s.is_empty()),
                ) else {
                    // No composite key without both ids; still present in
                    // aggregates under the name key, just not persistable.
                    skipped_unresolved += 1;
                    continue;
                };
                candidates.push(ViableRecord {
                    show_alnum_id: show_alnum.to_string(),
                    person_numeric_id: person.numeric_id.clone().unwrap_or_default(),
                    person_name: person.name.clone(),
                    person_alnum_id: person_alnum.to_string(),
                    show_numeric_id: show_stats.show.numeric_id.clone().unwrap_or_default(),
                    show_name: show_stats.show.name.clone(),
                });
            }
        }

        debug!(phase = ?Phase::DiffAgainstPersisted, "entering phase");
        let plan = merge_plan(&candidates, &viable, &viable_cols, &resolver);
        info!(
            appends = plan.appends.len(),
            patches = plan.patches.len(),
            "merge plan computed"
        );

        let mut append_batches_sent = 0usize;
        let mut patch_batches_sent = 0usize;
        if self.config.dry_run {
            info!("dry run, skipping emit phases");
        } else {
            debug!(phase = ?Phase::EmitAppendBatch, "entering phase");
            let rows: Vec<Vec<String>> = plan.appends.iter().map(ViableRecord::to_row).collect();
            append_batches_sent = self.send_append_batches(&rows).await?;

            debug!(phase = ?Phase::EmitPatchBatch, "entering phase");
            patch_batches_sent = self.send_patch_batches(&plan.patches).await?;
        }

        debug!(phase = ?Phase::Done, "entering phase");
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_fingerprint,
            dry_run: self.config.dry_run,
            records_loaded,
            people_aggregated,
            pairings_considered,
            pairings_excluded,
            skipped_unresolved,
            appends_planned: plan.appends.len(),
            patches_planned: plan.patches.len(),
            append_batches_sent,
            patch_batches_sent,
            elapsed_ms: clock.elapsed().as_millis(),
        };
        if let Some(dir) = &self.config.reports_dir {
            write_report(dir, &summary).await?;
        }
        info!(%run_id, elapsed_ms = summary.elapsed_ms, "merge run finished");
        Ok(summary)
    }

    async fn send_append_batches(&self, rows: &[Vec<String>]) -> Result<usize, MergeError> {
        let mut batches_sent = 0usize;
        for (batch_index, batch) in rows.chunks(self.config.batch_size).enumerate() {
            let start = batch_index * self.config.batch_size;
            self.send_with_retry(BatchKind::Append, start, start + batch.len(), batches_sent, || {
                self.store.append_rows(&self.config.viable_table, batch)
            })
            .await?;
            batches_sent += 1;
        }
        Ok(batches_sent)
    }

    async fn send_patch_batches(&self, patches: &[CellPatch]) -> Result<usize, MergeError> {
        let mut batches_sent = 0usize;
        for (batch_index, batch) in patches.chunks(self.config.batch_size).enumerate() {
            let start = batch_index * self.config.batch_size;
            self.send_with_retry(BatchKind::Patch, start, start + batch.len(), batches_sent, || {
                self.store.apply_patches(&self.config.viable_table, batch)
            })
            .await?;
            batches_sent += 1;
        }
        Ok(batches_sent)
    }

    /// Send one batch, retrying only transient failures (rate limits and
    /// server-side errors). Any other store error, or retry exhaustion,
    /// surfaces with the exact failing range so the operator knows where the
    /// run stopped.
    async fn send_with_retry<F, Fut>(
        &self,
        kind: BatchKind,
        start: usize,
        end: usize,
        batches_sent: usize,
        mut send: F,
    ) -> Result<(), MergeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let mut attempt = 0usize;
        loop {
            match send().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.backoff.max_retries => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(%kind, start, end, attempt, ?delay, "transient store failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(MergeError::BatchFailed {
                        kind,
                        start,
                        end,
                        batches_sent,
                        source,
                    });
                }
            }
        }
    }
}

/// Turn appearance rows into resolved records. Identity resolution happens
/// here, once per row, so everything downstream sees filled ids.
pub fn collect_appearance_records(
    table: &Table,
    cols: &AppearanceColumns,
    resolver: &IdentityResolver,
) -> Vec<AppearanceRecord> {
    let mut records = Vec::with_capacity(table.rows.len());
    for row_index in 0..table.rows.len() {
        let person = resolver.resolve_person(&PersonRef {
            numeric_id: non_empty(table.cell(row_index, cols.person_numeric)),
            alnum_id: non_empty(table.cell(row_index, cols.person_alnum)),
            name: table.cell(row_index, cols.person_name).to_string(),
        });
        let show = resolver.resolve_show(&ShowRef {
            numeric_id: non_empty(table.cell(row_index, cols.show_numeric)),
            alnum_id: non_empty(table.cell(row_index, cols.show_alnum)),
            name: table.cell(row_index, cols.show_name).to_string(),
        });
        let episode_count = table.cell(row_index, cols.episodes).parse::<u32>().ok();
        let seasons: BTreeSet<String> = table
            .cell(row_index, cols.seasons)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        records.push(AppearanceRecord {
            person,
            show,
            episode_count,
            seasons,
            source: SourceTag::Appearance,
        });
    }
    records
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Pure diff of candidates against the persisted table.
///
/// Appends: candidates whose composite key is absent, in input order, one row
/// per key. Patches: allow-listed identifier cells on existing rows, either
/// filling a blank or correcting the person id against the mapping ground
/// truth. Nothing else is touched; the reserved trailing columns in
/// particular never appear in a patch.
pub fn merge_plan(
    candidates: &[ViableRecord],
    persisted: &Table,
    cols: &ViableColumns,
    resolver: &IdentityResolver,
) -> MergePlan {
    let mut persisted_keys: BTreeSet<CompositeKey> = BTreeSet::new();
    for row_index in 0..persisted.rows.len() {
        let person = persisted.cell(row_index, cols.person_alnum);
        let show = persisted.cell(row_index, cols.show_alnum);
        if !person.is_empty() && !show.is_empty() {
            persisted_keys.insert(CompositeKey::new(person, show));
        }
    }

    // show alnum -> (numeric id, name) from this run's candidates, used to
    // backfill blanks on persisted rows.
    let mut show_fill: HashMap<&str, (&str, &str)> = HashMap::new();
    for candidate in candidates {
        show_fill
            .entry(candidate.show_alnum_id.as_str())
            .or_insert((candidate.show_numeric_id.as_str(), candidate.show_name.as_str()));
    }

    let mut plan = MergePlan::default();
    for row_index in 0..persisted.rows.len() {
        let row = row_index + 2;
        let person_numeric = persisted.cell(row_index, cols.person_numeric);
        let person_alnum = persisted.cell(row_index, cols.person_alnum);
        let show_alnum = persisted.cell(row_index, cols.show_alnum);

        if !person_numeric.is_empty() {
            if let Some(truth) = resolver.alnum_for_numeric(person_numeric) {
                if person_alnum != truth {
                    if !person_alnum.is_empty() {
                        debug!(row, stored = person_alnum, truth, "correcting person id");
                    }
                    plan.patches.push(CellPatch {
                        row,
                        column: cols.person_alnum,
                        value: truth.to_string(),
                    });
                    // The row is keyed by its corrected identity, so the
                    // same pairing cannot also arrive as an append.
                    if !show_alnum.is_empty() {
                        persisted_keys.insert(CompositeKey::new(truth, show_alnum));
                    }
                }
            }
        }

        if show_alnum.is_empty() {
            continue;
        }
        if persisted.cell(row_index, cols.show_numeric).is_empty() {
            if let Some((numeric, _)) = show_fill.get(show_alnum) {
                if !numeric.is_empty() {
                    plan.patches.push(CellPatch {
                        row,
                        column: cols.show_numeric,
                        value: numeric.to_string(),
                    });
                }
            }
        }
        if persisted.cell(row_index, cols.show_name).is_empty() {
            let name = resolver
                .canonical_show_title(show_alnum)
                .or_else(|| show_fill.get(show_alnum).map(|(_, name)| *name).filter(|n| !n.is_empty()));
            if let Some(name) = name {
                plan.patches.push(CellPatch {
                    row,
                    column: cols.show_name,
                    value: name.to_string(),
                });
            }
        }
    }

    let mut planned_keys: BTreeSet<CompositeKey> = BTreeSet::new();
    for candidate in candidates {
        let key = candidate.composite_key();
        if persisted_keys.contains(&key) || !planned_keys.insert(key) {
            continue;
        }
        plan.appends.push(candidate.clone());
    }
    plan
}

fn fingerprint_sources(tables: &[&Table]) -> String {
    let mut hasher = Sha256::new();
    for table in tables {
        hasher.update(table.title.as_bytes());
        hasher.update([0u8]);
        for cell in table.header.iter().chain(table.rows.iter().flatten()) {
            hasher.update(cell.as_bytes());
            hasher.update([0u8]);
        }
    }
    hex::encode(hasher.finalize())
}

async fn write_report(dir: &std::path::Path, summary: &RunSummary) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("merge-{}.json", summary.run_id));
    let body = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}
